//! Plain-text rendering of headers and message bodies.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

use crate::error::{FeederError, FeederResult};
use crate::feeder::destination::IdentityResolver;
use crate::feeder::model::{Message, Timestamp};

pub const RULE_WIDTH: usize = 80;
pub const NO_IDENTITY_PLACEHOLDER: &str = "[No ID - Alternate Source Import]";
const REPLY_INDENT: &str = "    ";
const MENTION_PATTERN: &str = r"<@([UW][A-Z0-9]+)(?:\|[^>]*)?>|@([UW][A-Z0-9]{6,})\b";

pub fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// Separator written before appended content.
pub fn append_separator() -> String {
    format!("\n\n{}\n\n", rule())
}

/// Fields shown at the top of every newly created artifact.
#[derive(Debug, Clone, Copy)]
pub struct HeaderContext<'a> {
    pub conversation_name: &'a str,
    pub conversation_id: Option<&'a str>,
    pub exported_at: DateTime<Utc>,
}

pub struct Renderer {
    tz: Tz,
    mention: Regex,
}

impl Renderer {
    pub fn new(tz: Tz) -> FeederResult<Self> {
        let mention = Regex::new(MENTION_PATTERN)
            .map_err(|err| FeederError::validation(format!("mention pattern: {err}")))?;
        Ok(Self { tz, mention })
    }

    pub fn format_time(&self, ts: Timestamp) -> String {
        ts.to_utc()
            .with_timezone(&self.tz)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string()
    }

    pub fn header(&self, ctx: &HeaderContext<'_>, period: &str, count: usize) -> String {
        format!(
            "Slack Conversation Export\n\
             Conversation: {}\n\
             Conversation ID: {}\n\
             Export Date: {}\n\
             Period: {period}\n\
             Total Messages: {count}\n\
             \n{}\n\n",
            ctx.conversation_name,
            ctx.conversation_id.unwrap_or(NO_IDENTITY_PLACEHOLDER),
            ctx.exported_at.format("%Y-%m-%d %H:%M:%S UTC"),
            rule(),
        )
    }

    /// Replace `<@U..>` and bare `@U..` mentions with `@DisplayName`.
    pub fn replace_mentions(&self, text: &str, names: &dyn IdentityResolver) -> String {
        self.mention
            .replace_all(text, |caps: &Captures<'_>| {
                let id = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map_or("", |m| m.as_str());
                format!("@{}", names.display_name(id))
            })
            .into_owned()
    }

    fn render_one(&self, message: &Message, indent: &str, names: &dyn IdentityResolver) -> String {
        let continuation = format!("\n{indent}{REPLY_INDENT}");
        let body = self
            .replace_mentions(message.text.trim_end(), names)
            .replace('\n', &continuation);
        let mut out = format!(
            "{indent}{} @ {} : {body}",
            names.display_name(&message.author),
            self.format_time(message.ts)
        );

        for file in &message.files {
            out.push_str(&format!("\n{indent}{REPLY_INDENT}[File attached: {file}]"));
        }
        if !message.reactions.is_empty() {
            let summary = message
                .reactions
                .iter()
                .map(|r| {
                    let who = r
                        .users
                        .iter()
                        .map(|u| names.display_name(u))
                        .collect::<Vec<_>>();
                    if who.is_empty() {
                        format!(":{}: x{}", r.name, r.count)
                    } else {
                        format!(":{}: x{} ({})", r.name, r.count, who.join(", "))
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("\n{indent}{REPLY_INDENT}Reactions: {summary}"));
        }
        out
    }

    /// Render messages grouped by thread; replies sit one level under their parent.
    ///
    /// A reply whose parent is not part of this write is still indented so it
    /// never reads as a top-level message.
    pub fn render_messages(&self, messages: &[Message], names: &dyn IdentityResolver) -> String {
        let mut threads: BTreeMap<Timestamp, Vec<&Message>> = BTreeMap::new();
        for message in messages.iter().filter(|m| m.has_content()) {
            threads.entry(message.thread_key()).or_default().push(message);
        }

        let mut blocks = Vec::with_capacity(threads.len());
        for (_, mut thread) in threads {
            thread.sort_by_key(|m| m.ts);
            let mut lines = Vec::with_capacity(thread.len());
            for message in thread {
                let indent = if message.is_reply() { REPLY_INDENT } else { "" };
                lines.push(self.render_one(message, indent, names));
            }
            blocks.push(lines.join("\n"));
        }
        let mut out = blocks.join("\n\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::directory::PassthroughNames;
    use crate::feeder::model::Reaction;
    use crate::feeder::testing::{FakeNames, message};
    use chrono::TimeZone;

    fn renderer() -> Renderer {
        Renderer::new(chrono_tz::UTC).expect("renderer")
    }

    #[test]
    fn message_line_has_author_time_and_body() {
        let names = FakeNames::new(&[("U1", "Alice")]);
        let mut msg = message(1711929540, "hello\nsecond line");
        msg.author = "U1".into();
        let out = renderer().render_messages(&[msg], &names);
        assert_eq!(
            out,
            "Alice @ 2024-03-31 23:59:00 UTC : hello\n    second line\n"
        );
    }

    #[test]
    fn replies_are_indented_under_their_parent() {
        let names = PassthroughNames;
        let parent = message(100, "question");
        let mut reply = message(160, "answer");
        reply.thread_ts = Some(parent.ts);
        let other = message(130, "unrelated");

        let out = renderer().render_messages(&[parent, reply, other], &names);
        let lines = out.lines().collect::<Vec<_>>();
        assert!(lines[0].ends_with(": question"));
        assert!(lines[1].starts_with("    ") && lines[1].ends_with(": answer"));
        assert_eq!(lines[2], "");
        assert!(lines[3].ends_with(": unrelated"));
    }

    #[test]
    fn reactions_files_and_mentions_are_rendered() {
        let names = FakeNames::new(&[("U1", "Alice"), ("U2", "Bob")]);
        let mut msg = message(100, "ping <@U2> and <@U1|alice>");
        msg.author = "U1".into();
        msg.files = vec!["plan.pdf".into()];
        msg.reactions = vec![Reaction {
            name: "thumbsup".into(),
            count: 2,
            users: vec!["U1".into(), "U2".into()],
        }];
        let out = renderer().render_messages(&[msg], &names);
        assert!(out.contains(": ping @Bob and @Alice"));
        assert!(out.contains("\n    [File attached: plan.pdf]"));
        assert!(out.contains("\n    Reactions: :thumbsup: x2 (Alice, Bob)"));
    }

    #[test]
    fn empty_messages_are_skipped() {
        let out = renderer().render_messages(&[message(100, "  ")], &PassthroughNames);
        assert!(out.is_empty());
    }

    #[test]
    fn header_uses_placeholder_without_identity() {
        let ctx = HeaderContext {
            conversation_name: "Tara, Jay",
            conversation_id: None,
            exported_at: Utc.with_ymd_and_hms(2024, 4, 2, 8, 0, 0).single().expect("time"),
        };
        let header = renderer().header(&ctx, "2024-04-01", 3);
        assert!(header.starts_with("Slack Conversation Export\nConversation: Tara, Jay\n"));
        assert!(header.contains(&format!("Conversation ID: {NO_IDENTITY_PLACEHOLDER}\n")));
        assert!(header.contains("Export Date: 2024-04-02 08:00:00 UTC\n"));
        assert!(header.contains("Period: 2024-04-01\nTotal Messages: 3\n\n"));
        assert!(header.ends_with(&format!("{}\n\n", rule())));
    }

    #[test]
    fn display_timezone_is_applied() {
        let tokyo = Renderer::new(chrono_tz::Asia::Tokyo).expect("renderer");
        let ts = Timestamp::from_secs(1711929540).expect("ts");
        assert_eq!(tokyo.format_time(ts), "2024-04-01 08:59:00 JST");
    }
}
