//! Create-or-append of one bucket's artifact.
//!
//! Every artifact moves through three states:
//!
//! * absent → created, with the header followed by the messages;
//! * present → appended, with a separator followed by messages newer than
//!   the artifact's recorded marker;
//! * present with nothing newer → left untouched.
//!
//! Destinations that cannot append never reach the second state because
//! their artifact names are unique per write.

use crate::error::{FeederError, FeederResult};
use crate::feeder::bucket::Bucket;
use crate::feeder::destination::{ArtifactRef, Destination, FolderRef, IdentityResolver};
use crate::feeder::model::{Message, Timestamp};
use crate::feeder::render::{HeaderContext, Renderer, append_separator};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Created { artifact: ArtifactRef, messages: usize },
    Appended { artifact: ArtifactRef, messages: usize },
    NoOp,
}

impl WriteOutcome {
    pub fn written_messages(&self) -> usize {
        match self {
            Self::Created { messages, .. } | Self::Appended { messages, .. } => *messages,
            Self::NoOp => 0,
        }
    }
}

fn newer_than(messages: &[Message], floor: Option<Timestamp>) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| floor.is_none_or(|f| m.ts > f))
        .cloned()
        .collect()
}

pub struct ArtifactUpserter<'a> {
    renderer: &'a Renderer,
    names: &'a dyn IdentityResolver,
    header: HeaderContext<'a>,
}

impl<'a> ArtifactUpserter<'a> {
    pub fn new(
        renderer: &'a Renderer,
        names: &'a dyn IdentityResolver,
        header: HeaderContext<'a>,
    ) -> Self {
        Self {
            renderer,
            names,
            header,
        }
    }

    /// Write `bucket` to the artifact called `name`.
    ///
    /// `floor` is the conversation's stored high-water mark: messages at or
    /// below it are treated as already recorded, as are messages at or below
    /// an existing artifact's own marker.
    pub fn upsert(
        &self,
        destination: &mut dyn Destination,
        folder: &FolderRef,
        name: &str,
        bucket: &Bucket,
        floor: Option<Timestamp>,
    ) -> FeederResult<WriteOutcome> {
        let existing = destination.find(folder, name)?;

        if let Some(artifact) = existing {
            let Some(appender) = destination.appender() else {
                let fresh = newer_than(&bucket.messages, floor);
                if fresh.is_empty() {
                    return Ok(WriteOutcome::NoOp);
                }
                return Err(FeederError::Unsupported("append"));
            };

            let marker = appender.read_marker(&artifact)?;
            if marker.is_none() {
                tracing::warn!(artifact = %artifact.name, "existing artifact has no marker; appending after stored mark");
            }
            let effective = match (floor, marker) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            let fresh = newer_than(&bucket.messages, effective);
            let Some(newest) = fresh.last().map(|m| m.ts) else {
                return Ok(WriteOutcome::NoOp);
            };

            let mut content = append_separator();
            content.push_str(&self.renderer.render_messages(&fresh, self.names));
            appender.append(&artifact, &content, newest)?;
            return Ok(WriteOutcome::Appended {
                artifact,
                messages: fresh.len(),
            });
        }

        let fresh = newer_than(&bucket.messages, floor);
        let Some(newest) = fresh.last().map(|m| m.ts) else {
            return Ok(WriteOutcome::NoOp);
        };
        let mut content = self
            .renderer
            .header(&self.header, &bucket.key.display(), fresh.len());
        content.push_str(&self.renderer.render_messages(&fresh, self.names));
        let artifact = destination.create(folder, name, &content, Some(newest))?;
        Ok(WriteOutcome::Created {
            artifact,
            messages: fresh.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::bucket::{Granularity, group};
    use crate::feeder::directory::PassthroughNames;
    use crate::feeder::testing::{MemoryDestination, message};
    use chrono::Utc;

    const NAME: &str = "general slack messages 19700101";

    fn renderer() -> Renderer {
        Renderer::new(chrono_tz::UTC).expect("renderer")
    }

    fn header() -> HeaderContext<'static> {
        HeaderContext {
            conversation_name: "general",
            conversation_id: Some("C1"),
            exported_at: Utc::now(),
        }
    }

    fn bucket(secs: &[i64]) -> Bucket {
        let msgs = secs
            .iter()
            .map(|s| message(*s, &format!("m{s}")))
            .collect::<Vec<_>>();
        group(&msgs, Granularity::Daily).remove(0)
    }

    #[test]
    fn absent_artifact_is_created_with_header() {
        let renderer = renderer();
        let upserter = ArtifactUpserter::new(&renderer, &PassthroughNames, header());
        let mut dest = MemoryDestination::doc_style();
        let folder = dest.ensure_folder("general").expect("folder");

        let out = upserter
            .upsert(&mut dest, &folder, NAME, &bucket(&[10, 20]), None)
            .expect("upsert");
        assert!(matches!(out, WriteOutcome::Created { messages: 2, .. }));
        let text = dest.content(&folder, NAME).expect("content");
        assert!(text.starts_with("Slack Conversation Export\n"));
        assert!(text.contains("Total Messages: 2\n"));
        assert_eq!(dest.marker(&folder, NAME), Timestamp::from_secs(20));
    }

    #[test]
    fn append_writes_only_messages_past_the_marker() {
        let renderer = renderer();
        let upserter = ArtifactUpserter::new(&renderer, &PassthroughNames, header());
        let mut dest = MemoryDestination::doc_style();
        let folder = dest.ensure_folder("general").expect("folder");
        upserter
            .upsert(&mut dest, &folder, NAME, &bucket(&[90, 100]), None)
            .expect("seed");

        let out = upserter
            .upsert(&mut dest, &folder, NAME, &bucket(&[98, 100, 101]), None)
            .expect("append");
        assert!(matches!(out, WriteOutcome::Appended { messages: 1, .. }));

        let text = dest.content(&folder, NAME).expect("content");
        assert_eq!(text.matches("Slack Conversation Export").count(), 1);
        assert_eq!(text.matches(": m100").count(), 1);
        assert_eq!(text.matches(": m98").count(), 0);
        assert!(text.contains(": m101"));
        assert!(text.contains(&append_separator()));
        assert_eq!(dest.marker(&folder, NAME), Timestamp::from_secs(101));
    }

    #[test]
    fn nothing_new_is_a_noop() {
        let renderer = renderer();
        let upserter = ArtifactUpserter::new(&renderer, &PassthroughNames, header());
        let mut dest = MemoryDestination::doc_style();
        let folder = dest.ensure_folder("general").expect("folder");
        upserter
            .upsert(&mut dest, &folder, NAME, &bucket(&[10, 20]), None)
            .expect("seed");
        let before = dest.content(&folder, NAME);

        let out = upserter
            .upsert(&mut dest, &folder, NAME, &bucket(&[10, 20]), None)
            .expect("noop");
        assert_eq!(out, WriteOutcome::NoOp);
        assert_eq!(dest.content(&folder, NAME), before);
        assert_eq!(dest.write_count(), 1);
    }

    #[test]
    fn stored_mark_suppresses_rewrites_on_fresh_files() {
        let renderer = renderer();
        let upserter = ArtifactUpserter::new(&renderer, &PassthroughNames, header());
        let mut dest = MemoryDestination::file_style();
        let folder = dest.ensure_folder("general").expect("folder");

        let out = upserter
            .upsert(&mut dest, &folder, "a.txt", &bucket(&[10, 20]), Timestamp::from_secs(20))
            .expect("noop");
        assert_eq!(out, WriteOutcome::NoOp);

        let out = upserter
            .upsert(&mut dest, &folder, "b.txt", &bucket(&[10, 20, 30]), Timestamp::from_secs(20))
            .expect("create");
        assert!(matches!(out, WriteOutcome::Created { messages: 1, .. }));
    }

    #[test]
    fn file_style_collision_reports_missing_append() {
        let renderer = renderer();
        let upserter = ArtifactUpserter::new(&renderer, &PassthroughNames, header());
        let mut dest = MemoryDestination::file_style();
        let folder = dest.ensure_folder("general").expect("folder");
        upserter
            .upsert(&mut dest, &folder, "a.txt", &bucket(&[10]), None)
            .expect("seed");

        let err = upserter
            .upsert(&mut dest, &folder, "a.txt", &bucket(&[10, 11]), None)
            .expect_err("no append");
        assert!(matches!(err, FeederError::Unsupported("append")));
    }
}
