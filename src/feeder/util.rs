use chrono::{DateTime, Utc};

/// Make a conversation name safe for folder and artifact names.
///
/// Keeps letters, digits, spaces and `._,-`; everything else becomes `_`
/// and runs of `_` collapse. Never returns an empty string.
pub fn sanitize_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let keep = ch.is_alphanumeric() || matches!(ch, ' ' | '.' | '_' | ',' | '-');
        let next = if keep { ch } else { '_' };
        if next == '_' && out.ends_with('_') {
            continue;
        }
        out.push(next);
    }
    let trimmed = out.trim_matches(|c: char| c == '_' || c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "conversation".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Truncate `input` to at most `max_chars` characters, stripping control
/// characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

pub fn iso8601(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Suffix used to keep file-style artifact names unique per write.
pub fn write_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Slack ids: `C` (channel), `D` (direct message) or `G` (group) then alphanumerics.
pub fn is_valid_conversation_id(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let rest = chars.as_str();
    matches!(first, 'C' | 'D' | 'G')
        && !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanitize_name_replaces_path_separators() {
        assert_eq!(sanitize_name("eng/ops: alerts"), "eng_ops_ alerts");
        assert_eq!(sanitize_name("Tara, Jay Flowers"), "Tara, Jay Flowers");
        assert_eq!(sanitize_name("///"), "conversation");
    }

    #[test]
    fn truncation_appends_ellipsis() {
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
        assert_eq!(truncate_with_ellipsis("ab\ncd", 10), "abcd");
    }

    #[test]
    fn conversation_ids_are_checked() {
        assert!(is_valid_conversation_id("C0123ABC"));
        assert!(is_valid_conversation_id("D9"));
        assert!(!is_valid_conversation_id("U0123"));
        assert!(!is_valid_conversation_id("C"));
        assert!(!is_valid_conversation_id("C01-23"));
    }

    #[test]
    fn stamps_are_utc() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 1, 2).single().expect("time");
        assert_eq!(write_stamp(now), "20240401_000102");
        assert_eq!(iso8601(now), "2024-04-01T00:01:02.000000Z");
    }
}
