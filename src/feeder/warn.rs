fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if !ch.is_control() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        crate::feeder::util::truncate_with_ellipsis(trimmed, 240)
    }
}

/// One greppable line per operator-facing warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub conversation: &'a str,
    pub action: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

pub fn format_line(event: &WarnEvent<'_>) -> String {
    format!(
        "FEEDER_WARN code={} stage={} conversation={} action={} reason={} err={}",
        sanitize_value(event.code),
        sanitize_value(event.stage),
        sanitize_value(event.conversation),
        sanitize_value(event.action),
        sanitize_value(event.reason),
        sanitize_value(event.err),
    )
}

pub fn emit(event: WarnEvent<'_>) {
    tracing::warn!("{}", format_line(&event));
}

#[cfg(test)]
mod tests {
    use super::{WarnEvent, format_line, sanitize_value};

    #[test]
    fn sanitize_value_rewrites_whitespace() {
        assert_eq!(sanitize_value("a b\tc"), "a_b_c");
    }

    #[test]
    fn sanitize_value_falls_back_for_empty() {
        assert_eq!(sanitize_value("   "), "na");
    }

    #[test]
    fn line_carries_every_field() {
        let line = format_line(&WarnEvent {
            code: "E005_REMOTE",
            stage: "metadata",
            conversation: "C1",
            action: "assume-none",
            reason: "read failed",
            err: "",
        });
        assert_eq!(
            line,
            "FEEDER_WARN code=E005_REMOTE stage=metadata conversation=C1 action=assume-none reason=read_failed err=na"
        );
    }
}
