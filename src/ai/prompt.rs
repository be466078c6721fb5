use chrono::{FixedOffset, Offset, TimeZone, Utc};

/// Meeting material shared by every participant prompt of one recording.
#[derive(Debug, Clone, Default)]
pub struct SummaryContext {
    pub subject: String,
    pub start_time: i64,
    pub end_time: i64,
    pub summary: String,
    pub minutes: String,
    pub todo: String,
    pub transcript: String,
    pub utc_offset_minutes: i32,
}

const EMPTY_FIELD: &str = "(none)";

/// Identical inputs always produce the identical prompt.
pub fn build_participant_prompt(ctx: &SummaryContext, participant_name: &str) -> String {
    let start = format_epoch(ctx.start_time, ctx.utc_offset_minutes);
    let end = format_epoch(ctx.end_time, ctx.utc_offset_minutes);

    format!(
        "Write a personal recap of the meeting below for {name}.\n\
         Focus on what {name} said, the decisions that affect {name}, \
         and the action items {name} owns or should follow up on.\n\
         \n\
         Meeting subject: {subject}\n\
         Start time: {start}\n\
         End time: {end}\n\
         Participant: {name}\n\
         \n\
         ## Meeting summary\n{summary}\n\
         \n\
         ## Meeting minutes\n{minutes}\n\
         \n\
         ## To-do items\n{todo}\n\
         \n\
         ## Transcript\n{transcript}\n",
        name = participant_name,
        subject = or_none(&ctx.subject),
        start = start,
        end = end,
        summary = or_none(&ctx.summary),
        minutes = or_none(&ctx.minutes),
        todo = or_none(&ctx.todo),
        transcript = or_none(&ctx.transcript),
    )
}

fn or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        EMPTY_FIELD
    } else {
        value
    }
}

fn format_epoch(epoch_seconds: i64, utc_offset_minutes: i32) -> String {
    if epoch_seconds <= 0 {
        return EMPTY_FIELD.to_string();
    }
    let offset = utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    match offset.timestamp_opt(epoch_seconds, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => EMPTY_FIELD.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SummaryContext {
        SummaryContext {
            subject: "Roadmap sync".to_string(),
            start_time: 1_700_000_000,
            end_time: 1_700_003_600,
            summary: "Agreed on Q3 scope.".to_string(),
            minutes: "1. Scope\n2. Hiring".to_string(),
            todo: String::new(),
            transcript: "Alice(00:00:01)：Hello".to_string(),
            utc_offset_minutes: 480,
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let ctx = context();
        assert_eq!(
            build_participant_prompt(&ctx, "Alice"),
            build_participant_prompt(&ctx, "Alice")
        );
        assert_ne!(
            build_participant_prompt(&ctx, "Alice"),
            build_participant_prompt(&ctx, "Bob")
        );
    }

    #[test]
    fn test_prompt_contains_material() {
        let prompt = build_participant_prompt(&context(), "Alice");
        assert!(prompt.contains("Meeting subject: Roadmap sync"));
        assert!(prompt.contains("Start time: 2023-11-15 06:13"));
        assert!(prompt.contains("End time: 2023-11-15 07:13"));
        assert!(prompt.contains("Participant: Alice"));
        assert!(prompt.contains("## To-do items\n(none)"));
        assert!(prompt.contains("Alice(00:00:01)：Hello"));
    }

    #[test]
    fn test_empty_placeholders_render_as_none() {
        let ctx = SummaryContext::default();
        let prompt = build_participant_prompt(&ctx, "Bob");
        assert!(prompt.contains("Start time: (none)"));
        assert!(prompt.contains("## Transcript\n(none)"));
    }
}
