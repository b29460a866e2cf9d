//! System prompt rendering.

use chrono::{DateTime, SecondsFormat, Utc};

/// Placeholder substituted with the current UTC time.
pub const SYSTEM_TIME_PLACEHOLDER: &str = "{system_time}";

/// Render a system prompt template for a model call made at `now`.
pub fn render_system_prompt(template: &str, now: DateTime<Utc>) -> String {
    template.replace(
        SYSTEM_TIME_PLACEHOLDER,
        &now.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}
