//! Standard 5-field cron (minute hour day-of-month month day-of-week).
//!
//! The `cron` crate speaks a 6/7-field dialect with seconds leading, so a
//! synthetic `"0 "` seconds field is prepended before handing the expression
//! off to it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Validate a 5-field cron expression, returning a parsed `Schedule`.
///
/// Anything other than exactly 5 whitespace-separated fields is rejected,
/// including the 6/7-field dialect the underlying crate natively accepts --
/// the public contract here is exactly "5-field standard cron".
pub fn parse(expression: &str) -> Result<Schedule> {
    let field_count = expression.split_whitespace().count();
    if field_count != 5 {
        anyhow::bail!(
            "cron expression must have exactly 5 fields (minute hour day-of-month month day-of-week), got {}",
            field_count
        );
    }

    let with_seconds = format!("0 {}", expression);
    Schedule::from_str(&with_seconds)
        .with_context(|| format!("invalid cron expression '{}'", expression))
}

/// Next fire instant strictly after `after`.
pub fn next_after(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse(expression)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| anyhow::anyhow!("no future occurrences for cron expression '{}'", expression))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accepts_five_fields() {
        assert!(parse("*/15 * * * *").is_ok());
        assert!(parse("0 9 * * 1-5").is_ok());
    }

    #[test]
    fn rejects_non_five_field_expressions() {
        assert!(parse("0 */15 * * * *").is_err()); // 6-field dialect
        assert!(parse("* * * *").is_err()); // too few
        assert!(parse("not a cron").is_err());
    }

    #[test]
    fn computes_next_fire_after_reference() {
        use chrono::Timelike;

        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let next = next_after("0 9 * * *", now).unwrap();
        assert_eq!(next.hour(), 9);
    }
}
