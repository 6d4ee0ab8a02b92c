//! Display helpers for operator-facing output.

use crate::risk::RiskLevel;
use crate::types::Session;
use chrono::{DateTime, Utc};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    format_relative_to(ts, Utc::now())
}

fn format_relative_to(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format an optional timestamp as relative time, or "-" if missing.
pub fn format_relative_time_opt(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format_relative_time(ts),
        None => "-".to_string(),
    }
}

/// "step/total (pct%)"
pub fn format_progress(session: &Session) -> String {
    format!(
        "{}/{} ({}%)",
        session.current_step,
        session.total_steps,
        session.progress_percent()
    )
}

/// Risk level and score, or "-" for unscored sessions.
pub fn format_risk(score: Option<u8>) -> String {
    match score {
        Some(score) => format!("{} ({})", RiskLevel::from_score(score), score),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_relative_time() {
        let now = Utc::now();
        assert_eq!(format_relative_to(now - Duration::seconds(5), now), "5s ago");
        assert_eq!(format_relative_to(now - Duration::minutes(3), now), "3m ago");
        assert_eq!(format_relative_to(now + Duration::seconds(5), now), "just now");
        assert_eq!(format_relative_time_opt(None), "-");
    }

    #[test]
    fn test_risk() {
        assert_eq!(format_risk(Some(30)), "low (30)");
        assert_eq!(format_risk(Some(95)), "critical (95)");
        assert_eq!(format_risk(None), "-");
    }
}
