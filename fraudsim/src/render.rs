//! Plain-text rendering for CLI output.

use fraudsim_core::dashboard::DashboardSnapshot;
use fraudsim_core::format::{
    format_progress, format_relative_time, format_relative_time_opt, format_risk,
};
use fraudsim_core::{AdminActivity, Alert, RiskAssessment, SessionDetail, SessionView};

/// First 8 characters of an id.
fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub fn print_sessions(views: &[SessionView]) {
    if views.is_empty() {
        println!("No live sessions.");
        return;
    }

    println!(
        "{:<10} {:<12} {:<14} {:>9} {:<10} {}",
        "SESSION", "ROLE", "PROGRESS", "CAPTURED", "SEEN", "ENTRY"
    );
    for view in views {
        let marker = if view.recently_active { "*" } else { " " };
        println!(
            "{:<10} {:<12} {:<14} {:>9} {:<10} {}",
            short(&view.session.id),
            format!("{}{}", marker, view.role.as_str()),
            format_progress(&view.session),
            format!("{}/{}", view.sensitive_count, view.capture_count),
            format_relative_time(view.session.last_activity_at),
            view.session.entry_point,
        );
    }
}

pub fn print_detail(detail: &SessionDetail) {
    let session = &detail.session;
    println!("Session:   {}", session.id);
    println!("Status:    {}", session.status);
    println!("Role:      {}", detail.role.as_str());
    if let Some(email) = &session.participant_email {
        println!("Email:     {}", email);
    }
    println!("Progress:  {}", format_progress(session));
    println!("Started:   {}", format_relative_time(session.started_at));
    println!("Seen:      {}", format_relative_time(session.last_activity_at));
    println!("Completed: {}", format_relative_time_opt(session.completed_at));
    println!("Risk:      {}", format_risk(session.risk_score));

    println!();
    if detail.fields.is_empty() {
        println!("No captured fields.");
    } else {
        println!("Captured fields:");
        for field in &detail.fields {
            let value = if field.is_sensitive {
                "[sensitive]"
            } else {
                field.field_value.as_str()
            };
            println!("  [{}] {:<20} {}", field.step, field.field_name, value);
        }
    }

    if !detail.alerts.is_empty() {
        println!();
        print_alerts(&detail.alerts);
    }
}

pub fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("No open alerts.");
        return;
    }
    for alert in alerts {
        println!(
            "{} [{}] session {} {} - {}",
            alert.id,
            alert.severity.as_str(),
            short(&alert.session_id),
            format_relative_time(alert.created_at),
            alert.message
        );
    }
}

pub fn print_assessment(assessment: &RiskAssessment) {
    println!("Risk level:       {} ({})", assessment.level, assessment.score);
    println!("Time to exposure: {}", assessment.time_to_exposure);

    if !assessment.threats.is_empty() {
        println!("Threats:");
        for threat in &assessment.threats {
            println!("  - [{}] {}", threat.category.as_str(), threat.description);
        }
    }
    if !assessment.recommendations.is_empty() {
        println!("Recommendations:");
        for recommendation in &assessment.recommendations {
            println!("  - {}", recommendation);
        }
    }
}

pub fn print_activity(records: &[AdminActivity]) {
    if records.is_empty() {
        println!("No operator activity yet.");
        return;
    }
    for record in records {
        println!(
            "{:<10} {:<14} {:<24} {}",
            format_relative_time(record.created_at),
            record.activity_type.as_str(),
            record.actor_ref.as_deref().unwrap_or("system"),
            record.description
        );
    }
}

pub fn print_snapshot(snapshot: &DashboardSnapshot) {
    let stats = &snapshot.stats;
    println!();
    println!(
        "[{}] live {} | participants {} | operators {} | recent {} | alerts {} | sensitive {}",
        format_relative_time_opt(snapshot.refreshed_at),
        stats.live_sessions,
        stats.participant_sessions,
        stats.operator_sessions,
        stats.recently_active,
        stats.open_alerts,
        stats.sensitive_captures
    );
    print_sessions(&snapshot.participants);
    if !snapshot.operators.is_empty() {
        println!("({} operator session(s) hidden)", snapshot.operators.len());
    }
    if !snapshot.alerts.is_empty() {
        print_alerts(&snapshot.alerts);
    }
}
