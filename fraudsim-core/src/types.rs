//! Core domain types for fraudsim
//!
//! These types represent the persisted data model shared by the participant
//! side (session tracking) and the operator side (live monitoring).
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One run through the simulated checkout flow |
//! | **Participant** | The person walking through the simulated flow |
//! | **Operator** | The person observing sessions from the dashboard |
//! | **Captured field** | One named value recorded from a form at a given step |
//! | **Liveness window** | Inactivity threshold after which a session is reclaimed |
//! | **Intervention** | An operator-initiated action targeting one live session |

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Current time truncated to the precision the store persists.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ============================================
// Sessions
// ============================================

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Participant is (or was recently) moving through the flow
    Active,
    /// Reclaimed by the liveness sweep; reactivated by new activity
    Inactive,
    /// Flow finished explicitly; terminal
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Inactive => "inactive",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "inactive" => Ok(SessionStatus::Inactive),
            "completed" => Ok(SessionStatus::Completed),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who a session belongs to, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    #[default]
    Participant,
    /// Operator test run; hidden from participant-facing lists
    Operator,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Participant => "participant",
            SessionRole::Operator => "operator",
        }
    }
}

impl std::str::FromStr for SessionRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "participant" => Ok(SessionRole::Participant),
            "operator" => Ok(SessionRole::Operator),
            _ => Err(format!("unknown session role: {}", s)),
        }
    }
}

/// Client device details reported when the session starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub user_agent: Option<String>,
    pub platform: Option<String>,
    pub screen: Option<String>,
    pub language: Option<String>,
}

/// One participant's (or operator's) run through the tracked flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: String,
    /// Resume token held by the participant's client
    pub token: String,
    /// Reference to the participant account, if signed in
    pub participant_ref: Option<String>,
    /// Participant email (classification only)
    pub participant_email: Option<String>,
    /// Participant display name (classification only)
    pub participant_name: Option<String>,
    /// Role fixed at creation
    pub role: SessionRole,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Highest step reached; never decreases while active
    pub current_step: u32,
    pub total_steps: u32,
    pub status: SessionStatus,
    /// Landing page or campaign the participant entered from
    pub entry_point: String,
    pub device_info: DeviceInfo,
    /// Risk score stamped on completion (0-100)
    pub risk_score: Option<u8>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Progress through the flow as a percentage (0-100).
    pub fn progress_percent(&self) -> u8 {
        if self.total_steps == 0 {
            return 0;
        }
        let pct = (self.current_step.min(self.total_steps) as u64 * 100) / self.total_steps as u64;
        pct as u8
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Whether the flow reached its final step.
    pub fn reached_final_step(&self) -> bool {
        self.total_steps > 0 && self.current_step >= self.total_steps
    }
}

// ============================================
// Captured fields
// ============================================

/// One named value recorded from a form at a specific step.
///
/// Rows are append-only; the current value of a field is the latest row for
/// its `(session_id, field_name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedField {
    pub id: String,
    pub session_id: String,
    pub step: u32,
    pub field_name: String,
    pub field_value: String,
    /// Personally identifying or financial
    pub is_sensitive: bool,
    pub captured_at: DateTime<Utc>,
}

// ============================================
// Alerts
// ============================================

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            _ => Err(format!("unknown alert severity: {}", s)),
        }
    }
}

/// An operator-facing alert raised for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub session_id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

// ============================================
// Admin activity log
// ============================================

/// Kind of operator activity recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Analyze,
    Guidance,
    Restart,
    Nudge,
    CheckAlerts,
    ResolveAlert,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Analyze => "analyze",
            ActivityType::Guidance => "guidance",
            ActivityType::Restart => "restart",
            ActivityType::Nudge => "nudge",
            ActivityType::CheckAlerts => "check_alerts",
            ActivityType::ResolveAlert => "resolve_alert",
        }
    }
}

impl std::str::FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(ActivityType::Analyze),
            "guidance" => Ok(ActivityType::Guidance),
            "restart" => Ok(ActivityType::Restart),
            "nudge" => Ok(ActivityType::Nudge),
            "check_alerts" => Ok(ActivityType::CheckAlerts),
            "resolve_alert" => Ok(ActivityType::ResolveAlert),
            _ => Err(format!("unknown activity type: {}", s)),
        }
    }
}

/// Append-only audit record of an operator action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminActivity {
    pub id: String,
    /// Operator reference; `None` means the system acted
    pub actor_ref: Option<String>,
    pub activity_type: ActivityType,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Guidance
// ============================================

/// Kind of guidance pushed to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceKind {
    Hint,
    Warning,
    Nudge,
    /// Ask the participant's flow to start over with a fresh session
    Restart,
}

impl GuidanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuidanceKind::Hint => "hint",
            GuidanceKind::Warning => "warning",
            GuidanceKind::Nudge => "nudge",
            GuidanceKind::Restart => "restart",
        }
    }
}

impl std::str::FromStr for GuidanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hint" => Ok(GuidanceKind::Hint),
            "warning" => Ok(GuidanceKind::Warning),
            "nudge" => Ok(GuidanceKind::Nudge),
            "restart" => Ok(GuidanceKind::Restart),
            _ => Err(format!("unknown guidance kind: {}", s)),
        }
    }
}

/// Operator guidance waiting to be picked up by the participant's flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidanceMessage {
    pub id: String,
    pub session_id: String,
    pub kind: GuidanceKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

// ============================================
// Live view
// ============================================

/// A live session row for the operator dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session: Session,
    /// Number of captured field rows
    pub capture_count: i64,
    /// Number of captured field rows flagged sensitive
    pub sensitive_count: i64,
    /// Activity within the recent window (1 minute by default)
    pub recently_active: bool,
    /// Classified role (see `query::classify_role`)
    pub role: SessionRole,
}

impl SessionView {
    pub fn progress_percent(&self) -> u8 {
        self.session.progress_percent()
    }
}

/// Raw row returned by the store for the live view, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSessionRow {
    pub session: Session,
    pub capture_count: i64,
    pub sensitive_count: i64,
}
