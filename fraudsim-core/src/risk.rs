//! Risk scoring for a session's captured data.
//!
//! The score depends only on which data categories were captured and on
//! whether the flow was completed:
//!
//! | Level | Score | Condition |
//! |-------|-------|-----------|
//! | Critical | 95 | flow completed with identity, payment and booking data |
//! | High | 85 / 75 | payment and identity data (85 when booking data is also present) |
//! | Medium | 55 | identity data only, or payment data without identity |
//! | Low | 30 | anything else |
//!
//! Threats, time to exposure and recommendations are derived from the same
//! category set, so nothing is reported for data that was never captured.

use crate::types::{AlertSeverity, CapturedField, Session};
use serde::Serialize;
use std::collections::BTreeSet;

/// Overall risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Level implied by a stored score.
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => RiskLevel::Critical,
            70..=89 => RiskLevel::High,
            50..=69 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    /// Alert severity raised for this level. Only HIGH and CRITICAL raise
    /// alerts.
    pub fn alert_severity(&self) -> Option<AlertSeverity> {
        match self {
            RiskLevel::Critical | RiskLevel::High => Some(AlertSeverity::High),
            RiskLevel::Medium | RiskLevel::Low => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of data a captured field exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Identity,
    Payment,
    Booking,
    Credentials,
}

impl DataCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Identity => "identity",
            DataCategory::Payment => "payment",
            DataCategory::Booking => "booking",
            DataCategory::Credentials => "credentials",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            DataCategory::Identity => &[
                "name",
                "firstname",
                "lastname",
                "fullname",
                "email",
                "phone",
                "mobile",
                "passport",
                "document",
                "birth",
                "birthdate",
                "dob",
                "nationality",
                "address",
                "ssn",
                "idnumber",
            ],
            DataCategory::Payment => &[
                "card",
                "cardnumber",
                "cardholder",
                "cvv",
                "cvc",
                "expiry",
                "expiration",
                "payment",
                "bank",
                "routing",
                "iban",
                "pin",
            ],
            DataCategory::Booking => &[
                "search",
                "origin",
                "destination",
                "from",
                "to",
                "departure",
                "return",
                "flight",
                "passenger",
                "passengers",
                "seat",
                "fare",
                "trip",
            ],
            DataCategory::Credentials => &["password", "passcode", "otp", "username"],
        }
    }

    const ALL: [DataCategory; 4] = [
        DataCategory::Identity,
        DataCategory::Payment,
        DataCategory::Booking,
        DataCategory::Credentials,
    ];
}

/// A threat enabled by one captured data category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Threat {
    pub category: DataCategory,
    pub description: &'static str,
}

/// Result of scoring a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: u8,
    /// Categories present in the captured data
    pub categories: BTreeSet<DataCategory>,
    pub threats: Vec<Threat>,
    pub time_to_exposure: &'static str,
    pub recommendations: Vec<&'static str>,
}

impl RiskAssessment {
    pub fn has(&self, category: DataCategory) -> bool {
        self.categories.contains(&category)
    }
}

/// Split a field name into lowercase word tokens.
///
/// `payment_cvv`, `payment-cvv`, `Payment CVV` and `paymentCvv` all yield
/// `["payment", "cvv"]`.
pub fn tokenize(field_name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in field_name.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Categories a single field name belongs to.
pub fn categorize(field_name: &str) -> BTreeSet<DataCategory> {
    let tokens = tokenize(field_name);
    let joined = tokens.concat();
    DataCategory::ALL
        .into_iter()
        .filter(|category| {
            category
                .keywords()
                .iter()
                .any(|kw| tokens.iter().any(|t| t.as_str() == *kw) || joined == *kw)
        })
        .collect()
}

/// Score a set of captured fields.
pub fn assess(fields: &[CapturedField], flow_completed: bool) -> RiskAssessment {
    let categories: BTreeSet<DataCategory> = fields
        .iter()
        .flat_map(|f| categorize(&f.field_name))
        .collect();

    let identity = categories.contains(&DataCategory::Identity);
    let payment = categories.contains(&DataCategory::Payment);
    let booking = categories.contains(&DataCategory::Booking);

    let (level, score) = if flow_completed && identity && payment && booking {
        (RiskLevel::Critical, 95)
    } else if payment && identity {
        (RiskLevel::High, if booking { 85 } else { 75 })
    } else if identity || payment {
        (RiskLevel::Medium, 55)
    } else {
        (RiskLevel::Low, 30)
    };

    let threats = categories.iter().flat_map(|c| threats_for(*c)).collect();
    let recommendations = categories.iter().map(|c| recommendation_for(*c)).collect();

    RiskAssessment {
        level,
        score,
        time_to_exposure: time_to_exposure(&categories),
        categories,
        threats,
        recommendations,
    }
}

/// Score a session, taking flow completion from its progress.
pub fn assess_session(session: &Session, fields: &[CapturedField]) -> RiskAssessment {
    assess(fields, session.reached_final_step())
}

fn threats_for(category: DataCategory) -> Vec<Threat> {
    let descriptions: &[&'static str] = match category {
        DataCategory::Payment => &[
            "Card-not-present fraud with the captured card details",
            "Unauthorized charges and account draining",
        ],
        DataCategory::Identity => &[
            "Identity theft using the captured personal details",
            "Targeted phishing that quotes the captured personal details",
        ],
        DataCategory::Booking => &["Itinerary exposure revealing when the traveler is away"],
        DataCategory::Credentials => &["Account takeover through reused credentials"],
    };
    descriptions
        .iter()
        .map(|description| Threat {
            category,
            description: *description,
        })
        .collect()
}

fn recommendation_for(category: DataCategory) -> &'static str {
    match category {
        DataCategory::Payment => "Call the card issuer, block the card and review recent charges",
        DataCategory::Identity => "Watch for account openings and messages that quote your details",
        DataCategory::Booking => "Keep travel plans off unverified sites and social media",
        DataCategory::Credentials => "Change the password everywhere it was reused and enable 2FA",
    }
}

fn time_to_exposure(categories: &BTreeSet<DataCategory>) -> &'static str {
    if categories.contains(&DataCategory::Payment) {
        "minutes"
    } else if categories.contains(&DataCategory::Credentials) {
        "hours"
    } else if categories.contains(&DataCategory::Identity) {
        "days"
    } else if categories.contains(&DataCategory::Booking) {
        "weeks"
    } else {
        "none"
    }
}
