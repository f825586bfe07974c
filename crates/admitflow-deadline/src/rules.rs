//! Rule catalog — the immutable derivation table loaded at startup.
//!
//! Maps (deadline kind, trigger event) to offsets and hardness. Built once
//! through a validating builder and injected, so tests can run with custom
//! rule sets.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use admitflow_core::error::{AdmitflowError, Result};

/// What a deadline obligates the applicant to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    /// Submit required documents for review.
    DocumentSubmission,
    /// Accept or decline an extended offer.
    EnrollmentConfirmation,
    /// Pay the enrollment deposit.
    Deposit,
    /// Confirm attendance for a scheduled interview.
    InterviewConfirmation,
}

impl DeadlineKind {
    /// Stock reminder/notice wording for this kind.
    pub fn default_description(&self) -> &'static str {
        match self {
            DeadlineKind::DocumentSubmission => "Submit required application documents",
            DeadlineKind::EnrollmentConfirmation => "Confirm enrollment for the pending offer",
            DeadlineKind::Deposit => "Pay the enrollment deposit",
            DeadlineKind::InterviewConfirmation => "Confirm your interview slot",
        }
    }
}

impl std::fmt::Display for DeadlineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeadlineKind::DocumentSubmission => write!(f, "document_submission"),
            DeadlineKind::EnrollmentConfirmation => write!(f, "enrollment_confirmation"),
            DeadlineKind::Deposit => write!(f, "deposit"),
            DeadlineKind::InterviewConfirmation => write!(f, "interview_confirmation"),
        }
    }
}

impl FromStr for DeadlineKind {
    type Err = AdmitflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "document_submission" => Ok(DeadlineKind::DocumentSubmission),
            "enrollment_confirmation" => Ok(DeadlineKind::EnrollmentConfirmation),
            "deposit" => Ok(DeadlineKind::Deposit),
            "interview_confirmation" => Ok(DeadlineKind::InterviewConfirmation),
            other => Err(AdmitflowError::Validation(format!(
                "unknown deadline kind '{other}'"
            ))),
        }
    }
}

/// A named pipeline occurrence that can derive deadlines automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    ApplicationSubmitted,
    InterviewInvited,
    OfferExtended,
    EnrollmentConfirmed,
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerEvent::ApplicationSubmitted => write!(f, "application_submitted"),
            TriggerEvent::InterviewInvited => write!(f, "interview_invited"),
            TriggerEvent::OfferExtended => write!(f, "offer_extended"),
            TriggerEvent::EnrollmentConfirmed => write!(f, "enrollment_confirmed"),
        }
    }
}

impl FromStr for TriggerEvent {
    type Err = AdmitflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "application_submitted" => Ok(TriggerEvent::ApplicationSubmitted),
            "interview_invited" => Ok(TriggerEvent::InterviewInvited),
            "offer_extended" => Ok(TriggerEvent::OfferExtended),
            "enrollment_confirmed" => Ok(TriggerEvent::EnrollmentConfirmed),
            other => Err(AdmitflowError::Validation(format!(
                "unknown trigger event '{other}'"
            ))),
        }
    }
}

/// One row of the derivation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineRule {
    pub kind: DeadlineKind,
    pub trigger_event: TriggerEvent,
    /// Days between the trigger and the due date.
    pub offset_days: i64,
    /// Days before the due date at which reminders fire, descending.
    pub reminder_offsets_days: Vec<i64>,
    /// Hard deadlines escalate on expiry; soft ones only notify.
    pub is_hard: bool,
    /// Automatic rules materialize on trigger events without operator input.
    pub is_automatic: bool,
}

/// Immutable lookup table over validated rules.
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    rules: Vec<DeadlineRule>,
}

impl RuleCatalog {
    /// All rules matching a trigger event. Empty is a valid answer.
    pub fn rules_for(&self, event: TriggerEvent) -> Vec<&DeadlineRule> {
        self.rules
            .iter()
            .filter(|r| r.trigger_event == event)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The stock admissions rule set.
    pub fn default_catalog() -> Result<RuleCatalog> {
        RuleCatalogBuilder::new()
            .rule(DeadlineRule {
                kind: DeadlineKind::DocumentSubmission,
                trigger_event: TriggerEvent::ApplicationSubmitted,
                offset_days: 30,
                reminder_offsets_days: vec![14, 7, 3, 1],
                is_hard: false,
                is_automatic: true,
            })?
            .rule(DeadlineRule {
                kind: DeadlineKind::InterviewConfirmation,
                trigger_event: TriggerEvent::InterviewInvited,
                offset_days: 5,
                reminder_offsets_days: vec![3, 1],
                is_hard: false,
                is_automatic: true,
            })?
            .rule(DeadlineRule {
                kind: DeadlineKind::EnrollmentConfirmation,
                trigger_event: TriggerEvent::OfferExtended,
                offset_days: 14,
                reminder_offsets_days: vec![7, 3, 1],
                is_hard: true,
                is_automatic: true,
            })?
            .rule(DeadlineRule {
                kind: DeadlineKind::Deposit,
                trigger_event: TriggerEvent::EnrollmentConfirmed,
                offset_days: 21,
                reminder_offsets_days: vec![14, 7, 1],
                is_hard: true,
                is_automatic: true,
            })
            .map(RuleCatalogBuilder::build)
    }
}

/// Validating builder — bad offsets never reach the catalog.
#[derive(Debug, Default)]
pub struct RuleCatalogBuilder {
    rules: Vec<DeadlineRule>,
}

impl RuleCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, rejecting invalid offsets up front.
    pub fn rule(mut self, mut rule: DeadlineRule) -> Result<Self> {
        if rule.offset_days < 0 {
            return Err(AdmitflowError::Validation(format!(
                "rule {}/{}: offset_days must be non-negative, got {}",
                rule.kind, rule.trigger_event, rule.offset_days
            )));
        }
        for offset in &rule.reminder_offsets_days {
            if *offset <= 0 || *offset >= rule.offset_days {
                return Err(AdmitflowError::Validation(format!(
                    "rule {}/{}: reminder offset {} must be within (0, {})",
                    rule.kind, rule.trigger_event, offset, rule.offset_days
                )));
            }
        }
        // Normalize: descending, no duplicates
        rule.reminder_offsets_days.sort_unstable_by(|a, b| b.cmp(a));
        rule.reminder_offsets_days.dedup();
        self.rules.push(rule);
        Ok(self)
    }

    pub fn build(self) -> RuleCatalog {
        RuleCatalog { rules: self.rules }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> DeadlineRule {
        DeadlineRule {
            kind: DeadlineKind::DocumentSubmission,
            trigger_event: TriggerEvent::ApplicationSubmitted,
            offset_days: 30,
            reminder_offsets_days: vec![14, 7, 3, 1],
            is_hard: true,
            is_automatic: true,
        }
    }

    #[test]
    fn test_rejects_negative_offset() {
        let mut rule = sample_rule();
        rule.offset_days = -1;
        assert!(RuleCatalogBuilder::new().rule(rule).is_err());
    }

    #[test]
    fn test_rejects_reminder_at_or_past_due() {
        let mut rule = sample_rule();
        rule.reminder_offsets_days = vec![30];
        assert!(RuleCatalogBuilder::new().rule(rule.clone()).is_err());
        rule.reminder_offsets_days = vec![45];
        assert!(RuleCatalogBuilder::new().rule(rule.clone()).is_err());
        rule.reminder_offsets_days = vec![0];
        assert!(RuleCatalogBuilder::new().rule(rule).is_err());
    }

    #[test]
    fn test_lookup_empty_is_valid() {
        let catalog = RuleCatalogBuilder::new().build();
        assert!(catalog.rules_for(TriggerEvent::OfferExtended).is_empty());
    }

    #[test]
    fn test_offsets_normalized_descending() {
        let mut rule = sample_rule();
        rule.reminder_offsets_days = vec![3, 14, 7, 7, 1];
        let catalog = RuleCatalogBuilder::new().rule(rule).unwrap().build();
        let rules = catalog.rules_for(TriggerEvent::ApplicationSubmitted);
        assert_eq!(rules[0].reminder_offsets_days, vec![14, 7, 3, 1]);
    }

    #[test]
    fn test_default_catalog_builds() {
        let catalog = RuleCatalog::default_catalog().unwrap();
        assert_eq!(catalog.len(), 4);
        let rules = catalog.rules_for(TriggerEvent::EnrollmentConfirmed);
        assert_eq!(rules.len(), 1);
        assert!(rules[0].is_hard);
        assert_eq!(rules[0].kind, DeadlineKind::Deposit);
    }
}
