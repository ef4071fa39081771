//! Time-based stage rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::models::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRuleConfig {
    pub inbox_to_documents: u32,
    pub documents_to_archive: u32,
    pub inbox_to_archive: u32,
}

impl TimeRuleConfig {
    pub fn validate(&self) -> Result<(), FlowError> {
        let TimeRuleConfig {
            inbox_to_documents,
            documents_to_archive,
            inbox_to_archive,
        } = *self;
        if inbox_to_documents == 0 || documents_to_archive == 0 || inbox_to_archive == 0 {
            return Err(FlowError::InvalidTimeRuleConfig(
                "day thresholds must be positive".into(),
            ));
        }
        if documents_to_archive <= inbox_to_documents {
            return Err(FlowError::InvalidTimeRuleConfig(format!(
                "documents_to_archive ({documents_to_archive}) must exceed inbox_to_documents ({inbox_to_documents})"
            )));
        }
        if inbox_to_archive <= inbox_to_documents.max(documents_to_archive) {
            return Err(FlowError::InvalidTimeRuleConfig(format!(
                "inbox_to_archive ({inbox_to_archive}) must exceed both other thresholds"
            )));
        }
        Ok(())
    }
}

/// The rules in precedence order. The first one that matches decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRule {
    /// Unprocessed Inbox files skip Documents entirely.
    InboxExpired,
    InboxActive,
    DocumentsIdle,
}

const PRECEDENCE: [TimeRule; 3] = [
    TimeRule::InboxExpired,
    TimeRule::InboxActive,
    TimeRule::DocumentsIdle,
];

impl TimeRule {
    pub fn target(&self) -> Stage {
        match self {
            TimeRule::InboxExpired | TimeRule::DocumentsIdle => Stage::Archive,
            TimeRule::InboxActive => Stage::Documents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDecision {
    Move { to: Stage, rule: TimeRule },
    NoChange,
}

#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub stage: Stage,
    pub last_access: DateTime<Utc>,
    /// `None` when neither birth time nor a recorded collection time exists.
    pub collected: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeRulePolicy {
    config: TimeRuleConfig,
}

impl TimeRulePolicy {
    /// Re-checks the thresholds even though config loading already did.
    pub fn new(config: TimeRuleConfig) -> Result<Self, FlowError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn decide(&self, ctx: &RuleContext) -> StageDecision {
        PRECEDENCE
            .iter()
            .find(|rule| self.matches(**rule, ctx))
            .map(|rule| StageDecision::Move {
                to: rule.target(),
                rule: *rule,
            })
            .unwrap_or(StageDecision::NoChange)
    }

    fn matches(&self, rule: TimeRule, ctx: &RuleContext) -> bool {
        let days = |n: u32| Duration::days(i64::from(n));
        match rule {
            TimeRule::InboxExpired => {
                // Missing collection time counts as "collected now" so the
                // file is never archived early.
                let collected = ctx.collected.unwrap_or(ctx.now);
                ctx.stage == Stage::Inbox
                    && ctx.now - collected >= days(self.config.inbox_to_archive)
            }
            TimeRule::InboxActive => {
                ctx.stage == Stage::Inbox
                    && ctx.now - ctx.last_access <= days(self.config.inbox_to_documents)
            }
            TimeRule::DocumentsIdle => {
                ctx.stage == Stage::Documents
                    && ctx.now - ctx.last_access >= days(self.config.documents_to_archive)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TimeRulePolicy {
        TimeRulePolicy::new(TimeRuleConfig {
            inbox_to_documents: 7,
            documents_to_archive: 30,
            inbox_to_archive: 90,
        })
        .unwrap()
    }

    fn ctx(stage: Stage, access_days: i64, collected_days: Option<i64>) -> RuleContext {
        let now = Utc::now();
        RuleContext {
            stage,
            last_access: now - Duration::days(access_days),
            collected: collected_days.map(|d| now - Duration::days(d)),
            now,
        }
    }

    #[test]
    fn expired_inbox_file_goes_to_archive_even_if_recently_used() {
        let decision = policy().decide(&ctx(Stage::Inbox, 1, Some(91)));
        assert_eq!(
            decision,
            StageDecision::Move {
                to: Stage::Archive,
                rule: TimeRule::InboxExpired
            }
        );
    }

    #[test]
    fn recently_used_inbox_file_goes_to_documents() {
        let decision = policy().decide(&ctx(Stage::Inbox, 2, Some(10)));
        assert_eq!(
            decision,
            StageDecision::Move {
                to: Stage::Documents,
                rule: TimeRule::InboxActive
            }
        );
    }

    #[test]
    fn untouched_inbox_file_stays() {
        assert_eq!(
            policy().decide(&ctx(Stage::Inbox, 20, Some(30))),
            StageDecision::NoChange
        );
    }

    #[test]
    fn missing_collection_time_never_archives() {
        assert_eq!(
            policy().decide(&ctx(Stage::Inbox, 200, None)),
            StageDecision::NoChange
        );
    }

    #[test]
    fn idle_documents_are_archived() {
        assert_eq!(
            policy().decide(&ctx(Stage::Documents, 30, None)),
            StageDecision::Move {
                to: Stage::Archive,
                rule: TimeRule::DocumentsIdle
            }
        );
        assert_eq!(
            policy().decide(&ctx(Stage::Documents, 29, None)),
            StageDecision::NoChange
        );
    }

    #[test]
    fn archive_is_terminal() {
        assert_eq!(
            policy().decide(&ctx(Stage::Archive, 1000, Some(1000))),
            StageDecision::NoChange
        );
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let err = TimeRulePolicy::new(TimeRuleConfig {
            inbox_to_documents: 30,
            documents_to_archive: 7,
            inbox_to_archive: 90,
        })
        .unwrap_err();
        assert!(matches!(err, FlowError::InvalidTimeRuleConfig(_)));

        let err = TimeRulePolicy::new(TimeRuleConfig {
            inbox_to_documents: 7,
            documents_to_archive: 30,
            inbox_to_archive: 30,
        })
        .unwrap_err();
        assert!(matches!(err, FlowError::InvalidTimeRuleConfig(_)));
    }
}
