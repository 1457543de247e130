//! Per-repository outcome recording

use super::releaser::{ReleaseError, ReleaseReport};
use crate::crds::{Condition, ConditionStatus, ConditionType, Repository};
use std::fmt;

/// Appends conditions in processing order and collects the failures.
#[derive(Debug, Default)]
pub struct ConditionTracker {
    conditions: Vec<Condition>,
    errors: ErrorAggregate,
}

impl ConditionTracker {
    /// Start from the conditions of earlier passes.
    pub fn with_history(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            errors: ErrorAggregate::default(),
        }
    }

    pub fn record(&mut self, repo: &Repository, result: &Result<ReleaseReport, ReleaseError>) {
        let condition = match result {
            Ok(report) => Condition {
                condition_type: ConditionType::Release,
                status: ConditionStatus::Success,
                message: format!("released {} at {}", report.address, report.version),
            },
            Err(err) => {
                self.errors.push(format!("{}: {err}", repo.address));
                Condition {
                    condition_type: ConditionType::Release,
                    status: ConditionStatus::Failed,
                    message: format!("failed to release {}: {err}", repo.address),
                }
            }
        };
        self.conditions.push(condition);
    }

    /// Record a failure outside the repository loop.
    pub fn record_other(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.errors.push(message.clone());
        self.conditions.push(Condition {
            condition_type: ConditionType::Other,
            status: ConditionStatus::Failed,
            message,
        });
    }

    pub fn errors(&self) -> &ErrorAggregate {
        &self.errors
    }

    /// Conditions with only the newest `max` kept.
    pub fn into_conditions(self, max: usize) -> Vec<Condition> {
        let mut conditions = self.conditions;
        if conditions.len() > max {
            conditions.drain(..conditions.len() - max);
        }
        conditions
    }
}

/// Every error of a pass; empty means the pass can complete.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorAggregate {
    errors: Vec<String>,
}

impl ErrorAggregate {
    pub fn push(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

impl fmt::Display for ErrorAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::ReleaseAction;
    use crate::tasks::git::GitError;

    fn repo(address: &str) -> Repository {
        Repository {
            name: "r".to_string(),
            address: address.to_string(),
            ..Repository::default()
        }
    }

    fn report(address: &str) -> ReleaseReport {
        ReleaseReport {
            repository: "r".to_string(),
            address: address.to_string(),
            version: "v1.0.0".to_string(),
            action: ReleaseAction::Tag,
            tag_created: true,
            release: None,
        }
    }

    fn clone_failure(address: &str) -> ReleaseError {
        ReleaseError::Clone {
            address: address.to_string(),
            source: GitError::Failed {
                command: "clone".to_string(),
                stderr: "not found".to_string(),
            },
        }
    }

    #[test]
    fn test_records_in_order() {
        let mut tracker = ConditionTracker::default();
        let a = repo("https://github.com/org/a");
        let b = repo("https://github.com/org/b");

        tracker.record(&a, &Err(clone_failure(&a.address)));
        tracker.record(&b, &Ok(report(&b.address)));

        assert_eq!(tracker.errors().len(), 1);
        assert!(tracker.errors().to_string().contains("not found"));

        let conditions = tracker.into_conditions(100);
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].status, ConditionStatus::Failed);
        assert!(conditions[0]
            .message
            .starts_with("failed to release https://github.com/org/a: "));
        assert_eq!(conditions[1].status, ConditionStatus::Success);
        assert_eq!(
            conditions[1].message,
            "released https://github.com/org/b at v1.0.0"
        );
    }

    #[test]
    fn test_other_failure_and_history_cap() {
        let history = (0..5)
            .map(|i| Condition {
                condition_type: ConditionType::Release,
                status: ConditionStatus::Success,
                message: format!("old {i}"),
            })
            .collect();
        let mut tracker = ConditionTracker::with_history(history);
        assert!(tracker.errors().is_empty());

        tracker.record_other("gitops write-back failed");
        assert!(!tracker.errors().is_empty());

        let conditions = tracker.into_conditions(3);
        assert_eq!(conditions.len(), 3);
        assert_eq!(conditions[0].message, "old 3");
        assert_eq!(conditions[2].condition_type, ConditionType::Other);
        assert_eq!(conditions[2].status, ConditionStatus::Failed);
    }
}
