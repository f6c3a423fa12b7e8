//! Worker outcome classification
//!
//! A prioritized rule table over the worker's combined output, exit
//! code, and timeout flag. Order matters: a rate-limited run often
//! also prints an error line, and the rate limit must win so the loop
//! waits instead of burning a retry. Pure functions, testable without
//! running anything.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::ratelimit::is_rate_limit_message;
use crate::worker::WorkerOutcome;

/// What went wrong, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Worker hit the wall-clock timeout
    Timeout,
    /// Provider rate limit; wait, do not retry-count
    RateLimit,
    /// Work finished but verification rejected it
    VerificationFailed,
    /// Syntax or compile errors in produced code
    CodeError,
    /// Worker could not find the task it was given
    TaskNotFound,
    /// Worker gave up after its internal iteration cap
    MaxIterations,
    /// Any other nonzero exit
    Crash,
}

/// Hint for the loop's routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestedAction {
    Retry,
    WaitForReset,
    Skip,
}

/// One classified failure
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub kind: FailureKind,
    pub recoverable: bool,
    pub suggested_action: SuggestedAction,
}

struct Rule {
    kind: FailureKind,
    recoverable: bool,
    suggested_action: SuggestedAction,
    pattern: Regex,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rule = |kind, recoverable, suggested_action, pattern: &str| Rule {
            kind,
            recoverable,
            suggested_action,
            pattern: Regex::new(pattern).expect("classification pattern is valid"),
        };
        vec![
            rule(
                FailureKind::VerificationFailed,
                true,
                SuggestedAction::Retry,
                r"(?i)verification failed|acceptance criteria not met|tests? failed|validation failed",
            ),
            rule(
                FailureKind::CodeError,
                true,
                SuggestedAction::Retry,
                r"(?i)syntax error|compil(e|ation) (error|failed)|error\[E\d+\]|cannot find (symbol|module|crate)",
            ),
            rule(
                FailureKind::TaskNotFound,
                false,
                SuggestedAction::Skip,
                r"(?i)task not found|no such task|unknown task",
            ),
            rule(
                FailureKind::MaxIterations,
                true,
                SuggestedAction::Retry,
                r"(?i)max(imum)? iterations (reached|exceeded)",
            ),
        ]
    })
}

/// Classify a worker outcome. `None` means the run succeeded.
pub fn classify(outcome: &WorkerOutcome) -> Option<Classification> {
    // Timeout and rate limit outrank everything the output says
    if outcome.timed_out {
        debug!("classify: timed out");
        return Some(Classification {
            kind: FailureKind::Timeout,
            recoverable: true,
            suggested_action: SuggestedAction::Retry,
        });
    }
    if is_rate_limit_message(&outcome.combined_output) {
        debug!("classify: rate limited");
        return Some(Classification {
            kind: FailureKind::RateLimit,
            recoverable: true,
            suggested_action: SuggestedAction::WaitForReset,
        });
    }

    if outcome.exit_code == 0 {
        return None;
    }

    for rule in rules() {
        if rule.pattern.is_match(&outcome.combined_output) {
            debug!(kind = ?rule.kind, "classify: matched rule");
            return Some(Classification {
                kind: rule.kind,
                recoverable: rule.recoverable,
                suggested_action: rule.suggested_action,
            });
        }
    }

    debug!(exit_code = outcome.exit_code, "classify: unrecognized crash");
    Some(Classification {
        kind: FailureKind::Crash,
        recoverable: true,
        suggested_action: SuggestedAction::Retry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(output: &str, exit_code: i32, timed_out: bool) -> WorkerOutcome {
        WorkerOutcome {
            combined_output: output.to_string(),
            exit_code,
            timed_out,
        }
    }

    #[test]
    fn test_clean_exit_is_success() {
        assert!(classify(&outcome("all done", 0, false)).is_none());
    }

    #[test]
    fn test_timeout_outranks_everything() {
        let c = classify(&outcome("You've hit your limit. tests failed", 1, true)).unwrap();
        assert_eq!(c.kind, FailureKind::Timeout);
        assert!(c.recoverable);
    }

    #[test]
    fn test_rate_limit_outranks_error_patterns() {
        let c = classify(&outcome("syntax error... You've hit your limit.", 1, false)).unwrap();
        assert_eq!(c.kind, FailureKind::RateLimit);
        assert_eq!(c.suggested_action, SuggestedAction::WaitForReset);
    }

    #[test]
    fn test_rate_limit_detected_even_on_clean_exit() {
        let c = classify(&outcome("You've hit your limit. resets 4pm (UTC)", 0, false)).unwrap();
        assert_eq!(c.kind, FailureKind::RateLimit);
    }

    #[test]
    fn test_verification_failure_beats_code_error() {
        let c = classify(&outcome("verification failed: syntax error in test", 1, false)).unwrap();
        assert_eq!(c.kind, FailureKind::VerificationFailed);
    }

    #[test]
    fn test_task_not_found_is_non_recoverable() {
        let c = classify(&outcome("fatal: task not found in queue", 2, false)).unwrap();
        assert_eq!(c.kind, FailureKind::TaskNotFound);
        assert!(!c.recoverable);
        assert_eq!(c.suggested_action, SuggestedAction::Skip);
    }

    #[test]
    fn test_max_iterations_is_recoverable() {
        let c = classify(&outcome("aborting: max iterations reached", 1, false)).unwrap();
        assert_eq!(c.kind, FailureKind::MaxIterations);
        assert!(c.recoverable);
    }

    #[test]
    fn test_unrecognized_nonzero_exit_is_crash() {
        let c = classify(&outcome("Segmentation fault", 139, false)).unwrap();
        assert_eq!(c.kind, FailureKind::Crash);
        assert!(c.recoverable);
    }
}
