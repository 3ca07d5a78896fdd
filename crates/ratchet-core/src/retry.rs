use crate::ledger::AttemptLedger;
use crate::pattern::{analyze, PatternAnalysis};
use crate::similarity::edit_similarity;
use crate::types::{Attempt, Decision, SignalKind};
use serde::{Deserialize, Serialize};

/// Joined error blobs at or above this edit similarity count as unchanged.
pub const UNCHANGED_OUTPUT_SIMILARITY: f64 = 0.8;

/// Retry budget for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Attempts required before a classifier-driven stop is honoured.
    #[serde(default = "default_rollback_threshold")]
    pub rollback_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            rollback_threshold: default_rollback_threshold(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_rollback_threshold() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub should_rollback: bool,
    pub reason: String,
}

impl RetryDecision {
    fn retry(reason: impl Into<String>) -> Self {
        Self {
            should_retry: true,
            should_rollback: false,
            reason: reason.into(),
        }
    }

    fn stop(reason: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            should_rollback: true,
            reason: reason.into(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, rollback_threshold: u32) -> Self {
        Self {
            max_attempts,
            rollback_threshold,
        }
    }

    /// Decide whether another attempt should be made.
    pub fn decide(&self, ledger: &AttemptLedger) -> RetryDecision {
        let count = ledger.count();
        if count == 0 {
            return RetryDecision::retry("first attempt");
        }
        if count >= self.max_attempts as usize {
            return RetryDecision::stop("maximum attempts reached");
        }

        let analysis = analyze(ledger);
        match analysis.verdict.decision {
            // ManualIntervention surfaces as a stop here; RollbackEngine keeps
            // the distinction.
            Decision::Rollback | Decision::ManualIntervention
                if count >= self.rollback_threshold as usize =>
            {
                RetryDecision::stop(analysis.verdict.reasoning)
            }
            _ => RetryDecision::retry(format!("retry {}/{}", count + 1, self.max_attempts)),
        }
    }

    /// Instruction text handed to the change producer for the next attempt.
    ///
    /// Empty when nothing has been attempted yet.
    pub fn generate_feedback(&self, ledger: &AttemptLedger) -> String {
        let Some(last) = ledger.last() else {
            return String::new();
        };
        let analysis = analyze(ledger);
        let mut out = String::new();

        let errors = failure_lines(last);
        if errors.is_empty() {
            out.push_str("The previous attempt did not pass, but reported no error details.\n");
        } else {
            out.push_str("The previous attempt failed with these errors:\n");
            for (i, err) in errors.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, err));
            }
        }

        if self.output_unchanged(ledger) {
            out.push_str(
                "\nThe failure output is almost identical to the attempt before it; \
                 the last change did not address the cause.\n",
            );
        }

        out.push_str(&format!(
            "\nThis is attempt {} of {}.\n",
            ledger.count() + 1,
            self.max_attempts
        ));

        if analysis.has(SignalKind::LoopDetected) {
            out.push_str(
                "\nWARNING: the same errors keep repeating. Do not patch the previous \
                 approach again; try a fundamentally different approach.\n",
            );
        }
        out
    }

    /// Whether the last two attempts produced nearly the same failure text.
    pub fn output_unchanged(&self, ledger: &AttemptLedger) -> bool {
        let [prev, last] = ledger.last_n(2) else {
            return false;
        };
        let a = failure_lines(prev).join("\n");
        let b = failure_lines(last).join("\n");
        if a.is_empty() && b.is_empty() {
            return false;
        }
        edit_similarity(&a, &b) >= UNCHANGED_OUTPUT_SIMILARITY
    }

    pub fn analyze(&self, ledger: &AttemptLedger) -> PatternAnalysis {
        analyze(ledger)
    }
}

/// Test errors of an attempt, or the agent error when tests were skipped.
fn failure_lines(attempt: &Attempt) -> Vec<String> {
    match &attempt.test_outcome {
        Some(t) => t.error_messages.clone(),
        None => attempt
            .agent_outcome
            .error_message
            .iter()
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentOutcome, TestOutcome};

    fn ledger_with(errors: &[&[&str]]) -> AttemptLedger {
        AttemptLedger::from_attempts(errors.iter().enumerate().map(|(i, errs)| {
            Attempt::new(
                i as u32 + 1,
                AgentOutcome::success(),
                Some(TestOutcome::failed(errs.iter().copied())),
            )
        }))
        .unwrap()
    }

    #[test]
    fn defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.rollback_threshold, 2);
    }

    #[test]
    fn first_attempt() {
        let d = RetryPolicy::default().decide(&AttemptLedger::new());
        assert!(d.should_retry);
        assert!(!d.should_rollback);
        assert_eq!(d.reason, "first attempt");
    }

    #[test]
    fn bounded_by_max_attempts() {
        let policy = RetryPolicy::new(3, 2);
        let cases: [&[&[&str]]; 3] = [
            &[&["a"], &["b c"], &["d"]],
            &[&["x y z", "w"], &["x"], &[]],
            &[&["same"], &["same"], &["same"]],
        ];
        for errors in cases {
            let d = policy.decide(&ledger_with(errors));
            assert!(!d.should_retry);
            assert!(d.should_rollback);
            assert_eq!(d.reason, "maximum attempts reached");
        }
    }

    #[test]
    fn improvement_keeps_retrying() {
        let policy = RetryPolicy::new(5, 2);
        let ledger = ledger_with(&[
            &["e1 one", "e2 two", "e3 three", "e4 four", "e5 five"],
            &["f1 six", "f2 seven", "f3 eight"],
            &["g1 nine"],
        ]);
        let d = policy.decide(&ledger);
        assert!(d.should_retry);
        assert!(!d.should_rollback);
        assert_eq!(d.reason, "retry 4/5");
    }

    #[test]
    fn loop_stops_with_verdict_reason() {
        let policy = RetryPolicy::new(5, 2);
        let ledger = ledger_with(&[&["selector not found"], &["selector not found"]]);
        let d = policy.decide(&ledger);
        assert!(!d.should_retry);
        assert!(d.should_rollback);
        assert_eq!(d.reason, "repeating error pattern detected");
    }

    #[test]
    fn manual_intervention_surfaces_as_rollback() {
        let policy = RetryPolicy::new(5, 2);
        let ledger = AttemptLedger::from_attempts(vec![
            Attempt::new(1, AgentOutcome::failure("agent timeout after 60s"), None),
            Attempt::new(2, AgentOutcome::failure("agent timeout after 60s"), None),
        ])
        .unwrap();
        let d = policy.decide(&ledger);
        assert!(!d.should_retry);
        assert!(d.should_rollback);
        assert!(d.reason.contains("timeouts"));
    }

    #[test]
    fn rollback_threshold_defers_stop() {
        let policy = RetryPolicy::new(5, 3);
        let ledger = ledger_with(&[&["selector not found"], &["selector not found"]]);
        let d = policy.decide(&ledger);
        assert!(d.should_retry);
        assert_eq!(d.reason, "retry 3/5");
    }

    #[test]
    fn feedback_lists_errors_and_attempt_number() {
        let policy = RetryPolicy::default();
        let ledger = ledger_with(&[&["missing semicolon", "unused import"]]);
        let fb = policy.generate_feedback(&ledger);
        assert!(fb.contains("1. missing semicolon"));
        assert!(fb.contains("2. unused import"));
        assert!(fb.contains("attempt 2 of 3"));
        assert!(!fb.contains("WARNING"));
    }

    #[test]
    fn feedback_warns_on_loop() {
        let policy = RetryPolicy::new(5, 2);
        let ledger = ledger_with(&[&["selector not found"], &["selector not found"]]);
        let fb = policy.generate_feedback(&ledger);
        assert!(fb.contains("fundamentally different approach"));
        assert!(fb.contains("almost identical"));
    }

    #[test]
    fn feedback_uses_agent_error_when_tests_skipped() {
        let policy = RetryPolicy::default();
        let ledger = AttemptLedger::from_attempts(vec![Attempt::new(
            1,
            AgentOutcome::failure("agent exited with code 2"),
            None,
        )])
        .unwrap();
        let fb = policy.generate_feedback(&ledger);
        assert!(fb.contains("1. agent exited with code 2"));
    }

    #[test]
    fn feedback_empty_before_first_attempt() {
        assert!(RetryPolicy::default()
            .generate_feedback(&AttemptLedger::new())
            .is_empty());
    }

    #[test]
    fn output_unchanged_uses_edit_distance() {
        let policy = RetryPolicy::default();
        let same = ledger_with(&[&["expected 3 got 4"], &["expected 3 got 5"]]);
        assert!(policy.output_unchanged(&same));
        let different = ledger_with(&[&["expected 3 got 4"], &["panic in worker thread"]]);
        assert!(!policy.output_unchanged(&different));
    }
}
