use crate::ledger::AttemptLedger;
use crate::pattern::analyze;
use crate::types::{Decision, RollbackDecision, SignalKind, SnapshotHistory};

const DECOMPOSE_HINT: &str =
    "task likely needs decomposition into smaller steps; flag for human review";
const DEFAULT_HINT: &str = "review root causes directly";

/// Decide whether to roll back, where to, and what to try instead.
///
/// `target_snapshot_id` is absent when no stable snapshot exists yet even if
/// `should_rollback` is set; callers must treat that as nothing to restore.
pub fn decide<H>(ledger: &AttemptLedger, history: &H) -> RollbackDecision
where
    H: SnapshotHistory + ?Sized,
{
    let analysis = analyze(ledger);
    let target = history.last_stable().map(|s| s.id.clone());

    match analysis.verdict.decision {
        Decision::ManualIntervention => RollbackDecision {
            should_rollback: true,
            target_snapshot_id: target,
            confidence: 0.9,
            alternative_approach: Some(DECOMPOSE_HINT.into()),
        },
        Decision::Rollback => {
            let mut hints: Vec<&str> = Vec::new();
            for signal in &analysis.signals {
                let hint = suggestion(signal.kind);
                if !hints.contains(&hint) {
                    hints.push(hint);
                }
            }
            if hints.is_empty() {
                hints.push(DEFAULT_HINT);
            }
            let alternative = hints
                .iter()
                .map(|h| format!("- {h}"))
                .collect::<Vec<_>>()
                .join("\n");
            RollbackDecision {
                should_rollback: true,
                target_snapshot_id: target,
                confidence: 0.85,
                alternative_approach: Some(alternative),
            }
        }
        Decision::Continue => RollbackDecision {
            should_rollback: false,
            target_snapshot_id: None,
            confidence: 0.7,
            alternative_approach: None,
        },
    }
}

fn suggestion(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::LoopDetected => "try a fundamentally different implementation or library",
        SignalKind::Stalled => "break the task into smaller steps",
        SignalKind::TimeoutHeavy => "optimize hot paths or add caching",
        _ => DEFAULT_HINT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentOutcome, Attempt, Snapshot, TestOutcome};

    fn failing_ledger(errors: &[&[&str]]) -> AttemptLedger {
        AttemptLedger::from_attempts(errors.iter().enumerate().map(|(i, errs)| {
            Attempt::new(
                i as u32 + 1,
                AgentOutcome::success(),
                Some(TestOutcome::failed(errs.iter().copied())),
            )
        }))
        .unwrap()
    }

    fn snap(id: &str, attempt_index: u32, is_stable: bool) -> Snapshot {
        Snapshot {
            id: id.into(),
            attempt_index,
            is_stable,
            created_at: String::new(),
        }
    }

    #[test]
    fn loop_without_stable_snapshot_has_no_target() {
        let ledger = failing_ledger(&[&["selector not found"], &["selector not found"]]);
        let history = vec![snap("c1", 1, false), snap("c2", 2, false)];
        let d = decide(&ledger, &history);
        assert!(d.should_rollback);
        assert_eq!(d.target_snapshot_id, None);
        assert_eq!(d.confidence, 0.85);
        let alt = d.alternative_approach.unwrap();
        assert!(alt.contains("- try a fundamentally different implementation or library"));
    }

    #[test]
    fn rollback_targets_last_stable() {
        let ledger = failing_ledger(&[&["selector not found"], &["selector not found"]]);
        let history = vec![snap("base", 0, true), snap("c1", 1, false), snap("c2", 2, false)];
        let d = decide(&ledger, &history);
        assert_eq!(d.target_snapshot_id.as_deref(), Some("base"));
    }

    #[test]
    fn hints_are_bulleted_and_deduplicated() {
        // Loop + stall (flat count) + three attempts.
        let ledger = failing_ledger(&[&["same err"], &["same err"], &["same err"]]);
        let d = decide(&ledger, &Vec::<Snapshot>::new());
        let alt = d.alternative_approach.unwrap();
        let lines: Vec<&str> = alt.lines().collect();
        assert_eq!(
            lines,
            vec![
                "- try a fundamentally different implementation or library",
                "- break the task into smaller steps",
            ]
        );
    }

    #[test]
    fn no_signals_fall_back_to_default_hint() {
        let ledger = AttemptLedger::from_attempts(
            (1..=3).map(|i| Attempt::new(i, AgentOutcome::failure("exit 1"), None)),
        )
        .unwrap();
        let d = decide(&ledger, &Vec::<Snapshot>::new());
        assert!(d.should_rollback);
        assert_eq!(d.alternative_approach.as_deref(), Some("- review root causes directly"));
    }

    #[test]
    fn manual_intervention() {
        let ledger = AttemptLedger::from_attempts(vec![
            Attempt::new(1, AgentOutcome::failure("agent timeout"), None),
            Attempt::new(2, AgentOutcome::failure("agent timeout"), None),
        ])
        .unwrap();
        let history = vec![snap("s0", 0, true)];
        let d = decide(&ledger, &history);
        assert!(d.should_rollback);
        assert_eq!(d.confidence, 0.9);
        assert_eq!(d.target_snapshot_id.as_deref(), Some("s0"));
        assert!(d.alternative_approach.unwrap().contains("decomposition"));
    }

    #[test]
    fn continue_does_not_roll_back() {
        let ledger = failing_ledger(&[&["a b c d"]]);
        let d = decide(&ledger, &vec![snap("s", 1, true)]);
        assert!(!d.should_rollback);
        assert_eq!(d.confidence, 0.7);
        assert!(d.target_snapshot_id.is_none());
        assert!(d.alternative_approach.is_none());
    }
}
