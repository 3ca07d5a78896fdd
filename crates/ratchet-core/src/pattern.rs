//! Failure-trajectory classification over the tail of an attempt ledger.
//!
//! Every rule is evaluated independently and may emit a [`PatternSignal`];
//! the [`Verdict`] is then derived from the signal set by a fixed priority
//! order (see [`derive_verdict`]).

use crate::ledger::AttemptLedger;
use crate::similarity::similarity;
use crate::types::{Attempt, Decision, PatternSignal, SignalKind, Verdict};
use serde::{Deserialize, Serialize};

/// Loop cutoff for [`similarity`] between consecutive error lists.
pub const LOOP_SIMILARITY: f64 = 0.85;
/// Below this, consecutive error lists count as "different errors".
pub const DIVERGENCE_SIMILARITY: f64 = 0.5;
/// Attempts considered by the trend rules.
const TREND_WINDOW: usize = 3;
/// Timeout-mentioning agent failures needed for `TimeoutHeavy`.
const TIMEOUT_MIN_COUNT: usize = 2;
/// Ledger size at which a run with no clear signal is given up.
pub const ATTEMPT_BUDGET: usize = 3;

/// Signals plus the overall verdict for one ledger state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternAnalysis {
    pub signals: Vec<PatternSignal>,
    pub verdict: Verdict,
}

impl PatternAnalysis {
    pub fn signal(&self, kind: SignalKind) -> Option<&PatternSignal> {
        self.signals.iter().find(|s| s.kind == kind)
    }

    pub fn has(&self, kind: SignalKind) -> bool {
        self.signal(kind).is_some()
    }
}

/// Classify the ledger. Pure; never fails.
pub fn analyze(ledger: &AttemptLedger) -> PatternAnalysis {
    let mut signals = Vec::new();
    signals.extend(detect_loop(ledger));
    signals.extend(detect_stall(ledger));
    signals.extend(detect_timeouts(ledger));
    signals.extend(detect_progress(ledger));
    let verdict = derive_verdict(&signals, ledger.count());
    PatternAnalysis { signals, verdict }
}

fn tested(attempts: &[Attempt]) -> Vec<&Attempt> {
    attempts
        .iter()
        .filter(|a| a.test_outcome.is_some())
        .collect()
}

/// Error counts for the tested attempts among the last three, oldest first.
/// `None` when fewer than two of them ran tests.
fn trend_window(ledger: &AttemptLedger) -> Option<Vec<&Attempt>> {
    let window = tested(ledger.last_n(TREND_WINDOW));
    (window.len() >= 2).then_some(window)
}

fn detect_loop(ledger: &AttemptLedger) -> Option<PatternSignal> {
    let all = tested(ledger.attempts());
    let [.., prev, last] = all.as_slice() else {
        return None;
    };
    let sim = similarity(prev.errors(), last.errors());
    (sim > LOOP_SIMILARITY).then(|| PatternSignal {
        kind: SignalKind::LoopDetected,
        confidence: sim,
        description: format!(
            "attempts {} and {} failed with {:.0}% similar errors",
            prev.index,
            last.index,
            sim * 100.0
        ),
        recommendation: "try a fundamentally different approach".into(),
    })
}

fn detect_stall(ledger: &AttemptLedger) -> Option<PatternSignal> {
    let window = trend_window(ledger)?;
    let counts: Vec<usize> = window.iter().map(|a| a.errors().len()).collect();
    let first = counts[0];
    let last = counts[counts.len() - 1];

    let non_decreasing = counts.windows(2).all(|w| w[0] <= w[1]);
    if non_decreasing && last > first {
        return Some(PatternSignal {
            kind: SignalKind::Stalled,
            confidence: 0.8,
            description: format!("error count increasing ({})", join_counts(&counts)),
            recommendation: "break the task into smaller steps".into(),
        });
    }
    if first > 0 && counts.iter().all(|&c| c == first) {
        return Some(PatternSignal {
            kind: SignalKind::Stalled,
            confidence: 0.7,
            description: format!("no reduction in errors ({})", join_counts(&counts)),
            recommendation: "break the task into smaller steps".into(),
        });
    }
    None
}

fn detect_timeouts(ledger: &AttemptLedger) -> Option<PatternSignal> {
    let count = ledger
        .attempts()
        .iter()
        .filter(|a| {
            a.agent_outcome
                .error_message
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains("timeout"))
        })
        .count();
    (count >= TIMEOUT_MIN_COUNT).then(|| PatternSignal {
        kind: SignalKind::TimeoutHeavy,
        confidence: 0.9,
        description: format!("{count} attempts ended in a timeout"),
        recommendation: "optimize hot paths or add caching".into(),
    })
}

fn detect_progress(ledger: &AttemptLedger) -> Option<PatternSignal> {
    let window = trend_window(ledger)?;
    let counts: Vec<usize> = window.iter().map(|a| a.errors().len()).collect();
    let first = counts[0];
    let last = counts[counts.len() - 1];

    let strictly_decreasing = counts.windows(2).all(|w| w[0] > w[1]);
    if strictly_decreasing && first > 0 {
        let confidence = (0.3 + (1.0 - last as f64 / first as f64)).min(1.0);
        return Some(PatternSignal {
            kind: SignalKind::Improving,
            confidence,
            description: format!("error count decreasing ({})", join_counts(&counts)),
            recommendation: "continue with the current approach".into(),
        });
    }

    let prev = window[window.len() - 2];
    let curr = window[window.len() - 1];
    let sim = similarity(prev.errors(), curr.errors());
    (sim < DIVERGENCE_SIMILARITY).then(|| PatternSignal {
        kind: SignalKind::Diverging,
        confidence: 1.0 - sim,
        description: "different errors than the previous attempt, still exploring".into(),
        recommendation: "keep exploring but watch for regressions".into(),
    })
}

fn join_counts(counts: &[usize]) -> String {
    counts
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Priority-ordered verdict rules. The first matching rule wins.
pub fn derive_verdict(signals: &[PatternSignal], attempt_count: usize) -> Verdict {
    let find = |kind: SignalKind| signals.iter().find(|s| s.kind == kind);

    if find(SignalKind::LoopDetected).is_some_and(|s| s.confidence > 0.8) {
        return verdict(Decision::Rollback, "repeating error pattern detected");
    }
    if find(SignalKind::Stalled).is_some_and(|s| s.confidence > 0.7)
        && attempt_count >= ATTEMPT_BUDGET
    {
        return verdict(Decision::Rollback, "no progress after multiple attempts");
    }
    if find(SignalKind::TimeoutHeavy).is_some() {
        return verdict(
            Decision::ManualIntervention,
            "repeated timeouts; task may need decomposition",
        );
    }
    if find(SignalKind::Improving).is_some() || find(SignalKind::Diverging).is_some() {
        return verdict(Decision::Continue, "progress or active exploration detected");
    }
    if attempt_count < ATTEMPT_BUDGET {
        return verdict(Decision::Continue, "within retry budget");
    }
    verdict(
        Decision::Rollback,
        "maximum attempts reached without clear improvement",
    )
}

fn verdict(decision: Decision, reasoning: &str) -> Verdict {
    Verdict {
        decision,
        reasoning: reasoning.to_string(),
    }
}
