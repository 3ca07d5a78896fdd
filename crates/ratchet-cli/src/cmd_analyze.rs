use anyhow::{Context, Result};
use ratchet_conductor::runner::report::load_report;
use ratchet_core::{rollback, AttemptLedger};
use std::path::Path;

/// Execute `ratchet analyze <name>`
pub fn analyze(root: &Path, name: &str) -> Result<()> {
    let report =
        load_report(root, name)?.ok_or_else(|| anyhow::anyhow!("no report for task \"{name}\""))?;
    let ledger = AttemptLedger::from_attempts(report.result.attempts.iter().cloned())
        .with_context(|| format!("report for \"{name}\" has an invalid attempt sequence"))?;
    let policy = report.config.policy();
    let analysis = policy.analyze(&ledger);

    println!("Task: {} ({} attempts)", name, ledger.count());
    if analysis.signals.is_empty() {
        println!("\nSignals: none");
    } else {
        println!("\nSignals:");
        for s in &analysis.signals {
            println!(
                "  {:?} ({:.2}): {}; {}",
                s.kind, s.confidence, s.description, s.recommendation
            );
        }
    }
    println!(
        "\nVerdict: {:?} ({})",
        analysis.verdict.decision, analysis.verdict.reasoning
    );

    let decision = policy.decide(&ledger);
    println!(
        "Retry: {} / rollback: {} ({})",
        yes_no(decision.should_retry),
        yes_no(decision.should_rollback),
        decision.reason
    );

    let plan = rollback::decide(&ledger, &report.result.snapshots);
    if plan.should_rollback {
        println!(
            "Rollback target: {} (confidence {:.2})",
            plan.target_snapshot_id.as_deref().unwrap_or("none"),
            plan.confidence
        );
    }

    let feedback = policy.generate_feedback(&ledger);
    if !feedback.is_empty() {
        println!("\nFeedback for the next attempt:\n");
        for line in feedback.lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
