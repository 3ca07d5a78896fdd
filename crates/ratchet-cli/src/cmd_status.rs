use anyhow::Result;
use ratchet_conductor::runner::report::{list_reports, load_report, RunReport};
use std::path::Path;

/// Execute `ratchet status [name]`
pub fn status(root: &Path, name: Option<&str>, json: bool) -> Result<()> {
    let names = match name {
        Some(n) => vec![n.to_string()],
        None => list_reports(root)?,
    };
    if names.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    for name in &names {
        match load_report(root, name)? {
            Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
            Some(report) => print_report(&report),
            None => println!("Task \"{name}\": no report found"),
        }
    }
    Ok(())
}

pub fn print_report(report: &RunReport) {
    let result = &report.result;
    println!(
        "\nTask: {} ({:?}, {})",
        report.task_name, result.outcome, result.run_id
    );
    println!("  Started:  {}", report.started_at);
    println!("  Finished: {}", report.finished_at);
    if let Some(err) = &result.error {
        println!("  Reason: {err}");
    }
    if let Some(id) = &result.final_snapshot_id {
        println!("  Final snapshot: {id}");
    }

    println!();
    for a in &result.attempts {
        let (icon, detail) = match (&a.test_outcome, &a.agent_outcome.error_message) {
            (Some(t), _) if t.passed => ("\u{2713}", "tests passed".to_string()),
            (Some(t), _) => ("\u{2717}", format!("{} test errors", t.error_messages.len())),
            (None, Some(err)) => ("\u{2717}", format!("agent failed: {}", first_line(err))),
            (None, None) => ("\u{2713}", "no changes".to_string()),
        };
        println!(
            "  {icon} attempt {}/{}  {detail}",
            a.index, report.config.max_attempts
        );
    }

    if let Some(alt) = result
        .rollback
        .as_ref()
        .and_then(|r| r.alternative_approach.as_deref())
    {
        println!("\n  Suggested next approach:");
        for line in alt.lines() {
            println!("    {line}");
        }
    }
    println!();
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
