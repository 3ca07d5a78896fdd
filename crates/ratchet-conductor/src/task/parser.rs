use crate::task::schema::TaskSpec;
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Load and validate a task from a YAML file.
pub fn load_task(path: &Path) -> Result<TaskSpec> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_task(&content)
}

/// Parse and validate a task from a YAML string.
pub fn parse_task(yaml: &str) -> Result<TaskSpec> {
    let mut raw: serde_yml::Value = serde_yml::from_str(yaml).context("invalid YAML syntax")?;

    normalize_tests(&mut raw)?;
    expand_variables(&mut raw);

    let task: TaskSpec = serde_yml::from_value(raw).context("task schema validation failed")?;
    validate_task(&task)?;
    Ok(task)
}

/// Normalize short-format test entries.
///
/// Short: `- "cargo test"`
/// Long:  `- { cmd: "cargo test", timeout_sec: 600 }`
fn normalize_tests(raw: &mut serde_yml::Value) -> Result<()> {
    let tests = match raw.get_mut("tests") {
        Some(serde_yml::Value::Sequence(seq)) => seq,
        Some(serde_yml::Value::Null) | None => return Ok(()),
        Some(other) => bail!("tests must be a list, got: {other:?}"),
    };

    for entry in tests.iter_mut() {
        match entry {
            serde_yml::Value::String(cmd) => {
                let mut out = serde_yml::Mapping::new();
                out.insert(
                    serde_yml::Value::String("cmd".into()),
                    serde_yml::Value::String(cmd.clone()),
                );
                *entry = serde_yml::Value::Mapping(out);
            }
            serde_yml::Value::Mapping(m) => {
                if !m.contains_key(serde_yml::Value::String("cmd".into())) {
                    bail!("test entry must have a \"cmd\" key");
                }
            }
            other => bail!("test entry must be a string or mapping, got: {other:?}"),
        }
    }
    Ok(())
}

/// Expand `${{ env.VAR_NAME }}` patterns in string values.
fn expand_variables(value: &mut serde_yml::Value) {
    match value {
        serde_yml::Value::String(s) => {
            if s.contains("${{") {
                *s = expand_env_vars(s);
            }
        }
        serde_yml::Value::Mapping(m) => {
            for (_, v) in m.iter_mut() {
                expand_variables(v);
            }
        }
        serde_yml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                expand_variables(v);
            }
        }
        _ => {}
    }
}

/// Replace `${{ env.VAR_NAME }}` with the environment variable value.
/// Unknown expressions and unclosed braces are left as written.
fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${{") {
        result.push_str(&rest[..start]);
        let after_start = &rest[start + 3..];
        let Some(end) = after_start.find("}}") else {
            result.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let expr = after_start[..end].trim();
        match expr.strip_prefix("env.") {
            Some(var) => result.push_str(&std::env::var(var.trim()).unwrap_or_default()),
            None => result.push_str(&rest[start..start + 3 + end + 2]),
        }
        rest = &after_start[end + 2..];
    }
    result.push_str(rest);
    result
}

/// Constraints serde can't express.
fn validate_task(task: &TaskSpec) -> Result<()> {
    if !is_kebab_case(&task.name) {
        bail!(
            "task name must be kebab-case (lowercase letters, digits, hyphens), got: \"{}\"",
            task.name
        );
    }
    if task.task.trim().is_empty() {
        bail!("task instruction must not be empty");
    }
    if task.max_attempts == 0 {
        bail!("max_attempts must be at least 1");
    }
    if task.rollback_threshold == 0 {
        bail!("rollback_threshold must be at least 1");
    }
    if task.agent.timeout_sec == 0 {
        bail!("agent.timeout_sec must be at least 1");
    }
    for (i, t) in task.tests.iter().enumerate() {
        if t.cmd.trim().is_empty() {
            bail!("tests[{i}]: command must not be empty");
        }
    }
    Ok(())
}

fn is_kebab_case(s: &str) -> bool {
    let Some(first) = s.bytes().next() else {
        return false;
    };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return false;
    }
    s.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
