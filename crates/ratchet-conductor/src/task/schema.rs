use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single task driven through the attempt loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Kebab-case task name; names the artifact directory.
    pub name: String,
    /// Instruction handed to the change producer on every attempt.
    pub task: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_rollback_threshold")]
    pub rollback_threshold: u32,
    /// Checkpoint the workspace before the first attempt.
    #[serde(default)]
    pub baseline: bool,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub agent: AgentSpec,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentSpec {
    #[serde(default = "default_agent_bin")]
    pub bin: String,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,
}

impl Default for AgentSpec {
    fn default() -> Self {
        Self {
            bin: default_agent_bin(),
            timeout_sec: default_timeout_sec(),
            permission_mode: default_permission_mode(),
        }
    }
}

/// Long form of a test command. Short-form strings are normalised into this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestSpec {
    pub cmd: String,
    #[serde(default = "default_cmd_timeout")]
    pub timeout_sec: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_rollback_threshold() -> u32 {
    2
}
fn default_agent_bin() -> String {
    "claude".into()
}
fn default_timeout_sec() -> u64 {
    1800
}
fn default_permission_mode() -> String {
    "bypassPermissions".into()
}
fn default_cmd_timeout() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_deserialize_minimal() {
        let yaml = "name: demo\ntask: do it\n";
        let spec: TaskSpec = serde_yml::from_str(yaml).unwrap();
        assert_eq!(spec.max_attempts, 3);
        assert_eq!(spec.rollback_threshold, 2);
        assert_eq!(spec.agent, AgentSpec::default());
        assert!(spec.tests.is_empty());
        assert!(spec.cwd.is_none());
        assert!(!spec.baseline);
    }

    #[test]
    fn test_spec_default_timeout() {
        let t: TestSpec = serde_yml::from_str("cmd: cargo test").unwrap();
        assert_eq!(t.timeout_sec, 600);
    }

    #[test]
    fn agent_partial_override() {
        let a: AgentSpec = serde_yml::from_str("timeout_sec: 60").unwrap();
        assert_eq!(a.bin, "claude");
        assert_eq!(a.timeout_sec, 60);
        assert_eq!(a.permission_mode, "bypassPermissions");
    }
}
