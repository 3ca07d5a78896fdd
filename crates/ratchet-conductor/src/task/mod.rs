pub mod parser;
pub mod schema;

pub use parser::{load_task, parse_task};
pub use schema::{AgentSpec, TaskSpec, TestSpec};
