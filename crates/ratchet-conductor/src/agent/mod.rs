pub mod producer;

pub use producer::{
    attempt_session_id, ChangeProducer, ChangeRequest, ClaudeCodeProducer, MockProducer,
};
