//! Decision engine for build-validate-rollback loops.
//!
//! Everything here is pure and synchronous: the ledger records attempts,
//! [`pattern::analyze`] classifies the failure trajectory, and the retry and
//! rollback modules turn that classification into decisions. I/O lives in
//! `ratchet-conductor`.

pub mod ledger;
pub mod pattern;
pub mod retry;
pub mod rollback;
pub mod similarity;
pub mod types;

pub use ledger::{AttemptLedger, LedgerError};
pub use pattern::{analyze, PatternAnalysis};
pub use retry::{RetryDecision, RetryPolicy};
pub use similarity::{edit_similarity, similarity};
pub use types::*;
