use crate::types::Attempt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid attempt sequence: expected index {expected}, got {got}")]
    InvalidSequence { expected: u32, got: u32 },
}

/// Append-only record of the attempts made during one run.
///
/// Not synchronized; a single orchestrator owns it for the run's lifetime.
#[derive(Debug, Clone, Default)]
pub struct AttemptLedger {
    attempts: Vec<Attempt>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted attempts, validating the sequence.
    pub fn from_attempts(attempts: impl IntoIterator<Item = Attempt>) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        for attempt in attempts {
            ledger.record(attempt)?;
        }
        Ok(ledger)
    }

    /// Append an attempt. Its index must be exactly `count() + 1`;
    /// otherwise the ledger is left untouched.
    pub fn record(&mut self, attempt: Attempt) -> Result<(), LedgerError> {
        let expected = self.next_index();
        if attempt.index != expected {
            return Err(LedgerError::InvalidSequence {
                expected,
                got: attempt.index,
            });
        }
        self.attempts.push(attempt);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Index the next recorded attempt must carry.
    pub fn next_index(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Up to `n` most recent attempts, oldest first.
    pub fn last_n(&self, n: usize) -> &[Attempt] {
        let start = self.attempts.len().saturating_sub(n);
        &self.attempts[start..]
    }

    /// Most recent attempt that passed its tests (or needed none and the
    /// agent succeeded).
    pub fn last_successful(&self) -> Option<&Attempt> {
        self.attempts.iter().rev().find(|a| a.is_successful())
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn into_attempts(self) -> Vec<Attempt> {
        self.attempts
    }
}
