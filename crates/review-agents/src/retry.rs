//! Attempt → Retry-Strict → Fail.
//!
//! Every backend step runs through [`run_with_strict_retry`]. A validation
//! failure on the first attempt earns exactly one retry with stricter
//! instructions; any other failure, or a second failure, ends the step.

use std::fmt;
use std::future::Future;

use tracing::warn;

use crate::errors::DigestError;

/// How demanding the instructions for an attempt should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Normal,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Attempt,
    RetryStrict,
    Failed,
}

impl AttemptState {
    fn strictness(self) -> Strictness {
        match self {
            Self::Attempt => Strictness::Normal,
            Self::RetryStrict | Self::Failed => Strictness::Strict,
        }
    }

    /// Transition taken after a failed attempt.
    pub fn on_error(self, error: &DigestError) -> Self {
        match self {
            Self::Attempt if error.is_validation() => Self::RetryStrict,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempt => write!(f, "attempt"),
            Self::RetryStrict => write!(f, "retry_strict"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Accepted { value: T, attempts: u32 },
    Failed { error: DigestError, attempts: u32 },
}

impl<T> AttemptOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Accepted { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Accepted { value, .. } => Some(value),
            Self::Failed { .. } => None,
        }
    }
}

/// Run `step` under the retry policy. `key` only labels log lines.
pub async fn run_with_strict_retry<T, F, Fut>(key: &str, mut step: F) -> AttemptOutcome<T>
where
    F: FnMut(Strictness) -> Fut,
    Fut: Future<Output = Result<T, DigestError>>,
{
    let mut state = AttemptState::Attempt;
    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match step(state.strictness()).await {
            Ok(value) => return AttemptOutcome::Accepted { value, attempts },
            Err(error) => error,
        };

        state = state.on_error(&error);
        if state == AttemptState::Failed {
            warn!(key = %key, attempts, "Giving up: {error}");
            return AttemptOutcome::Failed { error, attempts };
        }
        warn!(key = %key, attempts, next = %state, "Retrying with strict instructions: {error}");
    }
}
