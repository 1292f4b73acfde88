use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

use crate::system_stress::Phase;

pub type Result<T> = std::result::Result<T, StressError>;

#[derive(Debug, Error)]
pub enum StressError {
    /// The platform reported zero hardware threads.
    #[error("failed to detect CPU cores")]
    NoCores,

    #[error("workload has not been initialized")]
    NotInitialized,

    #[error("cannot {action} while the stress test is {phase}")]
    InvalidPhase { action: &'static str, phase: Phase },

    #[error("memory allocation of {bytes} bytes failed")]
    Allocation {
        bytes: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("failed to spawn thread {name}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}
