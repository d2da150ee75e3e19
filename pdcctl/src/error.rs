//! Errors of the control side.
//!
//! Only `NoValidRate` and `NonPhysicalPeriod` are recoverable: they leave a
//! single SPAD without a result. Everything else ends the run.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The command channel could not run the command at all
    #[error("cannot reach controller: {0}")]
    Connect(String),

    /// The remote command exited with an error
    #[error("command '{cmd}' failed: {message}")]
    Command { cmd: String, message: String },

    /// Board checks before any measurement (power good, return enable, ...)
    #[error("board setup: {0}")]
    Setup(String),

    #[error("status read '{cmd}' reported: {message}")]
    StatusRead { cmd: String, message: String },

    #[error("status {name} is 0x{value:08x}, expected 0x00000000")]
    StatusFlag { name: String, value: u64 },

    #[error("expected {expected} status registers, found {found}")]
    StatusMissing { expected: usize, found: usize },

    #[error("register {register} must be written after {after}")]
    Ordering { register: String, after: String },

    #[error("no result artifact within {0:?}")]
    Timeout(Duration),

    #[error("interrupted by operator")]
    Interrupted,

    #[error("no valid count rate to derive a ZPP period from")]
    NoValidRate,

    #[error("non-physical ZPP period {0:e} s")]
    NonPhysicalPeriod(f64),

    #[error("cannot parse '{0}'")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the error ends the run rather than a single sweep step
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::NoValidRate | Error::NonPhysicalPeriod(_))
    }
}
