//! Error types surfaced by the library API.
//!
//! Rule hooks use anyhow internally; those errors never escape the rule
//! boundary and are reported as log messages instead.

use crate::rule::{Command, Phase};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The fixed-point loop hit its cycle cap without reaching quiescence.
    #[error("{command} {phase} did not converge after {cycles} cycles")]
    NotConverged {
        command: Command,
        phase: Phase,
        cycles: usize,
    },

    #[error("unknown option {0:?}")]
    UnknownOption(String),

    #[error("invalid value {value:?} for option {name}: {reason}")]
    InvalidOption {
        name: String,
        value: String,
        reason: String,
    },

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("input file {0:?} not found")]
    MissingInput(PathBuf),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
