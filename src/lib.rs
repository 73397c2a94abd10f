pub mod cache;
pub mod canon;
pub mod classify;
mod densemap;
pub mod error;
pub mod file;
pub mod fs;
pub mod options;
pub mod progress;
pub mod registry;
pub mod rule;
pub mod rules;
pub mod run;
mod signal;
mod smallmap;
pub mod state;
pub mod task;
mod terminal;
pub mod work;

pub use error::{Error, Result};
