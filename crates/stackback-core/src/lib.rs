pub mod command;
pub mod compose;
pub mod config;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod lock;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod registry;
pub mod secret;
pub mod signal;
pub mod snapshot;

pub use error::{FailureKind, Result, StackbackError};
