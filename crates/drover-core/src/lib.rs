//! # Drover Core
//!
//! Core types shared by every Drover crate: the closed fault taxonomy used to
//! drive retry decisions, the workspace error type, content-derived job
//! identifiers, and tracing initialisation.

pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use id::*;
pub use result::*;
pub use telemetry::{init_tracing, LoggingConfig};
