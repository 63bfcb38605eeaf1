//! # Drover Config
//!
//! Configuration for Drover. Loaded once from layered sources (files, then
//! environment variables) into an immutable [`AppConfig`] that is passed
//! explicitly to every component that needs it.

mod app_config;
mod loader;
mod retry;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use retry::*;
pub use validation::*;
