//! trackdrop library crate.
//!
//! This module exposes the core functionality for integration testing.

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod logging;
pub mod media;
pub mod panic_hook;
pub mod services;
pub mod telegram;
pub mod utils;

pub use error::{Error, Result};
