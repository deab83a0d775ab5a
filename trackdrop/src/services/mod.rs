//! Service layer module.
//!
//! This module provides the service container that wires the engine, storage and
//! chat adapters together.

pub mod container;

pub use container::ServiceContainer;
