//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the ingestion
//! pipeline without requiring an MQTT broker or a database file.

pub mod mocks;

pub use mocks::*;
