//! Testing utilities and mock implementations
//!
//! This module provides test doubles for exercising the reconnecting client
//! without an MQTT broker or real timers.

pub mod mocks;

pub use mocks::*;
