//! Dashboard payload protocol
//!
//! This module implements the payload union exchanged on sensor and device
//! topics, and the topic rules the client enforces.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
