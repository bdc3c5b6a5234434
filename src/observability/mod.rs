//! Observability for the dashboard client
//!
//! Structured logging through `tracing`, with span macros for MQTT and
//! lifecycle operations.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
