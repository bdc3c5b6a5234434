//! Topic validation and classification for dashboard traffic
//!
//! Publish topics must be concrete; subscription filters may use the MQTT
//! `+` and `#` wildcards. A [`TopicMap`] tells sensor topics from device
//! topics so payloads can be decoded with the right schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Longest topic the MQTT wire format can carry
pub const MAX_TOPIC_LEN: usize = 65_535;

pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInPublish(topic.to_string()));
    }
    Ok(())
}

pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    check_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedWildcard(filter.to_string()));
        }
    }
    Ok(())
}

fn check_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(topic.len()));
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    Ok(())
}

/// MQTT filter matching: `+` matches one level, a trailing `#` the rest
///
/// `#` also matches the parent level, so `casa/#` matches `casa`.
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(level)) if expected == level => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Device id for a device topic: the levels after the root joined with `_`
///
/// `casa/sala/luz1` becomes `sala_luz1`. A single-level topic is its own id.
pub fn device_id(topic: &str) -> String {
    let levels: Vec<&str> = topic.split('/').filter(|level| !level.is_empty()).collect();
    match levels.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [_root, rest @ ..] => rest.join("_"),
    }
}

/// Schema a topic's payloads follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    Sensor,
    Device,
}

/// Configured sensor and device topics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMap {
    sensors: BTreeSet<String>,
    devices: BTreeSet<String>,
}

impl TopicMap {
    pub fn new<S, D>(sensors: S, devices: D) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            sensors: sensors.into_iter().map(Into::into).collect(),
            devices: devices.into_iter().map(Into::into).collect(),
        }
    }

    /// Kind of a concrete topic; exact entries win over wildcard filters
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        if self.sensors.contains(topic) {
            return Some(TopicKind::Sensor);
        }
        if self.devices.contains(topic) {
            return Some(TopicKind::Device);
        }

        if self.sensors.iter().any(|filter| filter_matches(filter, topic)) {
            Some(TopicKind::Sensor)
        } else if self.devices.iter().any(|filter| filter_matches(filter, topic)) {
            Some(TopicKind::Device)
        } else {
            None
        }
    }

    /// Every configured topic, sensors first
    pub fn all_topics(&self) -> impl Iterator<Item = &str> {
        self.sensors
            .iter()
            .chain(self.devices.iter())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty() && self.devices.is_empty()
    }
}

/// Topic validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic is {0} bytes, longer than the MQTT limit")]
    TooLong(usize),
    #[error("Topic contains a NUL character")]
    NulCharacter,
    #[error("Wildcards are not allowed in publish topics: '{0}'")]
    WildcardInPublish(String),
    #[error("Wildcard must occupy a whole level ('#' only as the last one): '{0}'")]
    MisplacedWildcard(String),
}
