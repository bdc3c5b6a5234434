//! Dashboard payload types and decoding
//!
//! Sensor topics carry temperature/humidity readings, either as a JSON object
//! or as a bare `"temperature,humidity"` pair. Device topics carry plain
//! `on` / `off` / `toggle` commands. Anything else is a typed decode error.

use super::topics::TopicKind;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use thiserror::Error;

/// Accepted temperature readings, in °C
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -50.0..=80.0;
/// Relative humidity, in percent
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// One temperature/humidity sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
}

impl SensorReading {
    /// Build a reading, rejecting values outside the sensor's range
    pub fn new(temperature: f64, humidity: f64) -> Result<Self, PayloadError> {
        check_range("temperature", temperature, &TEMPERATURE_RANGE)?;
        check_range("humidity", humidity, &HUMIDITY_RANGE)?;
        Ok(Self {
            temperature,
            humidity,
        })
    }

    /// Parse a JSON object, falling back to the `"25.5,60.2"` form
    pub fn parse(text: &str) -> Result<Self, PayloadError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PayloadError::Empty);
        }

        let raw = match serde_json::from_str::<SensorReading>(text) {
            Ok(reading) => reading,
            Err(json_error) => parse_pair(text).ok_or_else(|| PayloadError::Malformed {
                reason: format!("neither a JSON reading nor a 'temperature,humidity' pair: {json_error}"),
            })?,
        };

        Self::new(raw.temperature, raw.humidity)
    }
}

fn parse_pair(text: &str) -> Option<SensorReading> {
    let (temperature, humidity) = text.split_once(',')?;
    if humidity.contains(',') {
        return None;
    }
    Some(SensorReading {
        temperature: temperature.trim().parse().ok()?,
        humidity: humidity.trim().parse().ok()?,
    })
}

fn check_range(
    field: &'static str,
    value: f64,
    range: &RangeInclusive<f64>,
) -> Result<(), PayloadError> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(PayloadError::OutOfRange { field, value })
    }
}

/// Command sent to an actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCommand {
    On,
    Off,
    Toggle,
}

impl DeviceCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCommand::On => "on",
            DeviceCommand::Off => "off",
            DeviceCommand::Toggle => "toggle",
        }
    }

    /// Status a device ends up in after this command
    pub fn apply(&self, current: DeviceStatus) -> DeviceStatus {
        match self {
            DeviceCommand::On => DeviceStatus::On,
            DeviceCommand::Off => DeviceStatus::Off,
            DeviceCommand::Toggle => current.toggled(),
        }
    }
}

impl FromStr for DeviceCommand {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = s.trim();
        if command.is_empty() {
            return Err(PayloadError::Empty);
        }
        match command.to_ascii_lowercase().as_str() {
            "on" => Ok(DeviceCommand::On),
            "off" => Ok(DeviceCommand::Off),
            "toggle" => Ok(DeviceCommand::Toggle),
            _ => Err(PayloadError::UnknownCommand(command.to_string())),
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known on/off state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    On,
    #[default]
    Off,
}

impl DeviceStatus {
    pub fn toggled(self) -> Self {
        match self {
            DeviceStatus::On => DeviceStatus::Off,
            DeviceStatus::Off => DeviceStatus::On,
        }
    }
}

/// Decoded dashboard payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Sensor(SensorReading),
    Device(DeviceCommand),
}

impl Payload {
    /// Decode raw bytes according to the topic's schema
    pub fn decode(kind: TopicKind, bytes: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(bytes).map_err(|_| PayloadError::NotUtf8)?;
        match kind {
            TopicKind::Sensor => SensorReading::parse(text).map(Payload::Sensor),
            TopicKind::Device => text.parse().map(Payload::Device),
        }
    }

    /// Wire form: JSON for readings, the bare command word for devices
    pub fn encode(&self) -> Result<Bytes, PayloadError> {
        match self {
            Payload::Sensor(reading) => serde_json::to_vec(reading)
                .map(Bytes::from)
                .map_err(|e| PayloadError::Malformed {
                    reason: e.to_string(),
                }),
            Payload::Device(command) => Ok(Bytes::from_static(command.as_str().as_bytes())),
        }
    }
}

/// Payload decoding errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PayloadError {
    #[error("Payload is not valid UTF-8")]
    NotUtf8,
    #[error("Payload is empty")]
    Empty,
    #[error("Malformed payload: {reason}")]
    Malformed { reason: String },
    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("Unknown device command: '{0}'")]
    UnknownCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_reading_from_json() {
        let payload = Payload::decode(
            TopicKind::Sensor,
            br#"{"temperature": 25.5, "humidity": 60.2}"#,
        )
        .unwrap();
        assert_eq!(
            payload,
            Payload::Sensor(SensorReading {
                temperature: 25.5,
                humidity: 60.2
            })
        );
    }

    #[test]
    fn test_sensor_reading_from_pair() {
        let reading = SensorReading::parse(" 22.0 , 48.5 ").unwrap();
        assert_eq!(reading.temperature, 22.0);
        assert_eq!(reading.humidity, 48.5);
    }

    #[test]
    fn test_malformed_sensor_payloads() {
        assert_eq!(SensorReading::parse(""), Err(PayloadError::Empty));
        assert!(matches!(
            SensorReading::parse("hot"),
            Err(PayloadError::Malformed { .. })
        ));
        assert!(matches!(
            SensorReading::parse("1,2,3"),
            Err(PayloadError::Malformed { .. })
        ));
        assert!(matches!(
            SensorReading::parse(r#"{"temperature": 25.5}"#),
            Err(PayloadError::Malformed { .. })
        ));
        assert!(matches!(
            Payload::decode(TopicKind::Sensor, &[0xff, 0xfe]),
            Err(PayloadError::NotUtf8)
        ));
    }

    #[test]
    fn test_sensor_range_validation() {
        assert_eq!(
            SensorReading::parse("120.0,50.0"),
            Err(PayloadError::OutOfRange {
                field: "temperature",
                value: 120.0
            })
        );
        assert!(matches!(
            SensorReading::parse("20.0,101"),
            Err(PayloadError::OutOfRange {
                field: "humidity",
                ..
            })
        ));
        assert!(SensorReading::parse("NaN,50").is_err());
        assert!(SensorReading::new(-50.0, 0.0).is_ok());
        assert!(matches!(
            SensorReading::new(-50.5, 0.0),
            Err(PayloadError::OutOfRange {
                field: "temperature",
                ..
            })
        ));
        assert!(SensorReading::new(80.0, 100.0).is_ok());
    }

    #[test]
    fn test_device_command_parsing() {
        assert_eq!("on".parse::<DeviceCommand>().unwrap(), DeviceCommand::On);
        assert_eq!("OFF".parse::<DeviceCommand>().unwrap(), DeviceCommand::Off);
        assert_eq!(
            " Toggle\n".parse::<DeviceCommand>().unwrap(),
            DeviceCommand::Toggle
        );
        assert_eq!(
            "blink".parse::<DeviceCommand>(),
            Err(PayloadError::UnknownCommand("blink".to_string()))
        );
        assert_eq!("  ".parse::<DeviceCommand>(), Err(PayloadError::Empty));
    }

    #[test]
    fn test_device_command_apply() {
        assert_eq!(DeviceCommand::On.apply(DeviceStatus::Off), DeviceStatus::On);
        assert_eq!(DeviceCommand::Off.apply(DeviceStatus::On), DeviceStatus::Off);
        assert_eq!(
            DeviceCommand::Toggle.apply(DeviceStatus::Off),
            DeviceStatus::On
        );
        assert_eq!(
            DeviceCommand::Toggle.apply(DeviceStatus::On),
            DeviceStatus::Off
        );
    }

    #[test]
    fn test_payload_encoding() {
        let device = Payload::Device(DeviceCommand::Toggle);
        assert_eq!(device.encode().unwrap().as_ref(), b"toggle");

        let sensor = Payload::Sensor(SensorReading::new(21.5, 40.0).unwrap());
        let bytes = sensor.encode().unwrap();
        assert_eq!(Payload::decode(TopicKind::Sensor, &bytes).unwrap(), sensor);
    }

    #[test]
    fn test_payload_serde_tagging() {
        let json = serde_json::to_value(Payload::Device(DeviceCommand::On)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "device", "data": "on"}));
    }
}
