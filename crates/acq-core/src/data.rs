//! Data types exchanged between the engine, drivers and writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one property of one device (e.g. `"Laser" / "Power"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId {
    pub device: String,
    pub property: String,
}

impl PropertyId {
    /// Build a property id.
    pub fn new(device: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            property: property.into(),
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.device, self.property)
    }
}

/// A device property value. Numeric properties can take part in covariant
/// pairings; text values are used for presets such as filter names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

impl PropertyValue {
    /// Numeric view of the value, parsing text when possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(v) => Some(*v),
            PropertyValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Number(v) => write!(f, "{}", v),
            PropertyValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Number(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

/// A captured camera image.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major 16-bit pixels, `width * height` long.
    pub pixels: Vec<u16>,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Wrap raw pixels captured now.
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> Self {
        Self {
            width,
            height,
            pixels,
            timestamp: Utc::now(),
        }
    }
}

/// Where a saved image belongs in the acquisition's dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageCoordinates {
    /// Name of the acquisition the image belongs to.
    pub acquisition: String,
    pub time_index: usize,
    pub position_index: usize,
    pub slice_index: usize,
    pub channel_index: usize,
    pub channel: String,
}
