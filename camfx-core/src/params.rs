//! # Filter Parameters
//!
//! The twelve tunable values behind the filter chain, and the shared store
//! that UI-facing setters write and every render reads.
//!
//! Values are never validated: whatever is set flows straight into the
//! filter math. A render works from a snapshot copied at its start, so a
//! concurrent write is seen either completely or not at all.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid assignment '{0}' (expected name=value)")]
    InvalidAssignment(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Parameter Names
// ============================================================================

/// Key of one tunable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterName {
    BrightnessS,
    BrightnessH,
    Contrast,
    Highlights,
    Shadows,
    Level,
    Saturation,
    Red,
    Green,
    Blue,
    Sharpen,
    Blur,
}

impl ParameterName {
    pub const ALL: [ParameterName; 12] = [
        Self::BrightnessS,
        Self::BrightnessH,
        Self::Contrast,
        Self::Highlights,
        Self::Shadows,
        Self::Level,
        Self::Saturation,
        Self::Red,
        Self::Green,
        Self::Blue,
        Self::Sharpen,
        Self::Blur,
    ];

    /// Key as it appears in preset files and on the command line
    pub fn key(&self) -> &'static str {
        match self {
            Self::BrightnessS => "brightnessS",
            Self::BrightnessH => "brightnessH",
            Self::Contrast => "contrast",
            Self::Highlights => "highlights",
            Self::Shadows => "shadows",
            Self::Level => "level",
            Self::Saturation => "saturation",
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Sharpen => "sharpen",
            Self::Blur => "blur",
        }
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ParameterName {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.key() == s)
            .ok_or_else(|| ParamsError::UnknownParameter(s.to_string()))
    }
}

/// Parse a `name=value` assignment such as `red=0.25`
pub fn parse_assignment(input: &str) -> Result<(ParameterName, f32), ParamsError> {
    let (name, value) = input
        .split_once('=')
        .ok_or_else(|| ParamsError::InvalidAssignment(input.to_string()))?;
    let name: ParameterName = name.trim().parse()?;
    let value: f32 = value
        .trim()
        .parse()
        .map_err(|_| ParamsError::InvalidAssignment(input.to_string()))?;
    Ok((name, value))
}

// ============================================================================
// Parameter Set
// ============================================================================

/// Complete parameter set; every field always holds a value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterParameters {
    /// Added to `shadows` to form the gamma power
    pub brightness_s: f32,
    /// Added to `highlights` to form the exposure value
    pub brightness_h: f32,
    /// Feeds the brightness input of the color controls stage
    pub contrast: f32,
    pub highlights: f32,
    pub shadows: f32,
    /// Feeds the contrast input of the color controls stage
    pub level: f32,
    pub saturation: f32,
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    /// Stored but not read by the sharpen stage
    pub sharpen: f32,
    /// Stored but not read by any stage
    pub blur: f32,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            brightness_s: 0.0,
            brightness_h: 0.0,
            contrast: 0.0,
            highlights: 0.5,
            shadows: 0.75,
            level: 1.0,
            saturation: 1.0,
            red: 0.0,
            green: 0.0,
            blue: 0.0,
            sharpen: 0.4,
            blur: 0.4,
        }
    }
}

impl FilterParameters {
    pub fn get(&self, name: ParameterName) -> f32 {
        match name {
            ParameterName::BrightnessS => self.brightness_s,
            ParameterName::BrightnessH => self.brightness_h,
            ParameterName::Contrast => self.contrast,
            ParameterName::Highlights => self.highlights,
            ParameterName::Shadows => self.shadows,
            ParameterName::Level => self.level,
            ParameterName::Saturation => self.saturation,
            ParameterName::Red => self.red,
            ParameterName::Green => self.green,
            ParameterName::Blue => self.blue,
            ParameterName::Sharpen => self.sharpen,
            ParameterName::Blur => self.blur,
        }
    }

    pub fn set(&mut self, name: ParameterName, value: f32) {
        let slot = match name {
            ParameterName::BrightnessS => &mut self.brightness_s,
            ParameterName::BrightnessH => &mut self.brightness_h,
            ParameterName::Contrast => &mut self.contrast,
            ParameterName::Highlights => &mut self.highlights,
            ParameterName::Shadows => &mut self.shadows,
            ParameterName::Level => &mut self.level,
            ParameterName::Saturation => &mut self.saturation,
            ParameterName::Red => &mut self.red,
            ParameterName::Green => &mut self.green,
            ParameterName::Blue => &mut self.blue,
            ParameterName::Sharpen => &mut self.sharpen,
            ParameterName::Blur => &mut self.blur,
        };
        *slot = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParameterName, f32)> + '_ {
        ParameterName::ALL.iter().map(move |name| (*name, self.get(*name)))
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ParamsError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ============================================================================
// Parameter Store
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Versioned {
    params: FilterParameters,
    version: u64,
}

/// Shared, mutable parameter table.
///
/// Hand it to engines as `Arc<ParameterStore>`; writers replace whole values
/// and bump the version, readers take copies.
#[derive(Debug)]
pub struct ParameterStore {
    inner: RwLock<Versioned>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::with_parameters(FilterParameters::default())
    }

    pub fn with_parameters(params: FilterParameters) -> Self {
        Self {
            inner: RwLock::new(Versioned { params, version: 0 }),
        }
    }

    /// Consistent copy of every parameter
    pub fn snapshot(&self) -> FilterParameters {
        self.inner.read().params
    }

    /// Snapshot together with the version it was taken at
    pub fn versioned_snapshot(&self) -> (u64, FilterParameters) {
        let inner = self.inner.read();
        (inner.version, inner.params)
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn get(&self, name: ParameterName) -> f32 {
        self.inner.read().params.get(name)
    }

    pub fn set(&self, name: ParameterName, value: f32) {
        let mut inner = self.inner.write();
        inner.params.set(name, value);
        inner.version += 1;
    }

    pub fn replace(&self, params: FilterParameters) {
        let mut inner = self.inner.write();
        inner.params = params;
        inner.version += 1;
    }

    pub fn reset_to_defaults(&self) {
        self.replace(FilterParameters::default());
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        Ok(Self::with_parameters(FilterParameters::load_json(path)?))
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ParamsError> {
        self.snapshot().save_json(path)
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
