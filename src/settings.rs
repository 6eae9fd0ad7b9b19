//! Global settings loaded from TOML.
//!
//! - `init_custom(toml_content)` sets a custom TOML before first `settings()` call
//! - `settings()` returns `&'static Settings` (lazy-init singleton)
//! - Default values are embedded via `include_str!("default_settings.toml")`

use std::sync::OnceLock;

use serde::Deserialize;

use crate::predictor::LossKind;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

static CUSTOM_TOML: OnceLock<String> = OnceLock::new();

/// Set custom TOML before first `settings()` call.
pub fn init_custom(toml_content: String) -> Result<(), SettingsError> {
    parse_settings_toml(&toml_content)?;
    CUSTOM_TOML
        .set(toml_content)
        .map_err(|_| SettingsError::AlreadyInitialized)
}

/// Get or initialize the global settings singleton.
pub fn settings() -> &'static Settings {
    static INSTANCE: OnceLock<Settings> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let toml_str = CUSTOM_TOML
            .get()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SETTINGS_TOML);
        parse_settings_toml(toml_str).expect("settings TOML must be valid")
    })
}

/// Returns the embedded default settings TOML content.
pub fn default_toml() -> &'static str {
    DEFAULT_SETTINGS_TOML
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("settings already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub beam: BeamSettings,
    pub coding: CodingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeamSettings {
    pub beam_width: usize,
    pub max_length: usize,
    pub word_penalty: f32,
    pub bos_id: u32,
    pub eos_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodingSettings {
    /// Repetition factor of the default error-correcting codec.
    pub repetition_factor: usize,
    /// Per-bit training loss: "xent" or "squared".
    pub loss_kind: String,
}

impl CodingSettings {
    pub fn loss(&self) -> LossKind {
        match self.loss_kind.as_str() {
            "squared" => LossKind::Squared,
            _ => LossKind::CrossEntropy,
        }
    }
}

fn parse_settings_toml(toml_str: &str) -> Result<Settings, SettingsError> {
    let parsed: Settings =
        toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;

    if parsed.beam.beam_width == 0 {
        return Err(SettingsError::InvalidValue {
            field: "beam.beam_width".into(),
            reason: "must be at least 1".into(),
        });
    }
    if parsed.beam.max_length == 0 {
        return Err(SettingsError::InvalidValue {
            field: "beam.max_length".into(),
            reason: "must be at least 1".into(),
        });
    }
    if parsed.beam.bos_id == parsed.beam.eos_id {
        return Err(SettingsError::InvalidValue {
            field: "beam.eos_id".into(),
            reason: "must differ from bos_id".into(),
        });
    }
    if parsed.coding.repetition_factor == 0 {
        return Err(SettingsError::InvalidValue {
            field: "coding.repetition_factor".into(),
            reason: "must be at least 1".into(),
        });
    }
    if !matches!(parsed.coding.loss_kind.as_str(), "xent" | "squared") {
        return Err(SettingsError::InvalidValue {
            field: "coding.loss_kind".into(),
            reason: format!("unknown loss '{}'", parsed.coding.loss_kind),
        });
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_and_validate() {
        let parsed = parse_settings_toml(DEFAULT_SETTINGS_TOML).unwrap();
        assert_eq!(parsed.beam.beam_width, 5);
        assert_eq!(parsed.beam.max_length, 64);
        assert_eq!(parsed.beam.bos_id, 1);
        assert_eq!(parsed.beam.eos_id, 2);
        assert_eq!(parsed.coding.repetition_factor, 3);
        assert_eq!(parsed.coding.loss(), LossKind::CrossEntropy);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad = DEFAULT_SETTINGS_TOML.replace("beam_width = 5", "beam_width = 0");
        assert!(matches!(
            parse_settings_toml(&bad),
            Err(SettingsError::InvalidValue { .. })
        ));

        let bad = DEFAULT_SETTINGS_TOML.replace("loss_kind = \"xent\"", "loss_kind = \"huber\"");
        assert!(matches!(
            parse_settings_toml(&bad),
            Err(SettingsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn squared_loss_is_selectable() {
        let toml = DEFAULT_SETTINGS_TOML.replace("loss_kind = \"xent\"", "loss_kind = \"squared\"");
        let parsed = parse_settings_toml(&toml).unwrap();
        assert_eq!(parsed.coding.loss(), LossKind::Squared);
    }
}
