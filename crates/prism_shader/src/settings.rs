//! Library Settings
//!
//! Configuration of the shader library: per-stage preambles and the switches
//! that shape assembly and flag handling.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use prism::shader::{LibrarySettings, ShaderLibrary};
//!
//! let settings = LibrarySettings {
//!     strict_flags: true,
//!     ..Default::default()
//! };
//! let library = ShaderLibrary::with_settings(loader, settings);
//!
//! // Or from a JSON file:
//! let settings = LibrarySettings::from_json_str(r#"{ "mask_unused_flags": true }"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::stage::ShaderStage;

// ---------------------------------------------------------------------------
// StagePreambles
// ---------------------------------------------------------------------------

/// Text prepended to every assembled source of a stage, typically a
/// `#version` line and precision qualifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePreambles {
    pub vertex: String,
    pub fragment: String,
    pub geometry: String,
    pub tess_control: String,
    pub tess_eval: String,
    pub compute: String,
}

impl StagePreambles {
    #[must_use]
    pub fn get(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
            ShaderStage::Geometry => &self.geometry,
            ShaderStage::TessControl => &self.tess_control,
            ShaderStage::TessEval => &self.tess_eval,
            ShaderStage::Compute => &self.compute,
        }
    }

    pub fn set(&mut self, stage: ShaderStage, preamble: impl Into<String>) {
        let slot = match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Fragment => &mut self.fragment,
            ShaderStage::Geometry => &mut self.geometry,
            ShaderStage::TessControl => &mut self.tess_control,
            ShaderStage::TessEval => &mut self.tess_eval,
            ShaderStage::Compute => &mut self.compute,
        };
        *slot = preamble.into();
    }

    /// Same preamble for every stage.
    #[must_use]
    pub fn uniform(preamble: &str) -> Self {
        Self {
            vertex: preamble.to_string(),
            fragment: preamble.to_string(),
            geometry: preamble.to_string(),
            tess_control: preamble.to_string(),
            tess_eval: preamble.to_string(),
            compute: preamble.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// LibrarySettings
// ---------------------------------------------------------------------------

/// Settings of a [`ShaderLibrary`](crate::library::ShaderLibrary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    pub preambles: StagePreambles,

    /// Emit `#define FLAG` for each active flag after the preamble, so
    /// expressions left to the downstream compiler can test them.
    pub emit_flag_defines: bool,

    /// Report unknown flag names passed to
    /// [`ShaderLibrary::encode_flags`](crate::library::ShaderLibrary::encode_flags)
    /// as warnings. Encoding itself stays lenient.
    pub strict_flags: bool,

    /// Memoize include-expanded section text per shader until its
    /// generation advances.
    pub memoize_assembly: bool,

    /// Key combinations by the requested mask ANDed with the flag bits the
    /// context actually uses. Off by default: every distinct mask gets its
    /// own entry.
    pub mask_unused_flags: bool,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            preambles: StagePreambles::default(),
            emit_flag_defines: true,
            strict_flags: false,
            memoize_assembly: true,
            mask_unused_flags: false,
        }
    }
}

impl LibrarySettings {
    /// Parses settings from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = LibrarySettings::default();
        assert!(settings.emit_flag_defines);
        assert!(settings.memoize_assembly);
        assert!(!settings.strict_flags);
        assert!(!settings.mask_unused_flags);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = LibrarySettings::from_json_str(
            r##"{ "strict_flags": true, "preambles": { "vertex": "#version 450\n" } }"##,
        )
        .unwrap();

        assert!(settings.strict_flags);
        assert!(settings.emit_flag_defines);
        assert_eq!(settings.preambles.get(ShaderStage::Vertex), "#version 450\n");
        assert_eq!(settings.preambles.get(ShaderStage::Fragment), "");
    }

    #[test]
    fn test_json_round_trip() {
        let mut settings = LibrarySettings {
            mask_unused_flags: true,
            ..Default::default()
        };
        settings.preambles.set(ShaderStage::Compute, "#version 430\n");

        let json = settings.to_json_string().unwrap();
        assert_eq!(LibrarySettings::from_json_str(&json).unwrap(), settings);
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(LibrarySettings::from_json_str("{ strict_flags: yes }").is_err());
    }
}
