//! Signal-to-animation mapping tables.
//!
//! Mappings are fixed configuration loaded at start from TOML, with an
//! embedded default document written out on first run. Each mapping binds a
//! signal's value range to animations per keyboard layout.
//!
//! # Example TOML
//!
//! ```toml
//! [[mapping]]
//! signal = "cpu_utilization_max"
//! min = 0.0
//! max = 100.0
//!
//! [[mapping.ranges]]
//! start = 0.0
//! startInclusive = true
//! end = 80.0
//! endInclusive = true
//! animation = { effect = "solid", color = "00FF00" }
//!
//! [mapping.layouts."en-US"]
//! keyGroups = [["1"], ["2"]]
//! mode = "multi"
//! ```
//!
//! Ranges are expected to partition `[min, max]` without gaps, but this is
//! not validated; when several ranges match a value, the last match in
//! listed order wins.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::animation::{AnimationDef, AnimationTemplate};
use crate::expr::ExprError;

/// Mapping and template configuration errors. Fatal at load time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("expression error: {0}")]
    Expr(#[from] ExprError),

    #[error("invalid value for {param}: {value}")]
    BadParam { param: &'static str, value: String },

    #[error("invalid color literal: {0}")]
    BadColor(String),

    #[error("layout mode {0:?} is not implemented")]
    NotImplemented(Mode),

    #[error("no range matches value {value} for signal {signal}")]
    RangesInvalid { signal: String, value: f64 },

    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parse mappings TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// How a mapping distributes its animation across key groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Every key in every group gets the one resolved animation.
    All,
    /// Groups fill up progressively with the signal value, like a meter.
    Multi,
    /// Only the highest activated group lights (not implemented).
    MultiSingle,
    /// Each activated group keeps its own range's animation (not implemented).
    MultiSplit,
}

// ── On-disk definition types ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingFileDef {
    #[serde(default, rename = "mapping")]
    mappings: Vec<SignalMappingDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalMappingDef {
    signal: String,
    min: f64,
    max: f64,
    #[serde(default)]
    ranges: Vec<RangeDef>,
    #[serde(default)]
    layouts: BTreeMap<String, LayoutDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeDef {
    start: f64,
    start_inclusive: bool,
    end: f64,
    end_inclusive: bool,
    animation: AnimationSpec,
}

/// Either a canned effect reference or a full expression template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum AnimationSpec {
    Canned { effect: CannedEffect, color: String },
    Template(AnimationDef),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum CannedEffect {
    Solid,
    SolidFlashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutDef {
    key_groups: Vec<Vec<String>>,
    mode: Mode,
}

// ── Compiled (runtime) types ─────────────────────────────────────────

#[derive(Debug)]
pub struct Range {
    pub start: f64,
    pub start_inclusive: bool,
    pub end: f64,
    pub end_inclusive: bool,
    pub animation: AnimationTemplate,
}

impl Range {
    pub fn contains(&self, v: f64) -> bool {
        let above = (self.start < v) || (self.start <= v && self.start_inclusive);
        let below = (v < self.end) || (v <= self.end && self.end_inclusive);
        above && below
    }
}

#[derive(Debug)]
pub struct LayoutMapping {
    pub key_groups: Vec<Vec<String>>,
    pub mode: Mode,
}

impl LayoutMapping {
    /// Every key named by this layout's groups, in group order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.key_groups.iter().flatten().map(String::as_str)
    }
}

#[derive(Debug)]
pub struct SignalMapping {
    pub signal: String,
    pub min: f64,
    pub max: f64,
    pub ranges: Vec<Range>,
    pub layouts: BTreeMap<String, LayoutMapping>,
}

/// All loaded mapping tables, templates compiled.
#[derive(Debug, Default)]
pub struct MappingLibrary {
    pub mappings: Vec<SignalMapping>,
}

impl MappingLibrary {
    /// Parse and compile from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: MappingFileDef = toml::from_str(content)?;
        let mut mappings = Vec::with_capacity(file.mappings.len());
        for def in &file.mappings {
            mappings.push(compile_mapping(def)?);
        }
        Ok(Self { mappings })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `mappings.toml` from the config directory, writing the default
    /// document first if it does not exist yet.
    pub fn load_default(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join("mappings.toml");
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
            std::fs::write(&path, DEFAULT_MAPPINGS_TOML).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            tracing::info!("created default mappings: {}", path.display());
        }
        Self::load(&path)
    }

    /// Mappings bound to the given signal, in file order.
    pub fn for_signal<'a>(&'a self, signal: &'a str) -> impl Iterator<Item = &'a SignalMapping> {
        self.mappings.iter().filter(move |m| m.signal == signal)
    }

    pub fn signal_names(&self) -> Vec<&str> {
        self.mappings.iter().map(|m| m.signal.as_str()).collect()
    }
}

fn compile_mapping(def: &SignalMappingDef) -> Result<SignalMapping, ConfigError> {
    let mut ranges = Vec::with_capacity(def.ranges.len());
    for range in &def.ranges {
        let animation = match &range.animation {
            AnimationSpec::Canned {
                effect: CannedEffect::Solid,
                color,
            } => AnimationTemplate::solid_color(color)?,
            AnimationSpec::Canned {
                effect: CannedEffect::SolidFlashing,
                color,
            } => AnimationTemplate::solid_color_flashing(color)?,
            AnimationSpec::Template(def) => AnimationTemplate::compile(def)?,
        };
        ranges.push(Range {
            start: range.start,
            start_inclusive: range.start_inclusive,
            end: range.end,
            end_inclusive: range.end_inclusive,
            animation,
        });
    }

    let mut layouts = BTreeMap::new();
    for (name, layout) in &def.layouts {
        // Unimplemented modes are a configuration error, caught at load
        // rather than on the first matching signal update.
        if matches!(layout.mode, Mode::MultiSingle | Mode::MultiSplit) {
            return Err(ConfigError::NotImplemented(layout.mode));
        }
        layouts.insert(
            name.clone(),
            LayoutMapping {
                key_groups: layout.key_groups.clone(),
                mode: layout.mode,
            },
        );
    }

    Ok(SignalMapping {
        signal: def.signal.clone(),
        min: def.min,
        max: def.max,
        ranges,
        layouts,
    })
}

// ── Default mappings ─────────────────────────────────────────────────

pub const DEFAULT_MAPPINGS_TOML: &str = r#"# Signal-to-lighting mapping tables.
# Each [[mapping]] binds a signal's value ranges to animations per layout.
# animation is either { effect = "solid"|"solidFlashing", color = "RRGGBB" }
# or a full per-channel expression template over the variable `signal`.

[[mapping]]
signal = "cpu_utilization_max"
min = 0.0
max = 100.0

[[mapping.ranges]]
start = 0.0
startInclusive = true
end = 80.0
endInclusive = true
animation = { effect = "solid", color = "00FF00" }

[[mapping.ranges]]
start = 80.0
startInclusive = false
end = 90.0
endInclusive = true
animation = { effect = "solid", color = "FFFF00" }

[[mapping.ranges]]
start = 90.0
startInclusive = false
end = 99.0
endInclusive = true
animation = { effect = "solid", color = "FF0000" }

[[mapping.ranges]]
start = 99.0
startInclusive = false
end = 100.0
endInclusive = true
animation = { effect = "solidFlashing", color = "FF0000" }

[mapping.layouts."en-US"]
keyGroups = [["1"], ["2"], ["3"], ["4"], ["5"], ["6"], ["7"], ["8"], ["9"], ["0"]]
mode = "multi"

[[mapping]]
signal = "memory_utilization"
min = 0.0
max = 100.0

[[mapping.ranges]]
start = 0.0
startInclusive = true
end = 80.0
endInclusive = true
animation = { effect = "solid", color = "00FF00" }

[[mapping.ranges]]
start = 80.0
startInclusive = false
end = 90.0
endInclusive = true
animation = { effect = "solid", color = "FFFF00" }

[[mapping.ranges]]
start = 90.0
startInclusive = false
end = 100.0
endInclusive = true
animation = { effect = "solid", color = "FF0000" }

[mapping.layouts."en-US"]
keyGroups = [["f1"], ["f2"], ["f3"], ["f4"], ["f5"], ["f6"], ["f7"], ["f8"], ["f9"], ["f10"]]
mode = "multi"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_document_parses_and_compiles() {
        let lib = MappingLibrary::from_toml(DEFAULT_MAPPINGS_TOML).unwrap();
        assert_eq!(lib.mappings.len(), 2);

        let cpu = &lib.mappings[0];
        assert_eq!(cpu.signal, "cpu_utilization_max");
        assert_eq!(cpu.ranges.len(), 4);
        let layout = &cpu.layouts["en-US"];
        assert_eq!(layout.mode, Mode::Multi);
        assert_eq!(layout.key_groups.len(), 10);
    }

    #[test]
    fn range_boundary_matching() {
        let lib = MappingLibrary::from_toml(DEFAULT_MAPPINGS_TOML).unwrap();
        let ranges = &lib.mappings[0].ranges;

        // [0,80], (80,90], (90,99], (99,100]
        assert!(ranges[0].contains(80.0));
        assert!(!ranges[1].contains(80.0));
        assert!(ranges[1].contains(80.0001));
        assert!(!ranges[2].contains(100.0));
        assert!(ranges[3].contains(100.0));
        assert!(!ranges[0].contains(-0.5));
    }

    #[test]
    fn unimplemented_mode_rejected_at_load() {
        let toml = r#"
[[mapping]]
signal = "x"
min = 0.0
max = 1.0

[mapping.layouts."en-US"]
keyGroups = [["a"]]
mode = "multiSplit"
"#;
        let err = MappingLibrary::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::NotImplemented(Mode::MultiSplit)));
    }

    #[test]
    fn template_animation_in_toml() {
        let toml = r#"
[[mapping]]
signal = "x"
min = 0.0
max = 100.0

[[mapping.ranges]]
start = 0.0
startInclusive = true
end = 100.0
endInclusive = true

[mapping.ranges.animation.red]
upHoldLevel = "signal * 255 / 100"
direction = '"inc"'

[mapping.layouts."en-US"]
keyGroups = [["a"]]
mode = "all"
"#;
        let lib = MappingLibrary::from_toml(toml).unwrap();
        let state = lib.mappings[0].ranges[0].animation.resolve(40.0);
        assert_eq!(state.red.up_hold_level, Some(102.0));
        assert_eq!(state.green.up_hold_level, None);
    }
}
