//! Animation mapper: (signal, value) to per-key state change requests.
//!
//! Pure apart from logging. The profile layer's per-key default is passed
//! in as a lookup so `NoSignal` and non-activated meter groups resolve
//! without the mapper owning profile state.

use keyglow_hal::{KeyState, StateChangeRequest};
use tracing::warn;

use crate::animation::AnimationTemplate;
use crate::mapping::{ConfigError, LayoutMapping, MappingLibrary, Mode, SignalMapping};
use crate::signal::SignalValue;

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

pub struct AnimationMapper {
    library: MappingLibrary,
}

impl AnimationMapper {
    pub fn new(library: MappingLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &MappingLibrary {
        &self.library
    }

    /// Resolve one signal update into key changes for the given layout.
    /// Mappings without a definition for `layout` are skipped with a
    /// warning. Several mappings may bind the same signal; their results
    /// are concatenated in file order (later entries win per key once
    /// merged into wanted state).
    pub fn resolve_signal_changes(
        &self,
        signal: &str,
        value: SignalValue,
        layout: &str,
        default_state: &dyn Fn(&str) -> KeyState,
    ) -> Result<Vec<StateChangeRequest>, ConfigError> {
        let mut changes = Vec::new();
        for mapping in self.library.for_signal(signal) {
            let Some(layout_mapping) = mapping.layouts.get(layout) else {
                warn!("signal {signal} has no mapping for layout {layout}");
                continue;
            };
            resolve_mapping(mapping, layout_mapping, value, default_state, &mut changes)?;
        }
        Ok(changes)
    }
}

fn resolve_mapping(
    mapping: &SignalMapping,
    layout: &LayoutMapping,
    value: SignalValue,
    default_state: &dyn Fn(&str) -> KeyState,
    out: &mut Vec<StateChangeRequest>,
) -> Result<(), ConfigError> {
    let SignalValue::Value(raw) = value else {
        // Source has no reading; hand every covered key back to the
        // profile without evaluating ranges.
        for key in layout.keys() {
            out.push(StateChangeRequest {
                key: key.to_string(),
                data: default_state(key),
            });
        }
        return Ok(());
    };

    let clamped = clamp(raw, mapping.min, mapping.max);

    // Last matching range in listed order wins.
    let mut matched: Option<&AnimationTemplate> = None;
    for range in &mapping.ranges {
        if range.contains(clamped) {
            matched = Some(&range.animation);
        }
    }
    let Some(animation) = matched else {
        return Err(ConfigError::RangesInvalid {
            signal: mapping.signal.clone(),
            value: clamped,
        });
    };
    let resolved = animation.resolve(clamped);

    match layout.mode {
        Mode::All => {
            for key in layout.keys() {
                out.push(StateChangeRequest {
                    key: key.to_string(),
                    data: resolved.clone(),
                });
            }
        }
        Mode::Multi => {
            let groups = layout.key_groups.len() as f64;
            let activated = (groups * clamped / mapping.max).floor() as usize;
            for (index, group) in layout.key_groups.iter().enumerate() {
                for key in group {
                    let data = if index < activated {
                        resolved.clone()
                    } else {
                        default_state(key)
                    };
                    out.push(StateChangeRequest {
                        key: key.clone(),
                        data,
                    });
                }
            }
        }
        // Rejected at load; reaching one here is a defect.
        mode @ (Mode::MultiSingle | Mode::MultiSplit) => {
            return Err(ConfigError::NotImplemented(mode));
        }
    }
    Ok(())
}
