//! Profile layer: the persisted default per-key lighting program.
//!
//! Profiles are JSON documents under `profiles/` in the config directory,
//! keyed by a content-hash id. The active profile supplies the baseline
//! lighting for every key no signal mapping currently claims; a built-in
//! "null" profile (all keys off) backs everything when the configured
//! profile is missing or unreadable.

use std::collections::BTreeMap;
use std::path::PathBuf;

use keyglow_hal::{KeyState, StateChangeRequest};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::settings::PersistenceError;

pub const NULL_PROFILE_ID: &str = "null";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Content-hash id; derived from the serialized document, not stored.
    #[serde(skip)]
    pub id: String,
    pub name: String,
    /// Per-layout list of default key states.
    #[serde(default)]
    pub default_animations: BTreeMap<String, Vec<StateChangeRequest>>,
}

fn null_profile() -> Profile {
    Profile {
        id: NULL_PROFILE_ID.to_string(),
        name: "NULL".to_string(),
        default_animations: BTreeMap::new(),
    }
}

pub struct ProfileLayer {
    profiles: BTreeMap<String, Profile>,
    active: String,
    layout: String,
    profiles_dir: PathBuf,
}

impl ProfileLayer {
    /// Load every readable profile document from `profiles_dir`. Unreadable
    /// files are skipped with a warning.
    pub fn load(profiles_dir: PathBuf, active: &str, layout: &str) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(NULL_PROFILE_ID.to_string(), null_profile());

        match std::fs::read_dir(&profiles_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    match std::fs::read_to_string(&path) {
                        Ok(data) => match serde_json::from_str::<Profile>(&data) {
                            Ok(mut profile) => {
                                profile.id = content_id(data.as_bytes());
                                info!("loaded profile {}: {}", profile.name, profile.id);
                                profiles.insert(profile.id.clone(), profile);
                            }
                            Err(e) => warn!("skipping {}: {e}", path.display()),
                        },
                        Err(e) => warn!("skipping {}: {e}", path.display()),
                    }
                }
            }
            Err(e) => warn!("profiles dir {}: {e}", profiles_dir.display()),
        }

        let mut layer = Self {
            profiles,
            active: NULL_PROFILE_ID.to_string(),
            layout: layout.to_string(),
            profiles_dir,
        };
        layer.set_active(active);
        layer
    }

    pub fn set_layout(&mut self, layout: &str) {
        self.layout = layout.to_string();
    }

    /// Switch the active profile, falling back to the null profile when the
    /// referenced id is unknown.
    pub fn set_active(&mut self, id: &str) {
        if self.profiles.contains_key(id) {
            self.active = id.to_string();
        } else {
            warn!("profile {id} not found, falling back to null profile");
            self.active = NULL_PROFILE_ID.to_string();
        }
    }

    pub fn active(&self) -> &Profile {
        // The active id always resolves: set_active only stores known ids
        // and the null profile is never removed.
        &self.profiles[&self.active]
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    /// The active profile's default changes for the current layout. These
    /// are fed to the reconciler before any signal overlay each tick.
    pub fn baseline_changes(&self) -> Vec<StateChangeRequest> {
        self.active()
            .default_animations
            .get(&self.layout)
            .cloned()
            .unwrap_or_default()
    }

    /// The default state for one key: the active profile's entry, or
    /// all-off when the profile does not cover the key.
    pub fn default_state(&self, key: &str) -> KeyState {
        if let Some(changes) = self.active().default_animations.get(&self.layout) {
            for change in changes {
                if change.key == key {
                    return change.data.clone();
                }
            }
        }
        KeyState::all_off()
    }

    /// Capture a snapshot as a new persisted profile. The id is the content
    /// hash of the serialized document.
    pub fn create_profile(
        &mut self,
        name: &str,
        snapshot: Vec<StateChangeRequest>,
    ) -> Result<Profile, PersistenceError> {
        let mut default_animations = BTreeMap::new();
        default_animations.insert(self.layout.clone(), snapshot);
        let mut profile = Profile {
            id: String::new(),
            name: name.to_string(),
            default_animations,
        };

        let data = serde_json::to_string_pretty(&profile)?;
        profile.id = content_id(data.as_bytes());

        let path = self.profiles_dir.join(format!("{}.json", profile.id));
        std::fs::write(&path, &data).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;

        info!("saved profile {}: {}", profile.name, profile.id);
        self.profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    /// Remove a persisted profile. Deleting the active profile reverts to
    /// the null profile.
    pub fn delete_profile(&mut self, id: &str) -> Result<(), PersistenceError> {
        if id == NULL_PROFILE_ID || !self.profiles.contains_key(id) {
            return Err(PersistenceError::UnknownProfile(id.to_string()));
        }

        let path = self.profiles_dir.join(format!("{id}.json"));
        std::fs::remove_file(&path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;

        self.profiles.remove(id);
        if self.active == id {
            self.active = NULL_PROFILE_ID.to_string();
        }
        Ok(())
    }
}

/// FNV-1a 64 over the serialized document, hex-encoded. Stable across
/// processes, unlike std's default hasher.
fn content_id(data: &[u8]) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyglow_hal::ChannelState;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "keyglow-profiles-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn red_key(key: &str) -> StateChangeRequest {
        StateChangeRequest {
            key: key.to_string(),
            data: KeyState {
                red: ChannelState::hold_at(255.0),
                ..KeyState::all_off()
            },
        }
    }

    #[test]
    fn missing_profile_falls_back_to_null() {
        let dir = temp_dir("fallback");
        let layer = ProfileLayer::load(dir.clone(), "does-not-exist", "en-US");
        assert_eq!(layer.active().id, NULL_PROFILE_ID);
        assert!(layer.baseline_changes().is_empty());
        assert_eq!(layer.default_state("esc"), KeyState::all_off());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn create_then_reload_round_trip() {
        let dir = temp_dir("roundtrip");
        let mut layer = ProfileLayer::load(dir.clone(), NULL_PROFILE_ID, "en-US");
        let created = layer
            .create_profile("warm", vec![red_key("a"), red_key("b")])
            .unwrap();
        assert_eq!(created.id.len(), 16);

        let reloaded = ProfileLayer::load(dir.clone(), &created.id, "en-US");
        assert_eq!(reloaded.active().name, "warm");
        assert_eq!(reloaded.active().id, created.id);
        assert_eq!(reloaded.baseline_changes().len(), 2);
        assert_eq!(reloaded.default_state("a"), red_key("a").data);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn delete_reverts_active_to_null() {
        let dir = temp_dir("delete");
        let mut layer = ProfileLayer::load(dir.clone(), NULL_PROFILE_ID, "en-US");
        let created = layer.create_profile("temp", vec![red_key("a")]).unwrap();
        layer.set_active(&created.id);

        layer.delete_profile(&created.id).unwrap();
        assert_eq!(layer.active().id, NULL_PROFILE_ID);
        assert!(matches!(
            layer.delete_profile(&created.id),
            Err(PersistenceError::UnknownProfile(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
