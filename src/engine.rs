//! Engine: single owner of all mutable lighting state.
//!
//! One task consumes the event channel and drives the components; nothing
//! else touches wanted/current state. Each tick re-applies the profile
//! baseline first and the per-signal overlays after it, so signal-driven
//! keys never flicker back to the profile.

use std::collections::BTreeMap;
use std::time::Duration;

use keyglow_hal::DeviceOpener;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::events::{EngineEvent, EventChannel, EventSender};
use crate::mapper::AnimationMapper;
use crate::profile::{Profile, ProfileLayer};
use crate::reconciler::{Connectivity, StateReconciler};
use crate::settings::{PersistenceError, SettingsStore};
use crate::signal::{providers, SignalBus, SignalValue};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Hardware boot latency between attach and first claim attempt.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub connected: bool,
    pub firmware: Option<String>,
    pub profile: String,
    pub profile_name: String,
    pub layout: String,
    pub enabled_signals: Vec<String>,
}

pub struct Engine {
    settings: SettingsStore,
    mapper: AnimationMapper,
    profiles: ProfileLayer,
    bus: SignalBus,
    reconciler: StateReconciler,
    events: EventSender,
    /// Last resolved key changes per signal, re-applied each tick on top
    /// of the profile baseline.
    overlays: BTreeMap<String, Vec<keyglow_hal::StateChangeRequest>>,
    /// Last published value per signal, for re-resolving after a profile
    /// switch.
    last_values: BTreeMap<String, SignalValue>,
}

impl Engine {
    pub fn new(
        settings: SettingsStore,
        mapper: AnimationMapper,
        opener: Box<dyn DeviceOpener>,
        events: EventSender,
    ) -> Self {
        let profiles = ProfileLayer::load(
            settings.profiles_dir(),
            &settings.settings().profile,
            &settings.settings().layout,
        );

        let mut bus = SignalBus::new(events.clone());
        bus.register_plugin(providers::built_in_plugin());
        bus.set_enabled_signals(&settings.settings().signals);

        Self {
            settings,
            mapper,
            profiles,
            bus,
            reconciler: StateReconciler::new(opener),
            events,
            overlays: BTreeMap::new(),
            last_values: BTreeMap::new(),
        }
    }

    pub fn info(&self) -> EngineInfo {
        let active = self.profiles.active();
        EngineInfo {
            connected: self.reconciler.connectivity() == Connectivity::Connected,
            firmware: self.reconciler.firmware().map(str::to_string),
            profile: active.id.clone(),
            profile_name: active.name.clone(),
            layout: self.settings.settings().layout.clone(),
            enabled_signals: self.bus.enabled_names(),
        }
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn mapper(&self) -> &AnimationMapper {
        &self.mapper
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.profiles()
    }

    /// Wanted state of every key, for the administrative collaborator and
    /// for capturing snapshots.
    pub fn key_states(&self) -> Vec<keyglow_hal::StateChangeRequest> {
        self.reconciler.wanted_snapshot()
    }

    /// Run until a `Shutdown` event arrives or the channel closes.
    pub async fn run(&mut self, channel: &mut EventChannel) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => self.on_tick(),
                event = channel.recv() => match event {
                    Some(EngineEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event),
                },
            }
        }

        info!("shutting down");
        self.bus.set_enabled_signals(&[]);
        self.reconciler.device_detached();
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SignalSample { name, value } => self.on_sample(&name, value),
            EngineEvent::ApplyChanges { changes, sync } => {
                self.reconciler.process_key_changes(changes, sync);
            }
            EngineEvent::DeviceAttached => self.on_attached(),
            EngineEvent::DeviceDetached => self.reconciler.device_detached(),
            EngineEvent::DeviceSettled => self.reconciler.device_settled(),
            EngineEvent::ActivateProfile { id } => {
                if let Err(e) = self.activate_profile(&id) {
                    error!("activate profile {id}: {e}");
                }
            }
            EngineEvent::Shutdown => {}
        }
    }

    /// A raw sample from a source. Deduped by the bus; a changed value is
    /// resolved and pushed to the device immediately.
    fn on_sample(&mut self, name: &str, value: SignalValue) {
        let Some(changed) = self.bus.publish(name, value) else {
            return;
        };
        debug!("signal {name} changed to {changed:?}");
        self.last_values.insert(name.to_string(), changed);

        match self.resolve(name, changed) {
            Ok(changes) => {
                self.overlays.insert(name.to_string(), changes.clone());
                self.reconciler.process_key_changes(changes, true);
            }
            Err(e) => error!("resolving {name}: {e}"),
        }
    }

    /// Scheduled reconciliation: baseline underneath, overlays on top,
    /// then one pass.
    fn on_tick(&mut self) {
        self.reconciler
            .process_key_changes(self.profiles.baseline_changes(), false);
        for changes in self.overlays.values() {
            self.reconciler.process_key_changes(changes.clone(), false);
        }
        self.reconciler.sync();
    }

    fn on_attached(&mut self) {
        if self.reconciler.connectivity() != Connectivity::Disconnected {
            return;
        }
        self.reconciler.device_attached();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SETTLE_DELAY).await;
            let _ = events.send(EngineEvent::DeviceSettled);
        });
    }

    fn resolve(
        &self,
        name: &str,
        value: SignalValue,
    ) -> Result<Vec<keyglow_hal::StateChangeRequest>, crate::mapping::ConfigError> {
        let layout = self.settings.settings().layout.clone();
        self.mapper
            .resolve_signal_changes(name, value, &layout, &|key| {
                self.profiles.default_state(key)
            })
    }

    /// Switch the active profile, persist the choice, and repaint.
    pub fn activate_profile(&mut self, id: &str) -> Result<(), PersistenceError> {
        self.settings.update(|s| s.profile = id.to_string())?;
        self.profiles.set_active(id);
        self.repaint();
        Ok(())
    }

    /// Capture the wanted state as a new profile.
    pub fn create_profile(&mut self, name: &str) -> Result<Profile, PersistenceError> {
        self.profiles
            .create_profile(name, self.reconciler.wanted_snapshot())
    }

    pub fn delete_profile(&mut self, id: &str) -> Result<(), PersistenceError> {
        self.profiles.delete_profile(id)?;
        if self.settings.settings().profile == id {
            self.settings.update(|s| s.profile = "null".to_string())?;
            self.repaint();
        }
        Ok(())
    }

    /// Change the enabled signal set and persist it.
    pub fn set_enabled_signals(&mut self, wanted: Vec<String>) -> Result<(), PersistenceError> {
        self.settings.update(|s| s.signals = wanted.clone())?;
        self.bus.set_enabled_signals(&wanted);
        let enabled = self.bus.enabled_names();
        self.overlays.retain(|name, _| enabled.contains(name));
        self.last_values.retain(|name, _| enabled.contains(name));
        self.repaint();
        Ok(())
    }

    /// Re-derive everything: baseline, then overlays re-resolved against
    /// the current profile defaults, then one pass.
    fn repaint(&mut self) {
        self.reconciler
            .process_key_changes(self.profiles.baseline_changes(), false);

        let mut overlays = BTreeMap::new();
        for (name, value) in &self.last_values {
            match self.resolve(name, *value) {
                Ok(changes) => {
                    overlays.insert(name.clone(), changes);
                }
                Err(e) => warn!("re-resolving {name}: {e}"),
            }
        }
        self.overlays = overlays;

        for changes in self.overlays.values() {
            self.reconciler.process_key_changes(changes.clone(), false);
        }
        self.reconciler.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingLibrary, DEFAULT_MAPPINGS_TOML};
    use crate::profile::ProfileLayer;
    use keyglow_hal::{ChannelState, KeyState, MockKeyLights, MockOpener, StateChangeRequest};
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "keyglow-engine-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("profiles")).unwrap();
        dir
    }

    fn blue() -> KeyState {
        KeyState {
            blue: ChannelState::hold_at(200.0),
            ..KeyState::all_off()
        }
    }

    /// Engine with a mock device claimed, one stored profile giving key
    /// "1" a blue baseline, and cpu_utilization_max enabled.
    fn engine_with_baseline(tag: &str) -> (Engine, MockOpener, PathBuf) {
        let dir = temp_dir(tag);

        let mut layer = ProfileLayer::load(dir.join("profiles"), "null", "en-US");
        let profile = layer
            .create_profile(
                "base",
                vec![StateChangeRequest {
                    key: "1".to_string(),
                    data: blue(),
                }],
            )
            .unwrap();
        std::fs::write(
            dir.join("settings.json"),
            format!(
                r#"{{"profile":"{}","layout":"en-US","signals":["cpu_utilization_max"]}}"#,
                profile.id
            ),
        )
        .unwrap();

        let settings = SettingsStore::open(dir.clone()).unwrap();
        let mapper =
            AnimationMapper::new(MappingLibrary::from_toml(DEFAULT_MAPPINGS_TOML).unwrap());
        let channel = EventChannel::new();
        let opener = MockOpener::new(|| MockKeyLights::new().0);
        let mut engine = Engine::new(settings, mapper, Box::new(opener.clone()), channel.sender());
        engine.handle_event(EngineEvent::DeviceAttached);
        engine.handle_event(EngineEvent::DeviceSettled);
        (engine, opener, dir)
    }

    #[tokio::test]
    async fn info_and_key_states_expose_wanted_state() {
        let (mut engine, _opener, dir) = engine_with_baseline("info");
        engine.on_tick();

        let info = engine.info();
        assert!(info.connected);
        assert_eq!(info.firmware.as_deref(), Some("mock-1.0"));
        assert_eq!(info.enabled_signals, vec!["cpu_utilization_max".to_string()]);

        let states = engine.key_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].key, "1");
        assert_eq!(states[0].data, blue());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn tick_keeps_overlay_on_top_of_baseline() {
        let (mut engine, opener, dir) = engine_with_baseline("tick-order");

        // First tick paints the profile baseline.
        engine.on_tick();
        assert_eq!(engine.key_states()[0].data, blue());

        // A signal overlay claims the same key.
        engine.handle_event(EngineEvent::SignalSample {
            name: "cpu_utilization_max".to_string(),
            value: SignalValue::Value(100.0),
        });
        let one = |engine: &Engine| {
            engine
                .key_states()
                .into_iter()
                .find(|c| c.key == "1")
                .unwrap()
        };
        assert_eq!(one(&engine).data.red.up_hold_level, Some(255.0));

        // The next tick merges the baseline first and the overlay after
        // it, so the key stays on the overlay and nothing is resent.
        let writes_before = opener.last_ops().len();
        engine.on_tick();
        assert_eq!(opener.last_ops().len(), writes_before);
        assert_eq!(one(&engine).data.red.up_hold_level, Some(255.0));
        assert_ne!(one(&engine).data, blue());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
