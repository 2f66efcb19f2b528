//! Signal bus: source lifecycle and de-duplicated value publication.
//!
//! Plugins register named scalar signals, each with an acquisition
//! strategy. Enabling a signal starts its timer task or attaches its hook;
//! disabling stops delivery before the call returns. `publish` is the sole
//! dedup point: a sample equal to the last recorded value is dropped.

pub mod providers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{EngineEvent, EventSender};

/// A signal's current reading. `NoSignal` means the source cannot produce
/// a value yet (warm-up, unavailable backend) and maps to the profile
/// default downstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalValue {
    Value(f64),
    NoSignal,
}

/// Handle a source uses to deliver samples asynchronously. Samples go
/// through the engine loop and back into [`SignalBus::publish`], so late
/// deliveries after disable are discarded there.
#[derive(Clone)]
pub struct SignalSink {
    name: String,
    events: EventSender,
}

impl SignalSink {
    pub fn send(&self, value: SignalValue) {
        let _ = self.events.send(EngineEvent::SignalSample {
            name: self.name.clone(),
            value,
        });
    }
}

/// Detach callback for a push-driven source.
pub struct HookHandle {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl HookHandle {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    fn detach(mut self) {
        if let Some(f) = self.detach.take() {
            f();
        }
    }
}

type PollFn = Arc<Mutex<dyn FnMut() -> SignalValue + Send>>;
type CallbackFn = Arc<Mutex<dyn FnMut(SignalSink) + Send>>;
type AttachFn = Arc<Mutex<dyn FnMut(SignalSink) -> HookHandle + Send>>;

/// Acquisition strategy. Closures sit behind `Arc<Mutex>` so a signal can
/// be disabled and re-enabled without rebuilding the catalogue.
#[derive(Clone)]
pub enum SignalSource {
    /// Repeating timer; each fire polls synchronously and publishes.
    Polling { interval: Duration, poll: PollFn },
    /// Repeating timer; each fire hands the sink to the source, which
    /// replies whenever its work completes. Overlapping completions across
    /// ticks are tolerated.
    PollingCallback { interval: Duration, poll: CallbackFn },
    /// Attached once on enable; the source pushes at arbitrary times until
    /// the returned handle is detached.
    Hook { attach: AttachFn },
}

#[derive(Clone)]
pub struct PluginSignal {
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub source: SignalSource,
}

pub struct SignalPlugin {
    pub name: String,
    pub signals: Vec<PluginSignal>,
}

enum ActiveSource {
    Task(JoinHandle<()>),
    Hook(HookHandle),
}

pub struct SignalBus {
    catalogue: Vec<PluginSignal>,
    enabled: HashMap<String, ActiveSource>,
    last: HashMap<String, SignalValue>,
    events: EventSender,
}

impl SignalBus {
    pub fn new(events: EventSender) -> Self {
        Self {
            catalogue: Vec::new(),
            enabled: HashMap::new(),
            last: HashMap::new(),
            events,
        }
    }

    /// Append a plugin's signals to the catalogue. Duplicate names are not
    /// rejected; the first registered entry wins on lookup.
    pub fn register_plugin(&mut self, plugin: SignalPlugin) {
        info!(
            "registered plugin {} with {} signal(s)",
            plugin.name,
            plugin.signals.len()
        );
        self.catalogue.extend(plugin.signals);
    }

    pub fn signals(&self) -> &[PluginSignal] {
        &self.catalogue
    }

    pub fn enabled_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.enabled.keys().cloned().collect();
        names.sort();
        names
    }

    /// Signal names a wanted entry denotes: an exact name match resolves
    /// to that one signal, otherwise a tag match expands to every signal
    /// carrying the tag.
    fn resolve_wanted(&self, wanted: &str) -> Vec<String> {
        if self.catalogue.iter().any(|s| s.name == wanted) {
            return vec![wanted.to_string()];
        }
        let mut names = Vec::new();
        for signal in &self.catalogue {
            if signal.tags.iter().any(|t| t == wanted) && !names.contains(&signal.name) {
                names.push(signal.name.clone());
            }
        }
        names
    }

    /// Reconcile the enabled set against `wanted` (signal names or tags).
    /// Removed signals stop delivering before this returns; added ones are
    /// started. Unknown names are logged and skipped.
    pub fn set_enabled_signals(&mut self, wanted: &[String]) {
        let mut resolved: Vec<String> = Vec::new();
        for entry in wanted {
            let matches = self.resolve_wanted(entry);
            if matches.is_empty() {
                warn!("unknown signal '{entry}', ignoring");
                continue;
            }
            for name in matches {
                if !resolved.contains(&name) {
                    resolved.push(name);
                }
            }
        }

        let to_disable: Vec<String> = self
            .enabled
            .keys()
            .filter(|name| !resolved.contains(name))
            .cloned()
            .collect();
        for name in to_disable {
            self.disable(&name);
        }

        for name in resolved {
            if !self.enabled.contains_key(&name) {
                self.enable(&name);
            }
        }
    }

    fn enable(&mut self, name: &str) {
        let Some(signal) = self.catalogue.iter().find(|s| s.name == name) else {
            return;
        };
        let sink = SignalSink {
            name: name.to_string(),
            events: self.events.clone(),
        };

        let active = match signal.source.clone() {
            SignalSource::Polling { interval, poll } => {
                ActiveSource::Task(tokio::spawn(async move {
                    let mut timer = tokio::time::interval(interval);
                    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        timer.tick().await;
                        let value = match poll.lock() {
                            Ok(mut f) => (*f)(),
                            Err(_) => SignalValue::NoSignal,
                        };
                        sink.send(value);
                    }
                }))
            }
            SignalSource::PollingCallback { interval, poll } => {
                ActiveSource::Task(tokio::spawn(async move {
                    let mut timer = tokio::time::interval(interval);
                    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        timer.tick().await;
                        if let Ok(mut f) = poll.lock() {
                            (*f)(sink.clone());
                        }
                    }
                }))
            }
            SignalSource::Hook { attach } => match attach.lock() {
                Ok(mut f) => ActiveSource::Hook((*f)(sink)),
                Err(_) => {
                    warn!("hook for '{name}' is poisoned, not enabling");
                    return;
                }
            },
        };

        info!("enabled signal {name}");
        self.enabled.insert(name.to_string(), active);
    }

    fn disable(&mut self, name: &str) {
        if let Some(active) = self.enabled.remove(name) {
            match active {
                ActiveSource::Task(task) => task.abort(),
                ActiveSource::Hook(handle) => handle.detach(),
            }
            self.last.remove(name);
            info!("disabled signal {name}");
        }
    }

    /// Record a sample and report whether it changed. Samples for signals
    /// no longer enabled are discarded, which closes the window between a
    /// disable and a still-queued delivery.
    pub fn publish(&mut self, name: &str, value: SignalValue) -> Option<SignalValue> {
        if !self.enabled.contains_key(name) {
            debug!("dropping sample for disabled signal {name}");
            return None;
        }
        if self.last.get(name) == Some(&value) {
            return None;
        }
        self.last.insert(name.to_string(), value);
        Some(value)
    }
}
