// Keyglow - Signal-Driven Keyboard Lighting
// Engine core, mapping tables, and built-in signal providers

pub mod animation;
pub mod engine;
pub mod events;
pub mod expr;
pub mod mapper;
pub mod mapping;
pub mod profile;
pub mod reconciler;
pub mod settings;
pub mod signal;

pub use engine::{Engine, EngineInfo};
pub use events::{EngineEvent, EventChannel, EventSender};
pub use mapper::{clamp, AnimationMapper};
pub use mapping::{ConfigError, MappingLibrary, Mode};
pub use profile::{Profile, ProfileLayer, NULL_PROFILE_ID};
pub use reconciler::{Connectivity, StateReconciler};
pub use settings::{PersistenceError, Settings, SettingsStore};
pub use signal::{PluginSignal, SignalBus, SignalPlugin, SignalSource, SignalValue};
