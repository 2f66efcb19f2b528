//! Hardware abstraction contract for addressable per-key keyboard lighting.
//!
//! The engine in the root crate depends only on the traits here; the
//! bit-level device protocol lives with whichever backend implements them.

pub mod error;
pub mod mock;
pub mod state;

pub use error::HalError;
pub use mock::{MockKeyLights, MockOp, MockOpener, NullOpener};
pub use state::{Channel, ChannelState, Direction, KeyState, StateChangeRequest};

/// Identity reported by a claimed device after initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub firmware: String,
}

/// A claimed per-key lighting device.
///
/// Parameter writes are staged; `commit` makes everything sent since the
/// last commit visible atomically.
pub trait KeyLights: Send {
    /// Take over the lighting engine and report firmware identity.
    fn initialize(&mut self) -> Result<FirmwareInfo, HalError>;

    /// Stage one channel of one key.
    fn set_key_channel(
        &mut self,
        key: &str,
        channel: Channel,
        state: &ChannelState,
    ) -> Result<(), HalError>;

    /// Apply everything staged since the last commit.
    fn commit(&mut self) -> Result<(), HalError>;

    /// Release the device. Infallible by contract; the device may already
    /// be gone when this is called.
    fn close(&mut self);
}

/// Claims a device handle once the hotplug notifier reports one present.
pub trait DeviceOpener: Send {
    fn claim(&self) -> Result<Box<dyn KeyLights>, HalError>;
}

/// The two event kinds the engine consumes from the hotplug notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached,
    Detached,
}
