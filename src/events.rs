//! Typed in-process event channel.
//!
//! Every component talks to the engine loop through one closed set of
//! message variants over an unbounded mpsc channel. The engine task is the
//! sole consumer; producers hold cheap sender clones.

use keyglow_hal::StateChangeRequest;
use tokio::sync::mpsc;

use crate::signal::SignalValue;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A raw sample from a signal source, before dedup.
    SignalSample { name: String, value: SignalValue },
    /// Externally requested key changes, e.g. from an admin surface.
    ApplyChanges {
        changes: Vec<StateChangeRequest>,
        sync: bool,
    },
    DeviceAttached,
    DeviceDetached,
    /// Settle delay after attach has elapsed; safe to claim the device.
    DeviceSettled,
    ActivateProfile { id: String },
    Shutdown,
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;

pub struct EventChannel {
    sender: EventSender,
    receiver: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.receiver.recv().await
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}
