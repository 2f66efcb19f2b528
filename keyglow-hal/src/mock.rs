//! Test doubles and the no-hardware backend.

use std::sync::{Arc, Mutex};

use crate::error::HalError;
use crate::state::{Channel, ChannelState};
use crate::{DeviceOpener, FirmwareInfo, KeyLights};

/// One recorded operation on a [`MockKeyLights`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockOp {
    Initialize,
    SetChannel {
        key: String,
        channel: Channel,
        state: ChannelState,
    },
    Commit,
    Close,
}

/// Recording device for tests. Every call is appended to a shared op log;
/// `fail_on_key` makes `set_key_channel` for that key return an error to
/// exercise partial-failure paths.
pub struct MockKeyLights {
    ops: Arc<Mutex<Vec<MockOp>>>,
    fail_on_key: Option<String>,
    fail_commit: bool,
}

impl MockKeyLights {
    pub fn new() -> (Self, Arc<Mutex<Vec<MockOp>>>) {
        let ops = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                ops: Arc::clone(&ops),
                fail_on_key: None,
                fail_commit: false,
            },
            ops,
        )
    }

    pub fn fail_on_key(mut self, key: &str) -> Self {
        self.fail_on_key = Some(key.to_string());
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }
}

impl KeyLights for MockKeyLights {
    fn initialize(&mut self) -> Result<FirmwareInfo, HalError> {
        self.ops.lock().unwrap().push(MockOp::Initialize);
        Ok(FirmwareInfo {
            firmware: "mock-1.0".to_string(),
        })
    }

    fn set_key_channel(
        &mut self,
        key: &str,
        channel: Channel,
        state: &ChannelState,
    ) -> Result<(), HalError> {
        if self.fail_on_key.as_deref() == Some(key) {
            return Err(HalError::Disconnected);
        }
        self.ops.lock().unwrap().push(MockOp::SetChannel {
            key: key.to_string(),
            channel,
            state: state.clone(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), HalError> {
        if self.fail_commit {
            return Err(HalError::Disconnected);
        }
        self.ops.lock().unwrap().push(MockOp::Commit);
        Ok(())
    }

    fn close(&mut self) {
        self.ops.lock().unwrap().push(MockOp::Close);
    }
}

/// Opener handing out mock devices built by a factory closure. Clones
/// share the factory and the op log of the most recently claimed device,
/// so a test can keep a handle while the reconciler owns the opener.
#[derive(Clone)]
pub struct MockOpener {
    factory: Arc<dyn Fn() -> MockKeyLights + Send + Sync>,
    fail_claim: bool,
    last_ops: Arc<Mutex<Option<Arc<Mutex<Vec<MockOp>>>>>>,
}

impl MockOpener {
    pub fn new(factory: impl Fn() -> MockKeyLights + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            fail_claim: false,
            last_ops: Arc::new(Mutex::new(None)),
        }
    }

    /// Make every `claim` fail, as if no device were present.
    pub fn fail_claim(mut self) -> Self {
        self.fail_claim = true;
        self
    }

    /// Snapshot of the op log of the most recently claimed device. Empty
    /// if nothing has been claimed yet.
    pub fn last_ops(&self) -> Vec<MockOp> {
        self.last_ops
            .lock()
            .unwrap()
            .as_ref()
            .map(|ops| ops.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

impl DeviceOpener for MockOpener {
    fn claim(&self) -> Result<Box<dyn KeyLights>, HalError> {
        if self.fail_claim {
            return Err(HalError::NotFound("mock device absent".to_string()));
        }
        let device = (self.factory)();
        *self.last_ops.lock().unwrap() = Some(Arc::clone(&device.ops));
        Ok(Box::new(device))
    }
}

/// Backend for running the daemon without hardware: accepts everything and
/// logs at debug level.
struct NullKeyLights;

impl KeyLights for NullKeyLights {
    fn initialize(&mut self) -> Result<FirmwareInfo, HalError> {
        Ok(FirmwareInfo {
            firmware: "virtual".to_string(),
        })
    }

    fn set_key_channel(
        &mut self,
        key: &str,
        channel: Channel,
        state: &ChannelState,
    ) -> Result<(), HalError> {
        tracing::debug!(key, channel = channel.as_str(), ?state, "set channel");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), HalError> {
        tracing::debug!("commit");
        Ok(())
    }

    fn close(&mut self) {}
}

/// Opener for the virtual backend.
pub struct NullOpener;

impl DeviceOpener for NullOpener {
    fn claim(&self) -> Result<Box<dyn KeyLights>, HalError> {
        Ok(Box::new(NullKeyLights))
    }
}
