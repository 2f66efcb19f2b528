//! State reconciler: drive the hardware toward the wanted per-key state.
//!
//! Wanted state is the merge target for profile baseline and signal
//! overlays, last write wins per key. Current state mirrors what has been
//! sent to the device and is discarded wholesale on disconnect so a
//! reconnect resyncs every key. A pass sends only channels that differ,
//! then one commit.

use std::collections::BTreeMap;

use keyglow_hal::{Channel, DeviceOpener, HalError, KeyLights, KeyState, StateChangeRequest};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Disconnected,
    /// Attach seen, settle delay running.
    Connecting,
    Connected,
}

pub struct StateReconciler {
    opener: Box<dyn DeviceOpener>,
    device: Option<Box<dyn KeyLights>>,
    connectivity: Connectivity,
    firmware: Option<String>,
    wanted: BTreeMap<String, KeyState>,
    current: BTreeMap<String, KeyState>,
    dirty: bool,
}

impl StateReconciler {
    pub fn new(opener: Box<dyn DeviceOpener>) -> Self {
        Self {
            opener,
            device: None,
            connectivity: Connectivity::Disconnected,
            firmware: None,
            wanted: BTreeMap::new(),
            current: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    /// Snapshot of the wanted state, used when capturing a profile.
    pub fn wanted_snapshot(&self) -> Vec<StateChangeRequest> {
        self.wanted
            .iter()
            .map(|(key, data)| StateChangeRequest {
                key: key.clone(),
                data: data.clone(),
            })
            .collect()
    }

    /// Merge changes into wanted state, marking dirty only for keys whose
    /// merged value actually differs. With `sync` a pass runs immediately;
    /// otherwise the change waits for the next tick.
    pub fn process_key_changes(&mut self, changes: Vec<StateChangeRequest>, sync: bool) {
        for change in changes {
            if self.wanted.get(&change.key) != Some(&change.data) {
                self.wanted.insert(change.key, change.data);
                self.dirty = true;
            }
        }
        if sync {
            self.sync();
        }
    }

    /// One reconciliation pass. No-op unless dirty and connected. Errors
    /// are logged and leave the dirty flag set so the next tick retries;
    /// channels sent before the error stay recorded in current state.
    pub fn sync(&mut self) {
        if !self.dirty || self.connectivity != Connectivity::Connected {
            return;
        }
        match self.run_pass() {
            Ok(sent) => {
                self.dirty = false;
                if sent > 0 {
                    debug!("reconciled {sent} channel(s)");
                }
            }
            Err(e) => warn!("reconciliation pass failed, will retry: {e}"),
        }
    }

    fn run_pass(&mut self) -> Result<usize, HalError> {
        let Some(device) = self.device.as_mut() else {
            return Err(HalError::Disconnected);
        };

        let mut sent = 0;
        for (key, wanted) in &self.wanted {
            for channel in Channel::ALL {
                let wanted_channel = wanted.channel(channel);
                let current = self.current.get(key);
                if current.map(|c| c.channel(channel)) == Some(wanted_channel) {
                    continue;
                }
                device.set_key_channel(key, channel, wanted_channel)?;
                self.current
                    .entry(key.clone())
                    .or_default()
                    .channel_mut(channel)
                    .clone_from(wanted_channel);
                sent += 1;
            }
        }

        if sent > 0 {
            device.commit()?;
        }
        Ok(sent)
    }

    /// Attach notification. The caller schedules the settle delay and then
    /// calls [`device_settled`](Self::device_settled).
    pub fn device_attached(&mut self) {
        if self.connectivity == Connectivity::Disconnected {
            info!("device attached, waiting for it to settle");
            self.connectivity = Connectivity::Connecting;
        }
    }

    /// Settle delay elapsed: claim and initialize. Failure logs and falls
    /// back to Disconnected; a later attach retries.
    pub fn device_settled(&mut self) {
        if self.connectivity != Connectivity::Connecting {
            return;
        }
        match self.claim_and_initialize() {
            Ok(firmware) => {
                info!("device ready, firmware {firmware}");
                self.firmware = Some(firmware);
                self.connectivity = Connectivity::Connected;
                // Force a full resync of everything we want lit.
                self.current.clear();
                self.dirty = true;
                self.sync();
            }
            Err(e) => {
                warn!("device initialization failed: {e}");
                self.device = None;
                self.connectivity = Connectivity::Disconnected;
            }
        }
    }

    fn claim_and_initialize(&mut self) -> Result<String, HalError> {
        let mut device = self.opener.claim()?;
        let info = device.initialize()?;
        self.device = Some(device);
        Ok(info.firmware)
    }

    /// Detach notification: release the handle and forget what the device
    /// was showing.
    pub fn device_detached(&mut self) {
        info!("device detached");
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        self.connectivity = Connectivity::Disconnected;
        self.firmware = None;
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyglow_hal::{ChannelState, MockKeyLights, MockOp, MockOpener};

    fn red(level: f64) -> KeyState {
        KeyState {
            red: ChannelState::hold_at(level),
            ..KeyState::all_off()
        }
    }

    fn change(key: &str, data: KeyState) -> StateChangeRequest {
        StateChangeRequest {
            key: key.to_string(),
            data,
        }
    }

    fn connected_reconciler() -> (StateReconciler, MockOpener) {
        let opener = MockOpener::new(|| MockKeyLights::new().0);
        let mut reconciler = StateReconciler::new(Box::new(opener.clone()));
        reconciler.device_attached();
        reconciler.device_settled();
        assert_eq!(reconciler.connectivity(), Connectivity::Connected);
        (reconciler, opener)
    }

    fn sent_channels(ops: &[MockOp]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, MockOp::SetChannel { .. }))
            .count()
    }

    #[test]
    fn idempotent_sync_sends_nothing_twice() {
        let (mut reconciler, opener) = connected_reconciler();
        reconciler.process_key_changes(vec![change("a", red(255.0))], true);

        let after_first = sent_channels(&opener.last_ops());
        assert!(after_first > 0);
        assert!(opener
            .last_ops()
            .iter()
            .any(|op| matches!(op, MockOp::Commit)));

        reconciler.process_key_changes(vec![change("a", red(255.0))], true);
        assert_eq!(sent_channels(&opener.last_ops()), after_first);
    }

    #[test]
    fn only_differing_channels_are_sent() {
        let (mut reconciler, opener) = connected_reconciler();
        reconciler.process_key_changes(vec![change("a", red(100.0))], true);
        let baseline = sent_channels(&opener.last_ops());

        // Only the red channel changes.
        reconciler.process_key_changes(vec![change("a", red(200.0))], true);
        assert_eq!(sent_channels(&opener.last_ops()), baseline + 1);
    }

    #[test]
    fn no_commit_when_nothing_differs() {
        let (mut reconciler, opener) = connected_reconciler();
        reconciler.process_key_changes(vec![change("a", red(255.0))], true);
        let commits = |ops: &[MockOp]| {
            ops.iter()
                .filter(|op| matches!(op, MockOp::Commit))
                .count()
        };
        assert_eq!(commits(&opener.last_ops()), 1);

        reconciler.dirty = true;
        reconciler.sync();
        assert_eq!(commits(&opener.last_ops()), 1);
    }

    #[test]
    fn async_changes_wait_for_tick() {
        let (mut reconciler, opener) = connected_reconciler();
        reconciler.process_key_changes(vec![change("a", red(255.0))], false);
        assert_eq!(sent_channels(&opener.last_ops()), 0);

        reconciler.sync();
        assert!(sent_channels(&opener.last_ops()) > 0);
    }

    #[test]
    fn disconnect_then_reconnect_resends_everything() {
        let (mut reconciler, opener) = connected_reconciler();
        reconciler.process_key_changes(
            vec![change("a", red(255.0)), change("b", red(10.0))],
            true,
        );
        let first = sent_channels(&opener.last_ops());

        reconciler.device_detached();
        assert_eq!(reconciler.connectivity(), Connectivity::Disconnected);
        assert!(reconciler.firmware().is_none());

        reconciler.device_attached();
        reconciler.device_settled();
        // Unchanged wanted state: every channel of every key goes out again.
        assert_eq!(sent_channels(&opener.last_ops()), first);
    }

    #[test]
    fn partial_failure_keeps_applied_channels_and_dirty_flag() {
        let opener = MockOpener::new(|| MockKeyLights::new().0.fail_on_key("b"));
        let mut reconciler = StateReconciler::new(Box::new(opener.clone()));
        reconciler.device_attached();
        reconciler.device_settled();

        reconciler.process_key_changes(
            vec![change("a", red(255.0)), change("b", red(10.0))],
            true,
        );
        // "a" sorts before "b": its channels were sent and recorded.
        assert_eq!(sent_channels(&opener.last_ops()), 3);
        assert!(reconciler.dirty);
        assert_eq!(reconciler.current.get("a"), Some(&red(255.0)));
        assert!(reconciler.current.get("b").is_none());
    }

    #[test]
    fn unchanged_merge_does_not_mark_dirty() {
        let (mut reconciler, opener) = connected_reconciler();
        reconciler.process_key_changes(vec![change("a", red(255.0))], true);
        assert!(!reconciler.dirty);
        let baseline = sent_channels(&opener.last_ops());

        // Re-merging the identical state leaves the pass with nothing to
        // scan on the next tick.
        reconciler.process_key_changes(vec![change("a", red(255.0))], false);
        assert!(!reconciler.dirty);
        reconciler.sync();
        assert_eq!(sent_channels(&opener.last_ops()), baseline);
    }

    #[test]
    fn commit_failure_keeps_dirty_flag() {
        let opener = MockOpener::new(|| MockKeyLights::new().0.fail_commit());
        let mut reconciler = StateReconciler::new(Box::new(opener.clone()));
        reconciler.device_attached();
        reconciler.device_settled();

        reconciler.process_key_changes(vec![change("a", red(255.0))], true);
        // Channels went out but the batch never became visible; retry.
        assert_eq!(sent_channels(&opener.last_ops()), 3);
        assert!(reconciler.dirty);
    }

    #[test]
    fn sync_while_disconnected_is_a_no_op() {
        let opener = MockOpener::new(|| MockKeyLights::new().0);
        let mut reconciler = StateReconciler::new(Box::new(opener.clone()));
        reconciler.process_key_changes(vec![change("a", red(255.0))], true);
        assert!(opener.last_ops().is_empty());
        assert!(reconciler.dirty);
    }

    #[test]
    fn failed_claim_stays_disconnected() {
        let opener = MockOpener::new(|| MockKeyLights::new().0).fail_claim();
        let mut reconciler = StateReconciler::new(Box::new(opener));
        reconciler.device_attached();
        reconciler.device_settled();
        assert_eq!(reconciler.connectivity(), Connectivity::Disconnected);
    }

    #[test]
    fn wanted_snapshot_reflects_last_write_per_key() {
        let (mut reconciler, _opener) = connected_reconciler();
        reconciler.process_key_changes(vec![change("a", red(10.0))], false);
        reconciler.process_key_changes(vec![change("a", red(90.0))], false);
        let snapshot = reconciler.wanted_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].data, red(90.0));
    }
}
