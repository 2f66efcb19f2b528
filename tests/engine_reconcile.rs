//! Integration tests for the signal-to-hardware pipeline.
//!
//! These exercise the public building blocks end to end: mapping tables
//! resolve signal values into key changes, the reconciler diffs them
//! against device state, and the mock device records exactly what a real
//! backend would receive.

use keyglow::{AnimationMapper, MappingLibrary, SignalValue, StateReconciler};
use keyglow_hal::{KeyState, MockKeyLights, MockOp, MockOpener};

const TEST_MAPPINGS: &str = r#"
[[mapping]]
signal = "load"
min = 0.0
max = 100.0

[[mapping.ranges]]
start = 0.0
startInclusive = true
end = 50.0
endInclusive = true
animation = { effect = "solid", color = "00FF00" }

[[mapping.ranges]]
start = 50.0
startInclusive = false
end = 100.0
endInclusive = true
animation = { effect = "solidFlashing", color = "FF0000" }

[mapping.layouts."en-US"]
keyGroups = [["q"], ["w"], ["e"], ["r"]]
mode = "multi"
"#;

fn mapper() -> AnimationMapper {
    AnimationMapper::new(MappingLibrary::from_toml(TEST_MAPPINGS).unwrap())
}

fn connected() -> (StateReconciler, MockOpener) {
    let opener = MockOpener::new(|| MockKeyLights::new().0);
    let mut reconciler = StateReconciler::new(Box::new(opener.clone()));
    reconciler.device_attached();
    reconciler.device_settled();
    (reconciler, opener)
}

fn sent(ops: &[MockOp]) -> usize {
    ops.iter()
        .filter(|op| matches!(op, MockOp::SetChannel { .. }))
        .count()
}

fn commits(ops: &[MockOp]) -> usize {
    ops.iter().filter(|op| matches!(op, MockOp::Commit)).count()
}

// ── Signal value → device writes ──

#[test]
fn signal_update_reaches_the_device() {
    let mapper = mapper();
    let (mut reconciler, opener) = connected();

    let changes = mapper
        .resolve_signal_changes("load", SignalValue::Value(75.0), "en-US", &|_| {
            KeyState::all_off()
        })
        .unwrap();
    assert_eq!(changes.len(), 4);
    reconciler.process_key_changes(changes, true);

    // 4 keys x 3 channels, one commit.
    let ops = opener.last_ops();
    assert_eq!(sent(&ops), 12);
    assert_eq!(commits(&ops), 1);
}

#[test]
fn repeated_value_is_idempotent_on_the_wire() {
    let mapper = mapper();
    let (mut reconciler, opener) = connected();

    let resolve = |value: f64| {
        mapper
            .resolve_signal_changes("load", SignalValue::Value(value), "en-US", &|_| {
                KeyState::all_off()
            })
            .unwrap()
    };

    reconciler.process_key_changes(resolve(75.0), true);
    let after_first = sent(&opener.last_ops());

    reconciler.process_key_changes(resolve(75.0), true);
    assert_eq!(sent(&opener.last_ops()), after_first);
    assert_eq!(commits(&opener.last_ops()), 1);
}

#[test]
fn meter_step_touches_only_changed_keys() {
    let mapper = mapper();
    let (mut reconciler, opener) = connected();

    let resolve = |value: f64| {
        mapper
            .resolve_signal_changes("load", SignalValue::Value(value), "en-US", &|_| {
                KeyState::all_off()
            })
            .unwrap()
    };

    // 25% lights q; 50% additionally lights w with the same animation.
    reconciler.process_key_changes(resolve(25.0), true);
    let before = opener.last_ops().len();

    reconciler.process_key_changes(resolve(50.0), true);
    let ops = opener.last_ops();
    let touched: Vec<String> = ops[before..]
        .iter()
        .filter_map(|op| match op {
            MockOp::SetChannel { key, .. } => Some(key.clone()),
            _ => None,
        })
        .collect();
    // Only w's green channel moved from 0 to 255; everything else matched.
    assert_eq!(touched, vec!["w".to_string()]);
}

// ── Hotplug lifecycle ──

#[test]
fn reconnect_resends_full_state() {
    let mapper = mapper();
    let (mut reconciler, opener) = connected();

    let changes = mapper
        .resolve_signal_changes("load", SignalValue::Value(100.0), "en-US", &|_| {
            KeyState::all_off()
        })
        .unwrap();
    reconciler.process_key_changes(changes, true);
    let full = sent(&opener.last_ops());

    reconciler.device_detached();
    reconciler.device_attached();
    reconciler.device_settled();

    // Fresh device log: the unchanged wanted state goes out again in full.
    assert_eq!(sent(&opener.last_ops()), full);
}

#[test]
fn changes_while_disconnected_apply_on_connect() {
    let mapper = mapper();
    let opener = MockOpener::new(|| MockKeyLights::new().0);
    let mut reconciler = StateReconciler::new(Box::new(opener.clone()));

    let changes = mapper
        .resolve_signal_changes("load", SignalValue::Value(10.0), "en-US", &|_| {
            KeyState::all_off()
        })
        .unwrap();
    reconciler.process_key_changes(changes, true);
    assert!(opener.last_ops().is_empty());

    reconciler.device_attached();
    reconciler.device_settled();
    assert_eq!(sent(&opener.last_ops()), 12);
}

// ── NoSignal fallback ──

#[test]
fn no_signal_reverts_keys_to_profile_default() {
    let mapper = mapper();
    let (mut reconciler, opener) = connected();

    let resolve = |value: SignalValue| {
        mapper
            .resolve_signal_changes("load", value, "en-US", &|_| KeyState::all_off())
            .unwrap()
    };

    reconciler.process_key_changes(resolve(SignalValue::Value(100.0)), true);
    reconciler.process_key_changes(resolve(SignalValue::NoSignal), true);

    // Last writes per key are the all-off default.
    let snapshot = reconciler.wanted_snapshot();
    assert_eq!(snapshot.len(), 4);
    assert!(snapshot.iter().all(|c| c.data == KeyState::all_off()));
    assert!(commits(&opener.last_ops()) >= 2);
}

// ── Partial failure ──

#[test]
fn failure_mid_pass_retries_next_sync() {
    let mapper = mapper();
    let opener = MockOpener::new(|| MockKeyLights::new().0.fail_on_key("r"));
    let mut reconciler = StateReconciler::new(Box::new(opener.clone()));
    reconciler.device_attached();
    reconciler.device_settled();

    let changes = mapper
        .resolve_signal_changes("load", SignalValue::Value(100.0), "en-US", &|_| {
            KeyState::all_off()
        })
        .unwrap();
    reconciler.process_key_changes(changes, true);

    // Keys reconcile in sorted order: e and q succeed, r fails, w is
    // never reached; no commit was issued.
    let ops = opener.last_ops();
    assert_eq!(sent(&ops), 6);
    assert_eq!(commits(&ops), 0);

    // The next sync skips e and q, fails on r again.
    reconciler.sync();
    assert_eq!(sent(&opener.last_ops()), 6);
}
