//! Built-in signal providers.
//!
//! All values are percentages in [0, 100] so they share the default
//! mapping scale. CPU readings need two samples to form a delta and report
//! `NoSignal` until then.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use super::{PluginSignal, SignalPlugin, SignalSink, SignalSource, SignalValue};

const CPU_INTERVAL: Duration = Duration::from_secs(1);
const MEMORY_INTERVAL: Duration = Duration::from_secs(5);
const TIME_INTERVAL: Duration = Duration::from_secs(60);

/// The provider set compiled into the daemon. Registered at startup the
/// same way an external plugin would be.
pub fn built_in_plugin() -> SignalPlugin {
    SignalPlugin {
        name: "built-in".to_string(),
        signals: vec![
            cpu_utilization(),
            cpu_utilization_max(),
            memory_utilization(),
            time_of_day(),
        ],
    }
}

/// (busy, total) jiffy counters per `cpu` line, aggregate first.
fn read_cpu_counters() -> Option<Vec<(u64, u64)>> {
    let stat = std::fs::read_to_string("/proc/stat").ok()?;
    let mut counters = Vec::new();
    for line in stat.lines() {
        if !line.starts_with("cpu") {
            break;
        }
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 5 {
            return None;
        }
        let total: u64 = fields.iter().sum();
        let idle = fields[3] + fields[4];
        counters.push((total - idle, total));
    }
    if counters.is_empty() {
        None
    } else {
        Some(counters)
    }
}

fn cpu_percentages(prev: &[(u64, u64)], next: &[(u64, u64)]) -> Vec<f64> {
    prev.iter()
        .zip(next)
        .map(|(&(pb, pt), &(nb, nt))| {
            let total = nt.saturating_sub(pt);
            if total == 0 {
                0.0
            } else {
                nb.saturating_sub(pb) as f64 / total as f64 * 100.0
            }
        })
        .collect()
}

fn cpu_signal(
    name: &str,
    description: &str,
    pick: impl Fn(&[f64]) -> f64 + Send + 'static,
) -> PluginSignal {
    let mut prev: Option<Vec<(u64, u64)>> = None;
    PluginSignal {
        name: name.to_string(),
        description: Some(description.to_string()),
        tags: vec!["cpu".to_string(), "system".to_string()],
        source: SignalSource::Polling {
            interval: CPU_INTERVAL,
            poll: Arc::new(Mutex::new(move || {
                let Some(next) = read_cpu_counters() else {
                    prev = None;
                    return SignalValue::NoSignal;
                };
                let value = match &prev {
                    Some(last) if last.len() == next.len() => {
                        SignalValue::Value(pick(&cpu_percentages(last, &next)))
                    }
                    _ => SignalValue::NoSignal,
                };
                prev = Some(next);
                value
            })),
        },
    }
}

fn cpu_utilization() -> PluginSignal {
    cpu_signal(
        "cpu_utilization",
        "Overall CPU utilization in percent",
        |p| p.first().copied().unwrap_or(0.0),
    )
}

fn cpu_utilization_max() -> PluginSignal {
    // Skip the aggregate line; the busiest single core is the reading.
    cpu_signal(
        "cpu_utilization_max",
        "Utilization of the busiest CPU core in percent",
        |p| p.iter().skip(1).copied().fold(0.0, f64::max),
    )
}

fn read_memory_percent() -> SignalValue {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return SignalValue::NoSignal;
    };
    let field = |key: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    match (field("MemTotal:"), field("MemAvailable:")) {
        (Some(total), Some(available)) if total > 0.0 => {
            SignalValue::Value((total - available) / total * 100.0)
        }
        _ => SignalValue::NoSignal,
    }
}

fn memory_utilization() -> PluginSignal {
    PluginSignal {
        name: "memory_utilization".to_string(),
        description: Some("Memory in use in percent".to_string()),
        tags: vec!["memory".to_string(), "system".to_string()],
        source: SignalSource::PollingCallback {
            interval: MEMORY_INTERVAL,
            poll: Arc::new(Mutex::new(|sink: SignalSink| {
                let spawned = std::thread::Builder::new()
                    .name("meminfo".to_string())
                    .spawn(move || sink.send(read_memory_percent()));
                if let Err(e) = spawned {
                    warn!("meminfo reader: {e}");
                }
            })),
        },
    }
}

fn time_of_day() -> PluginSignal {
    PluginSignal {
        name: "time_of_day".to_string(),
        description: Some("Fraction of the UTC day elapsed, in percent".to_string()),
        tags: vec!["time".to_string()],
        source: SignalSource::Polling {
            interval: TIME_INTERVAL,
            poll: Arc::new(Mutex::new(|| match SystemTime::now().duration_since(UNIX_EPOCH) {
                Ok(since) => {
                    let of_day = since.as_secs() % 86_400;
                    SignalValue::Value(of_day as f64 / 86_400.0 * 100.0)
                }
                Err(_) => SignalValue::NoSignal,
            })),
        },
    }
}
