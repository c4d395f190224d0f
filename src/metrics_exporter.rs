// METRICS EXPORTER (COMPONENT G / §4.F.2)
// A BACKGROUND THREAD RUNNING A MINIMAL SYNCHRONOUS HTTP SERVER. THE MONITOR
// LOOPS PUSH GAUGE UPDATES INTO A MUTEX-GUARDED MAP; THE HTTP HANDLER RENDERS
// THE FULL MAP AS PROMETHEUS TEXT EXPOSITION ON EVERY GET /metrics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, warn};
use tiny_http::{Response, Server};

pub const GAUGE_NAMES: &[&str] = &[
    "cpu_usage_percentage",
    "llc_misses",
    "unhalted_cycles",
    "instructions",
    "average_frequency",
    "memory_bandwidth",
    "llc_occupancy",
    "llc_occupancy_bytes",
    "contention_llc_detected",
    "contention_other_detected",
    "contention_tdp_detected",
];

type GaugeKey = (String, String);

#[derive(Clone)]
pub struct MetricsExporter {
    gauges: Arc<Mutex<HashMap<GaugeKey, f64>>>,
}

impl MetricsExporter {
    pub fn new() -> Self {
        Self { gauges: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn set(&self, metric_name: &str, container_name: &str, value: f64) {
        let mut gauges = self.gauges.lock().expect("metrics mutex poisoned");
        gauges.insert((metric_name.to_string(), container_name.to_string()), value);
    }

    fn render(&self) -> String {
        let gauges = self.gauges.lock().expect("metrics mutex poisoned");
        let mut out = String::new();
        for ((metric, container), value) in gauges.iter() {
            out.push_str(&format!("{metric}{{container=\"{container}\"}} {value}\n"));
        }
        out
    }

    /// Spawns the daemon-style export thread bound to `port`. Per §5.1 the
    /// thread is not explicitly joined on shutdown; an in-flight response is
    /// allowed to finish and the process exit tears the listener down.
    pub fn spawn(self, port: u16) {
        thread::spawn(move || {
            let server = match Server::http(format!("0.0.0.0:{port}")) {
                Ok(s) => s,
                Err(e) => {
                    error!("metrics exporter failed to bind port {port}: {e}");
                    return;
                }
            };
            for request in server.incoming_requests() {
                let body = self.render();
                let response = Response::from_string(body)
                    .with_header("Content-Type: text/plain; version=0.0.4".parse::<tiny_http::Header>().unwrap());
                if let Err(e) = request.respond(response) {
                    warn!("metrics exporter failed to respond: {e}");
                }
            }
        });
    }
}

impl Default for MetricsExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_set_gauges() {
        let exporter = MetricsExporter::new();
        exporter.set("cpu_usage_percentage", "redis", 42.5);
        let rendered = exporter.render();
        assert!(rendered.contains("cpu_usage_percentage"));
        assert!(rendered.contains("redis"));
        assert!(rendered.contains("42.5"));
    }

    #[test]
    fn overwrites_same_key() {
        let exporter = MetricsExporter::new();
        exporter.set("llc_misses", "redis", 1.0);
        exporter.set("llc_misses", "redis", 2.0);
        let rendered = exporter.render();
        assert_eq!(rendered.matches("llc_misses").count(), 1);
        assert!(rendered.contains(" 2"));
    }
}
