// EXTERNAL PERFORMANCE-COUNTER COLLECTOR (§6)
// INVOKES A CHILD PROCESS NAMING THE PER-LC CGROUP PERF PATHS, PERIOD,
// FREQUENCY, CYCLE COUNT, AND CORE COUNT; PARSES ITS TAB-SEPARATED OUTPUT.

use std::process::Command;

use log::warn;

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct CollectedCounters {
    pub cycles: u64,
    pub instructions: u64,
    pub llc_misses: u64,
    pub llc_occupancy: u64,
    pub mbl: f64,
    pub mbr: f64,
}

pub struct CollectorRequest<'a> {
    pub binary: &'a str,
    pub perf_paths: &'a [String],
    pub period_ms: u64,
    pub frequency_hz: u64,
    pub cycles: u64,
    pub core_count: u32,
}

/// Runs the external collector and parses its stdout into one `CollectedCounters`
/// per container id. A nonzero exit is a transient failure (§7): the caller
/// skips this cycle's metrics update for every affected container.
pub fn collect(req: &CollectorRequest) -> Result<std::collections::HashMap<String, CollectedCounters>> {
    let output = Command::new(req.binary)
        .arg(req.perf_paths.join(","))
        .arg(req.period_ms.to_string())
        .arg(req.frequency_hz.to_string())
        .arg(req.cycles.to_string())
        .arg(req.core_count.to_string())
        .output()
        .map_err(|e| AgentError::Transient(format!("spawning counter collector: {e}")))?;

    if !output.status.success() {
        return Err(AgentError::Transient(format!(
            "counter collector exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_output(&stdout))
}

fn parse_output(text: &str) -> std::collections::HashMap<String, CollectedCounters> {
    let mut out: std::collections::HashMap<String, CollectedCounters> = std::collections::HashMap::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            continue;
        }
        let cid = fields[0];
        let metric = fields[1];
        let value_str = fields[3];
        let entry = out.entry(cid.to_string()).or_default();
        match metric {
            "cycles" => {
                if let Ok(v) = value_str.parse() {
                    entry.cycles = v;
                }
            }
            "instructions" => {
                if let Ok(v) = value_str.parse() {
                    entry.instructions = v;
                }
            }
            "LLC misses" => {
                if let Ok(v) = value_str.parse() {
                    entry.llc_misses = v;
                }
            }
            "LLC occupancy" => {
                if let Ok(v) = value_str.parse() {
                    entry.llc_occupancy = v;
                }
            }
            "Memory bandwidth local" => {
                if let Ok(v) = value_str.parse() {
                    entry.mbl = v;
                }
            }
            "Memory bandwidth remote" => {
                if let Ok(v) = value_str.parse() {
                    entry.mbr = v;
                }
            }
            other => warn!("unrecognized counter-collector metric name: {other}"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tab_separated_lines() {
        let text = "abc123\tcycles\t_\t1000000\nabc123\tinstructions\t_\t500000\nabc123\tLLC misses\t_\t42\n";
        let parsed = parse_output(text);
        let c = parsed.get("abc123").unwrap();
        assert_eq!(c.cycles, 1_000_000);
        assert_eq!(c.instructions, 500_000);
        assert_eq!(c.llc_misses, 42);
    }

    #[test]
    fn ignores_malformed_lines() {
        let text = "not enough fields\nabc\tcycles\t_\t10\n";
        let parsed = parse_output(text);
        assert_eq!(parsed.len(), 1);
    }
}
