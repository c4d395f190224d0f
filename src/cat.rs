// EXTERNAL CACHE-ALLOCATION TOOL COLLABORATOR (§6)
// INVOKES A CHILD PROCESS TO ATTACH PIDS TO CLASS-OF-SERVICE 1 AND SET ITS
// CACHE-WAY BITMASK.

use std::process::Command;

use crate::error::{AgentError, Result};

const COS: u32 = 1;

/// Joins `pids` into class-of-service `COS` and installs `bitmask` on it.
/// A missing PID set is a legitimate no-op, not an error (the resource has
/// nobody to restrict this cycle).
pub fn apply(pids: &[u32], bitmask: u32) -> Result<()> {
    if pids.is_empty() {
        return Ok(());
    }
    let pid_list = pids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");

    run("pqos", &["-a", &format!("llc:{COS}={pid_list}")])?;
    run("pqos", &["-e", &format!("llc:{COS}={:x}", bitmask)])
}

fn run(binary: &str, args: &[&str]) -> Result<()> {
    let status = Command::new(binary)
        .args(args)
        .status()
        .map_err(|e| AgentError::Transient(format!("spawning {binary}: {e}")))?;
    if !status.success() {
        return Err(AgentError::Transient(format!("{binary} exited with {status}")));
    }
    Ok(())
}
