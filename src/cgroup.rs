// CGROUP FILESYSTEM COLLABORATOR
// READS CPU ACCOUNTING/PERIOD AND WRITES QUOTA/SHARES UNDER THE DOCKER CPU
// CGROUP HIERARCHY. "FILE NOT FOUND" AND NON-INTEGER CONTENTS ARE TRANSIENT
// PER §7 -- THE CALLER SKIPS THIS CYCLE'S UPDATE RATHER THAN FAILING HARD.

use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};

/// Default root, used when no `--cgroup-root` override reaches this module.
pub const DEFAULT_CGROUP_CPU_ROOT: &str = "/sys/fs/cgroup/cpu/docker";

fn path_for(root: &Path, cid: &str, file: &str) -> PathBuf {
    root.join(cid).join(file)
}

fn read_u64(root: &Path, cid: &str, file: &str) -> Result<u64> {
    let path = path_for(root, cid, file);
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| AgentError::Transient(format!("reading {}: {e}", path.display())))?;
    contents
        .trim()
        .parse::<u64>()
        .map_err(|e| AgentError::Transient(format!("non-integer contents in {}: {e}", path.display())))
}

fn read_i64(root: &Path, cid: &str, file: &str) -> Result<i64> {
    let path = path_for(root, cid, file);
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| AgentError::Transient(format!("reading {}: {e}", path.display())))?;
    contents
        .trim()
        .parse::<i64>()
        .map_err(|e| AgentError::Transient(format!("non-integer contents in {}: {e}", path.display())))
}

fn write_i64(root: &Path, cid: &str, file: &str, value: i64) -> Result<()> {
    let path = path_for(root, cid, file);
    std::fs::write(&path, value.to_string())
        .map_err(|e| AgentError::Transient(format!("writing {}: {e}", path.display())))
}

pub fn read_cpuacct_usage(root: &Path, cid: &str) -> Result<u64> {
    read_u64(root, cid, "cpuacct.usage")
}

pub fn read_cfs_period(root: &Path, cid: &str) -> Result<i64> {
    read_i64(root, cid, "cpu.cfs_period_us")
}

pub fn write_cfs_quota(root: &Path, cid: &str, value: i64) -> Result<()> {
    write_i64(root, cid, "cpu.cfs_quota_us", value)
}

pub fn write_cpu_shares(root: &Path, cid: &str, value: i64) -> Result<()> {
    write_i64(root, cid, "cpu.shares", value)
}
