// CONTAINER DISCOVERY (AMBIENT, §4.F.1)
// EXPRESSED AS A TRAIT SO A REAL DOCKER/CONTAINERD BACKEND CAN REPLACE THE
// CONCRETE CGROUP-DIRECTORY DRIVER WITHOUT TOUCHING DETECTION OR CONTROL.

use std::path::PathBuf;

use crate::error::{AgentError, Result};

#[derive(Debug, Clone)]
pub struct DiscoveredContainer {
    pub id: String,
    pub name: String,
    pub pids: Vec<u32>,
}

pub trait ContainerDiscovery {
    fn list(&self) -> Result<Vec<DiscoveredContainer>>;
}

/// Lists immediate subdirectories of `cpu_root` (default
/// `/sys/fs/cgroup/cpu/docker`), treating each directory name as the
/// container id. Reads an optional sibling `<id>.name` file for the display
/// name, falling back to the id. Reads `cgroup.procs` under the matching
/// `perf_event` hierarchy for the pid set; an empty or unreadable file
/// yields an empty pid set rather than an error.
pub struct CgroupDirectoryDiscovery {
    cpu_root: PathBuf,
    perf_event_root: PathBuf,
}

impl CgroupDirectoryDiscovery {
    pub fn new(cpu_root: impl Into<PathBuf>) -> Self {
        let cpu_root = cpu_root.into();
        let perf_event_root = PathBuf::from("/sys/fs/cgroup/perf_event/docker");
        Self { cpu_root, perf_event_root }
    }

    pub fn default_root() -> Self {
        Self::new(crate::cgroup::DEFAULT_CGROUP_CPU_ROOT)
    }

    fn read_name(&self, id: &str) -> String {
        let name_file = self.cpu_root.join(format!("{id}.name"));
        std::fs::read_to_string(&name_file)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| id.to_string())
    }

    fn read_pids(&self, id: &str) -> Vec<u32> {
        let procs_file = self.perf_event_root.join(id).join("cgroup.procs");
        std::fs::read_to_string(&procs_file)
            .map(|s| s.lines().filter_map(|l| l.trim().parse().ok()).collect())
            .unwrap_or_default()
    }
}

impl ContainerDiscovery for CgroupDirectoryDiscovery {
    fn list(&self) -> Result<Vec<DiscoveredContainer>> {
        let entries = match std::fs::read_dir(&self.cpu_root) {
            Ok(e) => e,
            Err(e) => {
                return Err(AgentError::Transient(format!(
                    "reading {}: {e}",
                    self.cpu_root.display()
                )))
            }
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| AgentError::Transient(format!("reading directory entry: {e}")))?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            let name = self.read_name(&id);
            let pids = self.read_pids(&id);
            out.push(DiscoveredContainer { id, name, pids });
        }
        Ok(out)
    }
}

/// Test/fixture-only discovery driver backed by an in-memory list, used by
/// the monitor loop's own tests so they don't depend on a live cgroup tree.
pub struct StaticDiscovery(pub Vec<DiscoveredContainer>);

impl ContainerDiscovery for StaticDiscovery {
    fn list(&self) -> Result<Vec<DiscoveredContainer>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_root_is_transient() {
        let d = CgroupDirectoryDiscovery::new("/nonexistent/cgroup/root");
        assert!(matches!(d.list(), Err(AgentError::Transient(_))));
    }

    #[test]
    fn static_discovery_returns_fixed_list() {
        let d = StaticDiscovery(vec![DiscoveredContainer {
            id: "abc".into(),
            name: "redis".into(),
            pids: vec![1, 2],
        }]);
        let listed = d.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "redis");
    }
}
