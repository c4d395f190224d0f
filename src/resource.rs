// RESOURCE ABSTRACTION (COMPONENT D)
// TWO CONCRETE RESOURCES, CPU-QUOTA AND LLC-MASK, SHARING A COMMON BUDGET
// LEVEL MODEL: MIN=0 .. MAX=20, FULL=-1 "UNRESTRICTED" SENTINEL.

use std::path::PathBuf;

use crate::cgroup;
use crate::container::ContainerRecord;
use crate::error::Result;

pub const MIN_LEVEL: i32 = 0;
pub const MAX_LEVEL: i32 = 20;
pub const FULL_LEVEL: i32 = -1;

pub const SHARE_LC: i64 = 200_000;
pub const SHARE_BE: i64 = 2;

const LLC_MASKS: [u32; 20] = [
    0x1, 0x3, 0x7, 0xf, 0x1f, 0x3f, 0x7f, 0xff, 0x1ff, 0x3ff, 0x7ff, 0xfff, 0x1fff, 0x3fff,
    0x7fff, 0xffff, 0x1ffff, 0x3ffff, 0x7ffff, 0xfffff,
];

fn bump(level: i32) -> i32 {
    if level == FULL_LEVEL {
        return FULL_LEVEL;
    }
    let next = level + 1;
    if next >= MAX_LEVEL {
        FULL_LEVEL
    } else {
        next
    }
}

/// CPU-cycle quota resource. `quota_max`/`quota_step` are derived from the
/// observed system-wide LC max utilization (§4.D) and refreshed whenever that
/// max grows.
pub struct CpuQuota {
    level: i32,
    quota_max: f64,
    quota_step: f64,
    margin_ratio: f64,
    cgroup_root: PathBuf,
}

impl CpuQuota {
    pub fn new(system_max_util: f64, margin_ratio: f64) -> Self {
        Self::with_root(system_max_util, margin_ratio, cgroup::DEFAULT_CGROUP_CPU_ROOT)
    }

    pub fn with_root(system_max_util: f64, margin_ratio: f64, cgroup_root: impl Into<PathBuf>) -> Self {
        let quota_max = system_max_util * 1000.0;
        Self {
            level: MIN_LEVEL,
            quota_max,
            quota_step: quota_max / 20.0,
            margin_ratio,
            cgroup_root: cgroup_root.into(),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn is_min_level(&self) -> bool {
        self.level == MIN_LEVEL
    }

    pub fn is_full_level(&self) -> bool {
        self.level == FULL_LEVEL
    }

    /// Recomputes `quota_max`/`quota_step` from a new system-max observation.
    pub fn refresh_system_max(&mut self, system_max_util: f64) {
        self.quota_max = system_max_util * 1000.0;
        self.quota_step = self.quota_max / 20.0;
    }

    pub fn set_level(&mut self, level: i32) {
        self.level = level;
    }

    pub fn increase_level(&mut self) {
        self.level = bump(self.level);
    }

    fn platform_quota(&self) -> i64 {
        if self.level == FULL_LEVEL {
            -1
        } else if self.level == MIN_LEVEL {
            1000
        } else {
            (self.level as f64 * self.quota_step.floor()) as i64
        }
    }

    /// Divides the current quota equally across `containers` (integer floor);
    /// at MIN/FULL the shared platform quota is written unchanged to each.
    /// The per-container value is rescaled by that container's own CFS period
    /// so that `written = quota * period / 100000`.
    pub fn budgeting(&self, containers: &[&ContainerRecord]) -> Result<()> {
        if containers.is_empty() {
            return Ok(());
        }
        let platform = self.platform_quota();
        let per_container = if self.level == MIN_LEVEL || self.level == FULL_LEVEL {
            None
        } else {
            Some(platform / containers.len() as i64)
        };

        for c in containers {
            let quota = per_container.unwrap_or(platform);
            let written = if self.level == MIN_LEVEL || self.level == FULL_LEVEL {
                quota
            } else {
                let period = cgroup::read_cfs_period(&self.cgroup_root, &c.cid)?;
                quota * period / 100_000
            };
            cgroup::write_cfs_quota(&self.cgroup_root, &c.cid, written)?;
        }
        Ok(())
    }

    pub fn set_share(&self, cid: &str, share: i64) -> Result<()> {
        cgroup::write_cpu_shares(&self.cgroup_root, cid, share)
    }

    /// Returns (exceed, hold) per §4.D.
    pub fn detect_margin_exceed(&self, lc_util: f64, be_util: f64) -> (bool, bool) {
        let margin = 100_000.0 * self.margin_ratio;
        let exceed = lc_util == 0.0 || ((lc_util + be_util) * 1000.0 + margin > self.quota_max);
        let hold = (lc_util + be_util) * 1000.0 + margin + self.quota_step >= self.quota_max;
        (exceed, hold)
    }
}

/// LLC cache-way mask resource.
pub struct LlcMask {
    level: i32,
}

impl LlcMask {
    pub fn new() -> Self {
        Self { level: MIN_LEVEL }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn is_min_level(&self) -> bool {
        self.level == MIN_LEVEL
    }

    pub fn is_full_level(&self) -> bool {
        self.level == FULL_LEVEL
    }

    pub fn set_level(&mut self, level: i32) {
        self.level = level;
    }

    pub fn increase_level(&mut self) {
        self.level = bump(self.level);
    }

    fn bitmask(&self) -> u32 {
        if self.level == FULL_LEVEL || self.level < 0 || self.level as usize >= LLC_MASKS.len() {
            *LLC_MASKS.last().unwrap()
        } else {
            LLC_MASKS[self.level as usize]
        }
    }

    /// Joins all containers' PIDs into class-of-service 1 and installs the
    /// level's bitmask via the external allocation tool.
    pub fn budgeting(&self, containers: &[&ContainerRecord]) -> Result<()> {
        let pids: Vec<u32> = containers.iter().flat_map(|c| c.pids.clone()).collect();
        crate::cat::apply(&pids, self.bitmask())
    }
}

impl Default for LlcMask {
    fn default() -> Self {
        Self::new()
    }
}
