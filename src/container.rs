// CONTAINER RECORD (COMPONENT C)
// HOLDS ONE TASK'S IDENTITY, ROLLING COUNTER HISTORY, THRESHOLDS, AND THE
// BIN-LOOKUP + DETECTION LOGIC DESCRIBED IN §4.C.

use std::collections::VecDeque;

pub const DEFAULT_HISTORY_DEPTH: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Contention {
    Unkn,
    CpuCyc,
    Llc,
    MemBw,
    Tdp,
}

#[derive(Clone, Copy, Debug)]
pub struct ThresholdBin {
    pub util_start: f64,
    pub util_end: f64,
    pub cpi_upper: f64,
    pub mpki_upper: f64,
    pub mb_lower: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct ThermalRow {
    pub util_floor: f64,
    pub mean: f64,
    pub stddev: f64,
    pub freq_bar: f64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSnapshot {
    pub instructions: u64,
    pub cycles: u64,
    pub llc_misses: u64,
    pub llc_occupancy: u64,
    pub mbl: f64,
    pub mbr: f64,
    pub cpi: f64,
    pub mpki: f64,
    pub nf: f64,
}

pub struct ContainerRecord {
    pub cid: String,
    pub name: String,
    pub pids: Vec<u32>,

    cpu_time_ns: u64,
    wall_ns: u128,
    pub util: f64,

    pub metrics: MetricsSnapshot,
    history: VecDeque<MetricsSnapshot>,
    history_cap: usize,

    pub bins: Vec<ThresholdBin>,
    pub thermal: Option<ThermalRow>,
}

impl ContainerRecord {
    pub fn new(cid: String, name: String, pids: Vec<u32>, history_depth: usize) -> Self {
        Self {
            cid,
            name,
            pids,
            cpu_time_ns: 0,
            wall_ns: 0,
            util: 0.0,
            metrics: MetricsSnapshot::default(),
            history: VecDeque::with_capacity(history_depth + 1),
            history_cap: history_depth + 1,
            bins: Vec::new(),
            thermal: None,
        }
    }

    pub fn update_pids(&mut self, pids: Vec<u32>) {
        self.pids = pids;
    }

    /// `cpu_time_ns` is the container's cumulative CPU time; `wall_ns` is the
    /// wall-clock timestamp of the sample. The first sample only seeds state
    /// (there is no preceding sample to delta against), matching §4.F.
    pub fn update_utilization(&mut self, cpu_time_ns: u64, wall_ns: u128) {
        if self.cpu_time_ns != 0 {
            let d_cpu = cpu_time_ns.saturating_sub(self.cpu_time_ns) as f64;
            let d_wall = wall_ns.saturating_sub(self.wall_ns) as f64;
            if d_wall > 0.0 {
                self.util = d_cpu * 100.0 / d_wall;
            }
        }
        self.cpu_time_ns = cpu_time_ns;
        self.wall_ns = wall_ns;
    }

    /// Recomputes CPI/MPKI/NF from the raw counters currently in `self.metrics`.
    /// CPI and MPKI are zero when instructions = 0; NF is zero when util = 0.
    pub fn recompute_derived(&mut self, metric_interval_secs: u64) {
        let util = self.util;
        let m = &mut self.metrics;
        if m.instructions == 0 {
            m.cpi = 0.0;
            m.mpki = 0.0;
        } else {
            m.cpi = m.cycles as f64 / m.instructions as f64;
            m.mpki = m.llc_misses as f64 * 1000.0 / m.instructions as f64;
        }
        if util == 0.0 {
            m.nf = 0.0;
        } else {
            m.nf = (m.cycles as f64 / metric_interval_secs as f64 / 10_000.0 / util).trunc();
        }
    }

    pub fn push_history(&mut self) {
        if self.history.len() == self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(self.metrics);
    }

    fn history_delta<F: Fn(&MetricsSnapshot) -> f64>(&self, f: F) -> f64 {
        let len = self.history.len();
        if len == 0 {
            return 0.0;
        }
        if len == 1 {
            return f(&self.history[0]);
        }
        let latest = f(&self.history[len - 1]);
        let preceding_sum: f64 = self.history.iter().take(len - 1).map(&f).sum();
        latest - preceding_sum / (len - 1) as f64
    }

    pub fn llc_occupancy_delta(&self) -> f64 {
        self.history_delta(|s| s.llc_occupancy as f64)
    }

    pub fn freq_delta(&self) -> f64 {
        self.history_delta(|s| s.nf)
    }

    pub fn latest_mb_total(&self) -> f64 {
        self.metrics.mbl + self.metrics.mbr
    }

    fn detect_in_bin(&self, bin: &ThresholdBin) -> Option<Contention> {
        let m = &self.metrics;
        if m.cpi > bin.cpi_upper {
            if m.mpki > bin.mpki_upper {
                return Some(Contention::Llc);
            }
            if (m.mbl + m.mbr) < bin.mb_lower {
                return Some(Contention::MemBw);
            }
            return Some(Contention::Unkn);
        }
        None
    }

    /// Locate the applicable utilization bin and classify against it (§4.C).
    /// f64 comparisons against NaN are always false, so a NaN live value
    /// naturally falls through to "no event" without special-casing.
    pub fn bin_based_detect(&self) -> Option<Contention> {
        let n = self.bins.len();
        if n == 0 {
            return None;
        }
        for i in 0..n {
            let b = &self.bins[i];
            if self.util < b.util_start {
                if i == 0 {
                    return None;
                }
                return self.detect_in_bin(&self.bins[i - 1]);
            }
            if self.util >= b.util_start && (self.util < b.util_end || i == n - 1) {
                return self.detect_in_bin(b);
            }
        }
        None
    }

    pub fn tdp_detect(&self) -> Option<Contention> {
        let row = self.thermal.as_ref()?;
        if self.util >= row.util_floor && self.metrics.nf < row.freq_bar {
            Some(Contention::Tdp)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin() -> ThresholdBin {
        ThresholdBin { util_start: 400.0, util_end: 500.0, cpi_upper: 2.0, mpki_upper: 5.0, mb_lower: 1000.0 }
    }

    fn container_with_bin() -> ContainerRecord {
        let mut c = ContainerRecord::new("c1".into(), "lc1".into(), vec![], DEFAULT_HISTORY_DEPTH);
        c.bins.push(bin());
        c
    }

    #[test]
    fn scenario_1_llc() {
        let mut c = container_with_bin();
        c.util = 450.0;
        c.metrics = MetricsSnapshot { instructions: 1, cpi: 3.0, mpki: 10.0, mbl: 400.0, mbr: 300.0, ..Default::default() };
        assert_eq!(c.bin_based_detect(), Some(Contention::Llc));
    }

    #[test]
    fn scenario_2_mem_bw() {
        let mut c = container_with_bin();
        c.util = 450.0;
        c.metrics = MetricsSnapshot { cpi: 3.0, mpki: 1.0, mbl: 100.0, mbr: 200.0, ..Default::default() };
        assert_eq!(c.bin_based_detect(), Some(Contention::MemBw));
    }

    #[test]
    fn scenario_3_unkn() {
        let mut c = container_with_bin();
        c.util = 450.0;
        c.metrics = MetricsSnapshot { cpi: 3.0, mpki: 1.0, mbl: 800.0, mbr: 800.0, ..Default::default() };
        assert_eq!(c.bin_based_detect(), Some(Contention::Unkn));
    }

    #[test]
    fn scenario_4_below_first_bin() {
        let mut c = container_with_bin();
        c.util = 380.0;
        c.metrics = MetricsSnapshot { cpi: 3.0, mpki: 10.0, mbl: 400.0, mbr: 300.0, ..Default::default() };
        assert_eq!(c.bin_based_detect(), None);
    }

    #[test]
    fn scenario_5_tdp() {
        let mut c = ContainerRecord::new("c1".into(), "lc1".into(), vec![], DEFAULT_HISTORY_DEPTH);
        c.thermal = Some(ThermalRow { util_floor: 380.0, mean: 25.0, stddev: 2.0, freq_bar: 20.0 });
        c.util = 400.0;
        c.metrics.nf = 18.0;
        assert_eq!(c.tdp_detect(), Some(Contention::Tdp));
    }

    #[test]
    fn nan_live_value_never_contends() {
        let mut c = container_with_bin();
        c.util = 450.0;
        c.metrics = MetricsSnapshot { cpi: f64::NAN, mpki: 10.0, ..Default::default() };
        assert_eq!(c.bin_based_detect(), None);
    }

    #[test]
    fn history_delta_rules() {
        let mut c = ContainerRecord::new("c1".into(), "lc1".into(), vec![], 5);
        assert_eq!(c.llc_occupancy_delta(), 0.0);

        c.metrics.llc_occupancy = 100;
        c.push_history();
        assert_eq!(c.llc_occupancy_delta(), 100.0);

        c.metrics.llc_occupancy = 50;
        c.push_history();
        c.metrics.llc_occupancy = 150;
        c.push_history();
        // preceding mean = (100+50)/2 = 75, latest = 150 -> delta = 75
        assert!((c.llc_occupancy_delta() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn bounded_history_fifo() {
        let mut c = ContainerRecord::new("c1".into(), "lc1".into(), vec![], 2);
        for i in 0..10u64 {
            c.metrics.llc_occupancy = i;
            c.push_history();
        }
        assert_eq!(c.history.len(), 3);
        assert_eq!(c.history.front().unwrap().llc_occupancy, 7);
    }
}
