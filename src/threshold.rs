// THRESHOLD MODEL BUILDER (COMPONENT B)
// TURNS A LONG CSV OF HISTORICAL PER-CONTAINER COUNTER ROWS INTO PER-BIN
// ANOMALY THRESHOLDS, PER §4.B, PLUS THE §4.B.1 SYSTEM-MAX DERIVATION.

use std::collections::BTreeMap;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::container::{ThermalRow, ThresholdBin};
use crate::error::{AgentError, Result};
use crate::fence::{self, FenceKind, FenceParams};
use crate::stats;
use crate::workload::WorkloadTable;

#[derive(Debug, Deserialize)]
struct MetricRow {
    #[serde(rename = "CID")]
    cid: String,
    #[serde(rename = "CNAME")]
    cname: String,
    #[serde(rename = "UTIL")]
    util: f64,
    #[serde(rename = "CPI")]
    cpi: f64,
    #[serde(rename = "L3MPKI")]
    l3mpki: f64,
    #[serde(rename = "MBL")]
    mbl: f64,
    #[serde(rename = "MBR")]
    mbr: f64,
    #[serde(rename = "NF")]
    nf: f64,
}

#[derive(Debug, Serialize)]
struct ThreshRecord {
    #[serde(rename = "CID")]
    cid: String,
    #[serde(rename = "CNAME")]
    cname: String,
    #[serde(rename = "UTIL_START")]
    util_start: f64,
    #[serde(rename = "UTIL_END")]
    util_end: f64,
    #[serde(rename = "CPI_THRESH")]
    cpi_thresh: f64,
    #[serde(rename = "MPKI_THRESH")]
    mpki_thresh: f64,
    #[serde(rename = "MB_THRESH")]
    mb_thresh: f64,
}

#[derive(Debug, Serialize)]
struct TdpThreshRecord {
    #[serde(rename = "CID")]
    cid: String,
    #[serde(rename = "CNAME")]
    cname: String,
    #[serde(rename = "UTIL")]
    util: f64,
    #[serde(rename = "MEAN")]
    mean: f64,
    #[serde(rename = "STD")]
    std: f64,
    #[serde(rename = "BAR")]
    bar: f64,
}

/// Utilization-bin partition for a container requesting `cpus` cores:
/// [50c, 50c+s), [50c+s, 50c+2s), ... up to but not including 100(c+1);
/// the last bin is extended by one extra step above.
pub fn partition_utilization(cpus: u32, step: f64) -> Vec<(f64, f64)> {
    let lo_bound = 50.0 * cpus as f64;
    let hi_bound = 100.0 * (cpus as f64 + 1.0);
    let mut bounds = vec![lo_bound];
    let mut cur = lo_bound;
    while cur + step < hi_bound {
        cur += step;
        bounds.push(cur);
    }
    bounds.push(cur + step);

    bounds.windows(2).map(|w| (w[0], w[1])).collect()
}

fn group_by_cid(rows: &[MetricRow]) -> BTreeMap<String, Vec<&MetricRow>> {
    let mut groups: BTreeMap<String, Vec<&MetricRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.cid.clone()).or_default().push(row);
    }
    groups
}

/// Builds thresh.csv + tdp_thresh.csv from the metrics CSV and workload table,
/// writing them to `thresh_path`/`tdp_path`. Mirrors §4.B steps 1-3.
pub fn build_thresholds(
    metric_file: &Path,
    workloads: &WorkloadTable,
    fence_kind: FenceKind,
    thresh: f64,
    step: f64,
    thresh_path: &Path,
    tdp_path: &Path,
) -> Result<()> {
    let mut reader = csv::Reader::from_path(metric_file).map_err(|e| {
        AgentError::Config(format!("cannot read metric file {}: {e}", metric_file.display()))
    })?;
    let rows: Vec<MetricRow> = reader
        .deserialize()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| AgentError::Config(format!("malformed metric row: {e}")))?;

    let groups = group_by_cid(&rows);
    let params = FenceParams { thresh, ..Default::default() };

    let mut thresh_writer = csv::Writer::from_path(thresh_path).map_err(|e| {
        AgentError::Config(format!("cannot write {}: {e}", thresh_path.display()))
    })?;
    let mut tdp_writer = csv::Writer::from_path(tdp_path).map_err(|e| {
        AgentError::Config(format!("cannot write {}: {e}", tdp_path.display()))
    })?;

    for (cid, rows) in &groups {
        let cname = rows[0].cname.clone();
        let cpus = match workloads.cpus_by_name.get(&cname) {
            Some(c) => *c,
            None => {
                warn!("skipping container {cname} ({cid}): not present in workload table");
                continue;
            }
        };

        // THERMAL-THROTTLE ROW (STEP 2)
        let thermal_floor = 0.95 * 100.0 * cpus as f64;
        let hot_nf: Vec<f64> = rows.iter().filter(|r| r.util >= thermal_floor).map(|r| r.nf).collect();
        if !hot_nf.is_empty() {
            let mean = stats::mean(&hot_nf);
            let std = stats::std_dev_unbiased(&hot_nf, mean).max(0.0);
            let observed_min = stats::min_of(&hot_nf);
            let freq_bar = (mean - 3.0 * std).min(observed_min);
            tdp_writer
                .serialize(TdpThreshRecord {
                    cid: cid.clone(),
                    cname: cname.clone(),
                    util: thermal_floor,
                    mean,
                    std,
                    bar: freq_bar,
                })
                .map_err(|e| AgentError::Config(format!("cannot write tdp row: {e}")))?;
        }

        // BIN ROWS (STEP 3)
        for (lo, hi) in partition_utilization(cpus, step) {
            let bin_rows: Vec<&&MetricRow> =
                rows.iter().filter(|r| r.util >= lo && r.util <= hi).collect();
            if bin_rows.is_empty() {
                continue;
            }
            let cpi_sample: Vec<f64> = bin_rows.iter().map(|r| r.cpi).collect();
            let mpki_sample: Vec<f64> = bin_rows.iter().map(|r| r.l3mpki).collect();
            let mb_sample: Vec<f64> = bin_rows.iter().map(|r| r.mbl + r.mbr).collect();

            let cpi_thresh = fence::estimate(fence_kind, &cpi_sample, true, &params);
            let mpki_thresh = fence::estimate(fence_kind, &mpki_sample, true, &params);
            let mb_thresh = fence::estimate(fence_kind, &mb_sample, false, &params);

            if !cpi_thresh.is_finite() && !mpki_thresh.is_finite() && !mb_thresh.is_finite() {
                continue;
            }

            thresh_writer
                .serialize(ThreshRecord {
                    cid: cid.clone(),
                    cname: cname.clone(),
                    util_start: lo,
                    util_end: hi,
                    cpi_thresh,
                    mpki_thresh,
                    mb_thresh,
                })
                .map_err(|e| AgentError::Config(format!("cannot write thresh row: {e}")))?;
        }
    }

    thresh_writer.flush().map_err(|e| AgentError::Config(e.to_string()))?;
    tdp_writer.flush().map_err(|e| AgentError::Config(e.to_string()))?;
    Ok(())
}

/// Reads the durable system-max file, from `util_file`'s synthetic `"lcs"`
/// rows, per §4.B.1. Missing input is a non-fatal skip, logged at warn.
pub fn process_lc_max(util_file: &Path, lcmax_path: &Path) -> Result<()> {
    let mut reader = match csv::Reader::from_path(util_file) {
        Ok(r) => r,
        Err(e) => {
            warn!("skipping system-max derivation, cannot read {}: {e}", util_file.display());
            return Ok(());
        }
    };

    #[derive(Deserialize)]
    struct UtilRow {
        #[serde(rename = "CNAME")]
        cname: String,
        #[serde(rename = "UTIL")]
        util: f64,
    }

    let mut max_util = f64::NEG_INFINITY;
    for result in reader.deserialize::<UtilRow>() {
        let row = result.map_err(|e| AgentError::Config(format!("malformed util row: {e}")))?;
        if row.cname == "lcs" && row.util > max_util {
            max_util = row.util;
        }
    }

    if !max_util.is_finite() {
        warn!("no \"lcs\" rows found in {}, skipping lcmax.txt write", util_file.display());
        return Ok(());
    }

    std::fs::write(lcmax_path, format!("{}\n", max_util.floor() as i64))
        .map_err(|e| AgentError::Config(format!("cannot write {}: {e}", lcmax_path.display())))
}

/// Loads a previously-built thresh.csv into per-workload bin lists, keyed the
/// same way as `WorkloadTable` (cid or cname per `key_cid`).
pub fn load_threshold_bins(
    path: &Path,
    key_cid: bool,
) -> Result<BTreeMap<String, Vec<ThresholdBin>>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        AgentError::Config(format!("cannot read threshold file {}: {e}", path.display()))
    })?;

    #[derive(Deserialize)]
    struct Row {
        #[serde(rename = "CID")]
        cid: String,
        #[serde(rename = "CNAME")]
        cname: String,
        #[serde(rename = "UTIL_START")]
        util_start: f64,
        #[serde(rename = "UTIL_END")]
        util_end: f64,
        #[serde(rename = "CPI_THRESH")]
        cpi_thresh: f64,
        #[serde(rename = "MPKI_THRESH")]
        mpki_thresh: f64,
        #[serde(rename = "MB_THRESH")]
        mb_thresh: f64,
    }

    let mut out: BTreeMap<String, Vec<ThresholdBin>> = BTreeMap::new();
    for result in reader.deserialize::<Row>() {
        let row = result.map_err(|e| AgentError::Config(format!("malformed threshold row: {e}")))?;
        let key = if key_cid { row.cid } else { row.cname };
        out.entry(key).or_default().push(ThresholdBin {
            util_start: row.util_start,
            util_end: row.util_end,
            cpi_upper: row.cpi_thresh,
            mpki_upper: row.mpki_thresh,
            mb_lower: row.mb_thresh,
        });
    }
    for bins in out.values_mut() {
        bins.sort_by(|a, b| a.util_start.partial_cmp(&b.util_start).unwrap());
    }
    Ok(out)
}

/// Loads a previously-built tdp_thresh.csv, one row per workload at most.
pub fn load_thermal_rows(path: &Path, key_cid: bool) -> Result<BTreeMap<String, ThermalRow>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        AgentError::Config(format!("cannot read tdp threshold file {}: {e}", path.display()))
    })?;

    #[derive(Deserialize)]
    struct Row {
        #[serde(rename = "CID")]
        cid: String,
        #[serde(rename = "CNAME")]
        cname: String,
        #[serde(rename = "UTIL")]
        util: f64,
        #[serde(rename = "MEAN")]
        mean: f64,
        #[serde(rename = "STD")]
        std: f64,
        #[serde(rename = "BAR")]
        bar: f64,
    }

    let mut out = BTreeMap::new();
    for result in reader.deserialize::<Row>() {
        let row = result.map_err(|e| AgentError::Config(format!("malformed tdp row: {e}")))?;
        let key = if key_cid { row.cid } else { row.cname };
        out.insert(
            key,
            ThermalRow { util_floor: row.util, mean: row.mean, stddev: row.std, freq_bar: row.bar },
        );
    }
    Ok(out)
}

/// Reads lcmax.txt, defaulting to `core_count * 100` when absent or malformed (§9).
pub fn read_system_max(path: &Path, core_count: u32) -> f64 {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse::<f64>().unwrap_or((core_count * 100) as f64),
        Err(_) => (core_count * 100) as f64,
    }
}

pub fn write_system_max(path: &Path, value: f64) -> Result<()> {
    std::fs::write(path, format!("{}\n", value.floor() as i64))
        .map_err(|e| AgentError::Transient(format!("cannot write {}: {e}", path.display())))
}
