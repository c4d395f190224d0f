// AMBIENT CONFIGURATION (§3.1, §6, §6.1)
// CLAP-DERIVED CLI SURFACES FOR BOTH BINARIES. EACH Parse()D STRUCT IS
// RESOLVED ONCE AT STARTUP AND SHARED BY REFERENCE AFTERWARD.

use std::path::PathBuf;

use clap::Parser;

use crate::fence::FenceKind;

/// Node-local resource-contention agent.
#[derive(Parser, Debug)]
#[command(name = "nodeward", version, about)]
pub struct AgentConfig {
    /// Workload descriptor CSV (CID,CNAME,TYPE,CPUS).
    pub workload_conf_file: PathBuf,

    /// Force debug-level logging when RUST_LOG is unset.
    #[arg(short, long)]
    pub verbose: bool,

    /// Run the metrics loop (counter collection + detection).
    #[arg(long)]
    pub collect_metrics: bool,

    /// Run contention detection during the metrics loop.
    #[arg(long)]
    pub detect: bool,

    /// Drive the budget controllers from detection outcomes.
    #[arg(long)]
    pub control: bool,

    /// Append per-cycle counter rows to the online metrics log.
    #[arg(long)]
    pub record: bool,

    /// Use container id (rather than display name) as the LC/BE identity key.
    #[arg(long)]
    pub key_cid: bool,

    /// Honor margin "hold" semantics in the CPU-quota controller.
    #[arg(long)]
    pub enable_hold: bool,

    /// Disable LLC cache-allocation control entirely.
    #[arg(long)]
    pub disable_cat: bool,

    /// Start the Prometheus metrics-exporter HTTP server.
    #[arg(long)]
    pub enable_prometheus: bool,

    /// Utilization-loop cadence, seconds.
    #[arg(long, default_value_t = 2)]
    pub util_interval: u64,

    /// Metrics-loop cadence, seconds.
    #[arg(long, default_value_t = 20)]
    pub metric_interval: u64,

    /// Quiet cycles before the LLC controller relaxes one level.
    #[arg(long, default_value_t = crate::controller::DEFAULT_LLC_CYCLES)]
    pub llc_cycles: u32,

    /// Quiet cycles before the CPU-quota controller relaxes one level.
    #[arg(long, default_value_t = crate::controller::DEFAULT_QUOTA_CYCLES)]
    pub quota_cycles: u32,

    /// Fraction of the CFS period reserved as margin ahead of quota_max.
    #[arg(long, default_value_t = 0.5)]
    pub margin_ratio: f64,

    /// Path to a previously-built thresh.csv (and sibling tdp_thresh.csv).
    #[arg(long)]
    pub thresh_file: Option<PathBuf>,

    /// Metrics-exporter HTTP port.
    #[arg(long, default_value_t = 8080)]
    pub prometheus_port: u16,

    /// Cgroup root directory to discover containers under.
    #[arg(long, default_value = "/sys/fs/cgroup/cpu/docker")]
    pub cgroup_root: PathBuf,

    /// Durable system-max-utilization file.
    #[arg(long, default_value = "lcmax.txt")]
    pub lcmax_file: PathBuf,

    /// Online per-cycle metrics log path (used when --record is set).
    #[arg(long, default_value = "metrics_log.csv")]
    pub metrics_log_file: PathBuf,

    /// Online utilization log path.
    #[arg(long, default_value = "util_log.csv")]
    pub util_log_file: PathBuf,

    /// External counter-collector binary.
    #[arg(long, default_value = "pcm-collect")]
    pub collector_binary: String,
}

/// Offline threshold-model builder.
#[derive(Parser, Debug)]
#[command(name = "nodeward-thresh", version, about)]
pub struct BuilderConfig {
    /// Workload descriptor CSV (CID,CNAME,TYPE,CPUS).
    pub workload_conf_file: PathBuf,

    /// Historical per-container counter CSV.
    #[arg(short = 'm', long, default_value = "metrics.csv")]
    pub metric_file: PathBuf,

    /// Fence estimation strategy.
    #[arg(short = 'f', long, value_enum, default_value = "gmm-strict")]
    pub fense_type: FenceKind,

    /// Threshold scalar (t in the quartile/normal formulas).
    #[arg(short = 't', long, default_value_t = 4.0)]
    pub thresh: f64,

    /// Utilization bin step.
    #[arg(short = 's', long, default_value_t = 50.0)]
    pub step: f64,

    /// Utilization log used for the system-max derivation (§4.B.1).
    #[arg(long, default_value = "util.csv")]
    pub util_file: PathBuf,

    #[arg(short, long)]
    pub verbose: bool,

    /// Output path for the per-bin threshold table.
    #[arg(long, default_value = "thresh.csv")]
    pub thresh_out: PathBuf,

    /// Output path for the thermal-throttle table.
    #[arg(long, default_value = "tdp_thresh.csv")]
    pub tdp_thresh_out: PathBuf,

    /// Output path for the durable system-max file.
    #[arg(long, default_value = "lcmax.txt")]
    pub lcmax_out: PathBuf,
}
