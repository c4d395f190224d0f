// AGENT ENTRYPOINT: PARSES THE CLI, LOADS THE WORKLOAD TABLE, SPAWNS THE
// UTILIZATION AND METRICS LOOPS, AND WAITS FOR AN INTERRUPT (§6.1, §7.1).

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use nodeward::config::AgentConfig;
use nodeward::controller::NaiveController;
use nodeward::discovery::CgroupDirectoryDiscovery;
use nodeward::error::AgentError;
use nodeward::metrics_exporter::MetricsExporter;
use nodeward::monitor::{self, ContainerMap};
use nodeward::resource::{CpuQuota, LlcMask};
use nodeward::threshold;
use nodeward::workload::WorkloadTable;

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose && std::env::var("RUST_LOG").is_err() {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn run(cfg: AgentConfig) -> anyhow::Result<()> {
    let workloads = Arc::new(WorkloadTable::load(&cfg.workload_conf_file, cfg.key_cid)?);
    let cfg = Arc::new(cfg);

    let core_count = thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1);
    let system_max = Arc::new(Mutex::new(threshold::read_system_max(&cfg.lcmax_file, core_count)));

    let (bins, thermal) = if let Some(thresh_file) = &cfg.thresh_file {
        let bins = threshold::load_threshold_bins(thresh_file, cfg.key_cid)?;
        info!("loaded {} workload(s) with threshold bins from {}", bins.len(), thresh_file.display());
        let tdp_file = thresh_file.with_file_name("tdp_thresh.csv");
        let thermal = match threshold::load_thermal_rows(&tdp_file, cfg.key_cid) {
            Ok(rows) => {
                info!("loaded {} workload(s) with thermal thresholds from {}", rows.len(), tdp_file.display());
                rows
            }
            Err(e) => {
                warn!("no thermal thresholds loaded from {}: {e}", tdp_file.display());
                Default::default()
            }
        };
        (bins, thermal)
    } else {
        (Default::default(), Default::default())
    };
    let bins = Arc::new(bins);
    let thermal = Arc::new(thermal);

    let exporter = if cfg.enable_prometheus {
        let exporter = MetricsExporter::new();
        exporter.clone().spawn(cfg.prometheus_port);
        info!("metrics exporter listening on port {}", cfg.prometheus_port);
        Some(exporter)
    } else {
        None
    };

    let interrupt: Arc<AtomicBool> = monitor::spawn_signal_handler();

    let util_handle = {
        let cfg = cfg.clone();
        let workloads = workloads.clone();
        let interrupt = interrupt.clone();
        let system_max = system_max.clone();
        thread::spawn(move || {
            let discovery = CgroupDirectoryDiscovery::new(cfg.cgroup_root.clone());
            let mut containers: ContainerMap = ContainerMap::new();
            let quota_max_init = *system_max.lock().expect("system-max mutex poisoned");
            let mut quota = CpuQuota::with_root(quota_max_init, cfg.margin_ratio, cfg.cgroup_root.clone());
            let mut quota_ctrl = NaiveController::new(cfg.quota_cycles.max(1));
            let interval = Duration::from_secs(cfg.util_interval);
            monitor::run_periodic(interval, &interrupt, || {
                let mut current_max = system_max.lock().expect("system-max mutex poisoned");
                monitor::mon_util_cycle(
                    &cfg,
                    &workloads,
                    &discovery,
                    &mut containers,
                    &mut quota,
                    &mut quota_ctrl,
                    &mut current_max,
                )
            });
        })
    };

    let metric_handle = if cfg.collect_metrics {
        let cfg = cfg.clone();
        let workloads = workloads.clone();
        let interrupt = interrupt.clone();
        let exporter = exporter.clone();
        let bins = bins.clone();
        let thermal = thermal.clone();
        Some(thread::spawn(move || {
            let discovery = CgroupDirectoryDiscovery::new(cfg.cgroup_root.clone());
            let mut containers: ContainerMap = ContainerMap::new();
            let mut llc = LlcMask::new();
            let mut llc_ctrl = NaiveController::new(cfg.llc_cycles.max(1));
            let interval = Duration::from_secs(cfg.metric_interval);
            monitor::run_periodic(interval, &interrupt, || {
                monitor::mon_metric_cycle(
                    &cfg,
                    &workloads,
                    &discovery,
                    &mut containers,
                    &bins,
                    &thermal,
                    &mut llc,
                    &mut llc_ctrl,
                    exporter.as_ref(),
                )
            });
        }))
    } else {
        None
    };

    util_handle
        .join()
        .map_err(|e| anyhow::anyhow!("utilization loop thread panicked: {e:?}"))?;
    if let Some(handle) = metric_handle {
        handle
            .join()
            .map_err(|e| anyhow::anyhow!("metrics loop thread panicked: {e:?}"))?;
    }

    info!("shutdown complete");
    Ok(())
}

fn main() {
    let cfg = AgentConfig::parse();
    init_logging(cfg.verbose);

    if let Err(err) = run(cfg) {
        match err.downcast_ref::<AgentError>() {
            Some(AgentError::Config(msg)) => {
                error!("configuration error: {msg}");
                std::process::exit(2);
            }
            _ => {
                error!("agent exited with error: {err:?}");
                std::process::exit(1);
            }
        }
    }
}
