// OFFLINE THRESHOLD-MODEL BUILDER ENTRYPOINT (§4.B, §6.1).

use clap::Parser;
use log::{error, info};

use nodeward::config::BuilderConfig;
use nodeward::error::AgentError;
use nodeward::threshold;
use nodeward::workload::WorkloadTable;

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose && std::env::var("RUST_LOG").is_err() {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn run(cfg: BuilderConfig) -> Result<(), AgentError> {
    let workloads = WorkloadTable::load(&cfg.workload_conf_file, false)?;

    threshold::build_thresholds(
        &cfg.metric_file,
        &workloads,
        cfg.fense_type,
        cfg.thresh,
        cfg.step,
        &cfg.thresh_out,
        &cfg.tdp_thresh_out,
    )?;
    info!("wrote {} and {}", cfg.thresh_out.display(), cfg.tdp_thresh_out.display());

    threshold::process_lc_max(&cfg.util_file, &cfg.lcmax_out)?;

    Ok(())
}

fn main() {
    let cfg = BuilderConfig::parse();
    init_logging(cfg.verbose);

    match run(cfg) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("threshold builder failed: {e}");
            std::process::exit(2);
        }
    }
}
