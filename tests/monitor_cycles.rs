// BLACK-BOX INTEGRATION TEST FOR THE UTILIZATION LOOP'S SINGLE-CYCLE BODY.
// CGROUP READS FAIL IN THIS SANDBOX (NO REAL DOCKER HIERARCHY), WHICH
// EXERCISES THE TRANSIENT-SKIP PATH REQUIRED BY THE ERROR-HANDLING DESIGN.

use std::io::Write;
use std::sync::Mutex;

use clap::Parser;

use nodeward::config::AgentConfig;
use nodeward::controller::NaiveController;
use nodeward::discovery::{DiscoveredContainer, StaticDiscovery};
use nodeward::monitor::{self, ContainerMap};
use nodeward::resource::CpuQuota;
use nodeward::workload::WorkloadTable;

fn write_workload_csv(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("workload.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "CID,CNAME,TYPE,CPUS").unwrap();
    writeln!(f, "lc1,redis,LC,2").unwrap();
    writeln!(f, "be1,stress,BE,4").unwrap();
    path
}

fn test_config(dir: &std::path::Path, workload_path: &std::path::Path) -> AgentConfig {
    AgentConfig::parse_from([
        "nodeward",
        workload_path.to_str().unwrap(),
        "--key-cid",
        "--util-log-file",
        dir.join("util_log.csv").to_str().unwrap(),
        "--lcmax-file",
        dir.join("lcmax.txt").to_str().unwrap(),
    ])
}

#[test]
fn util_cycle_tolerates_unreadable_cgroup_and_logs_synthetic_rows() {
    let dir = tempfile::tempdir().unwrap();
    let workload_path = write_workload_csv(dir.path());
    let workloads = WorkloadTable::load(&workload_path, true).unwrap();
    let cfg = test_config(dir.path(), &workload_path);

    let discovery = StaticDiscovery(vec![
        DiscoveredContainer { id: "lc1".into(), name: "redis".into(), pids: vec![1] },
        DiscoveredContainer { id: "be1".into(), name: "stress".into(), pids: vec![2] },
    ]);

    let mut containers = ContainerMap::new();
    let mut quota = CpuQuota::new(800.0, 0.5);
    let mut quota_ctrl = NaiveController::new(7);
    let system_max = Mutex::new(800.0);
    let mut current_max = *system_max.lock().unwrap();

    let result = monitor::mon_util_cycle(
        &cfg,
        &workloads,
        &discovery,
        &mut containers,
        &mut quota,
        &mut quota_ctrl,
        &mut current_max,
    );
    assert!(result.is_ok());

    assert!(containers.contains_key("lc1"));
    assert!(containers.contains_key("be1"));

    let log_contents = std::fs::read_to_string(cfg.util_log_file).unwrap();
    assert!(log_contents.contains("lcs"));
    assert!(log_contents.contains("loadavg1m"));
}

#[test]
fn second_cycle_evicts_vanished_containers() {
    let dir = tempfile::tempdir().unwrap();
    let workload_path = write_workload_csv(dir.path());
    let workloads = WorkloadTable::load(&workload_path, true).unwrap();
    let cfg = test_config(dir.path(), &workload_path);

    let mut containers = ContainerMap::new();
    let mut quota = CpuQuota::new(800.0, 0.5);
    let mut quota_ctrl = NaiveController::new(7);
    let mut current_max = 800.0;

    let discovery_both = StaticDiscovery(vec![
        DiscoveredContainer { id: "lc1".into(), name: "redis".into(), pids: vec![1] },
        DiscoveredContainer { id: "be1".into(), name: "stress".into(), pids: vec![2] },
    ]);
    monitor::mon_util_cycle(&cfg, &workloads, &discovery_both, &mut containers, &mut quota, &mut quota_ctrl, &mut current_max).unwrap();
    assert_eq!(containers.len(), 2);

    let discovery_one = StaticDiscovery(vec![DiscoveredContainer {
        id: "lc1".into(),
        name: "redis".into(),
        pids: vec![1],
    }]);
    monitor::mon_util_cycle(&cfg, &workloads, &discovery_one, &mut containers, &mut quota, &mut quota_ctrl, &mut current_max).unwrap();
    assert_eq!(containers.len(), 1);
    assert!(containers.contains_key("lc1"));
}
