// BLACK-BOX INTEGRATION TESTS FOR THE OFFLINE THRESHOLD BUILDER, EXERCISING
// REAL FILES IN A TEMPORARY DIRECTORY RATHER THAN IN-MEMORY FIXTURES.

use std::io::Write;

use nodeward::fence::FenceKind;
use nodeward::threshold;
use nodeward::workload::WorkloadTable;

fn write_workload_csv(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("workload.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "CID,CNAME,TYPE,CPUS").unwrap();
    writeln!(f, "lc1,redis,LC,2").unwrap();
    writeln!(f, "be1,stress,BE,4").unwrap();
    path
}

fn write_metrics_csv(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("metrics.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "CID,CNAME,UTIL,CPI,L3MPKI,MBL,MBR,NF").unwrap();
    for i in 0..40 {
        let util = 110.0 + (i as f64 % 20.0);
        let cpi = 1.0 + (i as f64 % 5.0) * 0.1;
        writeln!(f, "lc1,redis,{util},{cpi},2.0,500,500,28").unwrap();
    }
    // a hot tail well above the 0.95 * 100 * cpus thermal floor (190)
    for i in 0..10 {
        writeln!(f, "lc1,redis,{},1.2,1.0,400,400,{}", 195 + i, 15 + i % 3).unwrap();
    }
    path
}

#[test]
fn builder_writes_thresh_and_tdp_csv_round_trippable() {
    let dir = tempfile::tempdir().unwrap();
    let workload_path = write_workload_csv(dir.path());
    let metrics_path = write_metrics_csv(dir.path());
    let workloads = WorkloadTable::load(&workload_path, false).unwrap();

    let thresh_path = dir.path().join("thresh.csv");
    let tdp_path = dir.path().join("tdp_thresh.csv");

    threshold::build_thresholds(
        &metrics_path,
        &workloads,
        FenceKind::Quartile,
        4.0,
        50.0,
        &thresh_path,
        &tdp_path,
    )
    .unwrap();

    assert!(thresh_path.exists());
    assert!(tdp_path.exists());

    let bins = threshold::load_threshold_bins(&thresh_path, false).unwrap();
    let redis_bins = bins.get("redis").expect("redis should have at least one bin");
    assert!(!redis_bins.is_empty());
    for w in redis_bins.windows(2) {
        assert!(w[0].util_start <= w[1].util_start);
    }

    let thermal = threshold::load_thermal_rows(&tdp_path, false).unwrap();
    assert!(thermal.contains_key("redis"));
}

#[test]
fn builder_is_idempotent_under_fixed_seed() {
    let dir = tempfile::tempdir().unwrap();
    let workload_path = write_workload_csv(dir.path());
    let metrics_path = write_metrics_csv(dir.path());
    let workloads = WorkloadTable::load(&workload_path, false).unwrap();

    let thresh_a = dir.path().join("thresh_a.csv");
    let tdp_a = dir.path().join("tdp_a.csv");
    let thresh_b = dir.path().join("thresh_b.csv");
    let tdp_b = dir.path().join("tdp_b.csv");

    threshold::build_thresholds(&metrics_path, &workloads, FenceKind::GmmStrict, 4.0, 50.0, &thresh_a, &tdp_a)
        .unwrap();
    threshold::build_thresholds(&metrics_path, &workloads, FenceKind::GmmStrict, 4.0, 50.0, &thresh_b, &tdp_b)
        .unwrap();

    let a = std::fs::read_to_string(&thresh_a).unwrap();
    let b = std::fs::read_to_string(&thresh_b).unwrap();
    assert_eq!(a, b, "GMM-strict fence builds must be byte-identical under the fixed seed");
}

#[test]
fn process_lc_max_round_trips_through_read_system_max() {
    let dir = tempfile::tempdir().unwrap();
    let util_path = dir.path().join("util.csv");
    let mut f = std::fs::File::create(&util_path).unwrap();
    writeln!(f, "TIME,CID,CNAME,UTIL").unwrap();
    writeln!(f, "1,,lcs,134.0").unwrap();
    writeln!(f, "2,,lcs,201.7").unwrap();
    writeln!(f, "3,,loadavg1m,0.5").unwrap();
    drop(f);

    let lcmax_path = dir.path().join("lcmax.txt");
    threshold::process_lc_max(&util_path, &lcmax_path).unwrap();

    let restored = threshold::read_system_max(&lcmax_path, 8);
    assert_eq!(restored, 201.0);
}

#[test]
fn missing_util_file_skips_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let lcmax_path = dir.path().join("lcmax.txt");
    threshold::process_lc_max(&dir.path().join("does_not_exist.csv"), &lcmax_path).unwrap();
    assert!(!lcmax_path.exists());
}
