use crate::harness::Scenario;
use depot_core::CloneStatus;

const REPO: &str = "github.com/acme/monorepo";
const REPACK_OUTPUT: &str = "fatal: Out of memory, malloc failed (tried to allocate 4294967296 bytes)";

#[test]
fn test_maintenance_runs_until_repo_is_healthy() {
    Scenario::new("maintenance_runs")
        .maintenance_mode()
        .with_registered_repo(REPO)
        .run_janitor()
        .assert_errors(0)
        .assert_calls(REPO, "config_set gc.auto=0", 1)
        .assert_calls(REPO, "maintenance", 1)
        .assert_calls(REPO, "gc", 0)
        .assert_file_exists(REPO, "objects/info/commit-graph")
        .assert_file_missing(REPO, "gc.pid")
        .wait_hours(1)
        .run_janitor()
        .assert_calls(REPO, "maintenance", 1)
        .run()
        .unwrap();
}

#[test]
fn test_failed_maintenance_backs_off() {
    Scenario::new("maintenance_backoff")
        .maintenance_mode()
        .with_registered_repo(REPO)
        .maintenance_fails(REPO, REPACK_OUTPUT)
        .run_janitor()
        .assert_errors(1)
        .assert_file_contains(REPO, "depot_maintenance.log", "failed=1")
        .assert_file_contains(REPO, "depot_maintenance.log", "Out of memory")
        .wait_hours(1)
        .run_janitor()
        .assert_errors(0)
        .assert_calls(REPO, "maintenance", 1)
        .wait_hours(24)
        .run_janitor()
        .assert_errors(1)
        .assert_calls(REPO, "maintenance", 2)
        .assert_file_contains(REPO, "depot_maintenance.log", "failed=2")
        .maintenance_succeeds(REPO)
        .wait_hours(25)
        .run_janitor()
        .assert_errors(0)
        .assert_file_missing(REPO, "depot_maintenance.log")
        .run()
        .unwrap();
}

#[test]
fn test_too_many_maintenance_failures_trigger_reclone() {
    let mut scenario = Scenario::new("maintenance_reclone")
        .maintenance_mode()
        .with_registered_repo(REPO)
        .maintenance_fails(REPO, REPACK_OUTPUT);
    for _ in 0..3 {
        scenario = scenario.run_janitor().wait_hours(25);
    }
    scenario
        .assert_exists(REPO)
        .assert_file_contains(REPO, "depot_maintenance.log", "failed=3")
        .run_janitor()
        .assert_removed(REPO)
        .assert_removed_in_last_run("reclone", 1)
        .assert_clone_status(REPO, CloneStatus::NotCloned)
        .run()
        .unwrap();
}

#[test]
fn test_maintenance_skipped_while_gc_lock_held() {
    Scenario::new("maintenance_locked")
        .maintenance_mode()
        .with_registered_repo(REPO)
        .writes(REPO, "gc.pid", b"4242 builder-7")
        .run_janitor()
        .assert_errors(0)
        .assert_calls(REPO, "maintenance", 0)
        .assert_file_contains(REPO, "gc.pid", "builder-7")
        .run()
        .unwrap();
}

#[test]
fn test_stale_gc_lock_does_not_block_maintenance() {
    Scenario::new("maintenance_stale_lock")
        .maintenance_mode()
        .with_registered_repo(REPO)
        .writes_stale(REPO, "gc.pid", std::time::Duration::from_secs(25 * 3600))
        .run_janitor()
        .assert_calls(REPO, "maintenance", 1)
        .assert_file_missing(REPO, "gc.pid")
        .run()
        .unwrap();
}

#[test]
fn test_prune_runs_with_many_loose_objects() {
    Scenario::new("prune")
        .maintenance_mode()
        .with_config(|c| c.gc.loose_objects_limit = 512)
        .with_registered_repo(REPO)
        .writes(REPO, "objects/17/0a1b2c3d4e5f60718293a4b5c6d7e8f9012345", b"x")
        .writes(REPO, "objects/17/1a1b2c3d4e5f60718293a4b5c6d7e8f9012345", b"x")
        .run_janitor()
        .assert_calls(REPO, "prune", 0)
        .writes(REPO, "objects/17/2a1b2c3d4e5f60718293a4b5c6d7e8f9012345", b"x")
        .run_janitor()
        .assert_calls(REPO, "prune", 1)
        .run()
        .unwrap();
}
