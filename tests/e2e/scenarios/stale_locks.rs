use crate::harness::Scenario;
use std::time::Duration;

const REPO: &str = "github.com/acme/locked";

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

#[test]
fn test_stale_lock_files_are_removed() {
    Scenario::new("stale_locks")
        .with_registered_repo(REPO)
        .writes_stale(REPO, "config.lock", minutes(2))
        .writes_stale(REPO, "packed-refs.lock", minutes(61))
        .writes_stale(REPO, "refs/heads/old.lock", minutes(61))
        .writes_stale(REPO, "objects/info/commit-graph.lock", minutes(61))
        .writes_stale(REPO, "gc.pid", minutes(25 * 60))
        .writes_stale(REPO, "objects/pack/tmp_pack_a1b2c3", minutes(121))
        .writes_stale(REPO, "objects/pack/.tmp-9999-pack-abc.pack", minutes(121))
        .run_janitor()
        .assert_errors(0)
        .assert_file_missing(REPO, "config.lock")
        .assert_file_missing(REPO, "packed-refs.lock")
        .assert_file_missing(REPO, "refs/heads/old.lock")
        .assert_file_missing(REPO, "objects/info/commit-graph.lock")
        .assert_file_missing(REPO, "gc.pid")
        .assert_file_missing(REPO, "objects/pack/tmp_pack_a1b2c3")
        .assert_file_missing(REPO, "objects/pack/.tmp-9999-pack-abc.pack")
        .run()
        .unwrap();
}

#[test]
fn test_fresh_lock_files_are_kept() {
    Scenario::new("fresh_locks")
        .with_registered_repo(REPO)
        .writes(REPO, "config.lock", b"")
        .writes_stale(REPO, "packed-refs.lock", minutes(30))
        .writes_stale(REPO, "refs/heads/feature.lock", minutes(30))
        .writes_stale(REPO, "gc.pid", minutes(13 * 60))
        .writes_stale(REPO, "objects/pack/tmp_pack_d4e5f6", minutes(90))
        .run_janitor()
        .assert_file_exists(REPO, "config.lock")
        .assert_file_exists(REPO, "packed-refs.lock")
        .assert_file_exists(REPO, "refs/heads/feature.lock")
        .assert_file_exists(REPO, "gc.pid")
        .assert_file_exists(REPO, "objects/pack/tmp_pack_d4e5f6")
        .run()
        .unwrap();
}

#[test]
fn test_locks_expire_as_time_passes() {
    Scenario::new("locks_expire")
        .with_registered_repo(REPO)
        .writes(REPO, "refs/heads/main.lock", b"")
        .writes(REPO, "config.lock", b"")
        .run_janitor()
        .assert_file_exists(REPO, "refs/heads/main.lock")
        .assert_file_exists(REPO, "config.lock")
        .wait(minutes(5))
        .run_janitor()
        .assert_file_exists(REPO, "refs/heads/main.lock")
        .assert_file_missing(REPO, "config.lock")
        .wait(minutes(60))
        .run_janitor()
        .assert_file_missing(REPO, "refs/heads/main.lock")
        .run()
        .unwrap();
}

#[test]
fn test_tmp_pack_age_follows_command_timeout() {
    Scenario::new("tmp_pack_timeout")
        .with_config(|c| c.commands.long_command_timeout_secs = 60)
        .with_registered_repo(REPO)
        .writes_stale(REPO, "objects/pack/tmp_pack_short", minutes(3))
        .run_janitor()
        .assert_file_missing(REPO, "objects/pack/tmp_pack_short")
        .run()
        .unwrap();
}
