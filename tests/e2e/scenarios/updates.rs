use crate::harness::Scenario;
use depot_core::CloneStatus;

const REPO: &str = "github.com/acme/service";
const CORRUPT_FETCH: &str =
    "remote: Enumerating objects: 5, done.\nerror: packfile objects/pack/pack-1.pack does not match index\nfatal: index-pack failed";

#[test]
fn test_update_records_ref_hash() {
    Scenario::new("update_ok")
        .with_registered_repo(REPO)
        .update(REPO)
        .assert_calls(REPO, "fetch", 1)
        .assert_file_contains(REPO, "depot_refhash", "0123456789abcdef")
        .assert_no_last_error(REPO)
        .run()
        .unwrap();
}

#[test]
fn test_corrupt_fetch_output_flags_repo_for_janitor() {
    Scenario::new("update_corrupt")
        .with_registered_repo(REPO)
        .fetch_fails(REPO, CORRUPT_FETCH)
        .update_fails(REPO)
        .assert_file_exists(REPO, "depot_maybe_corrupt")
        .assert_corruption_logged(REPO, 1)
        .assert_last_error_contains(REPO, "packfile")
        .run_janitor()
        .assert_removed(REPO)
        .assert_removed_in_last_run("maybe-corrupt", 1)
        .assert_corruption_logged(REPO, 1)
        .assert_clone_status(REPO, CloneStatus::NotCloned)
        .run()
        .unwrap();
}

#[test]
fn test_plain_fetch_failure_does_not_flag() {
    Scenario::new("update_network_error")
        .with_registered_repo(REPO)
        .fetch_fails(REPO, "fatal: unable to access 'https://github.com/acme/service/': Could not resolve host")
        .update_fails(REPO)
        .assert_file_missing(REPO, "depot_maybe_corrupt")
        .assert_last_error_contains(REPO, "Could not resolve host")
        .fetch_succeeds(REPO)
        .update(REPO)
        .assert_no_last_error(REPO)
        .run_janitor()
        .assert_exists(REPO)
        .run()
        .unwrap();
}

#[test]
fn test_update_of_missing_repo_fails() {
    Scenario::new("update_missing")
        .update_fails("github.com/acme/nowhere")
        .assert_calls("github.com/acme/nowhere", "fetch", 0)
        .run()
        .unwrap();
}

#[test]
fn test_busy_repo_is_skipped_by_janitor_and_updates() {
    Scenario::new("busy_repo")
        .with_registered_repo(REPO)
        .with_registered_repo("github.com/acme/idle")
        .hold_lock(REPO, "cloning")
        .update_fails(REPO)
        .assert_calls(REPO, "fetch", 0)
        .run_janitor()
        .assert_busy(1)
        .assert_calls(REPO, "gc", 0)
        .assert_calls("github.com/acme/idle", "gc", 1)
        .release_lock(REPO)
        .run_janitor()
        .assert_busy(0)
        .assert_calls(REPO, "gc", 1)
        .update(REPO)
        .run()
        .unwrap();
}

#[test]
fn test_janitor_releases_repos_for_updates() {
    Scenario::new("janitor_then_update")
        .with_registered_repo(REPO)
        .run_janitor()
        .update(REPO)
        .run_janitor()
        .update(REPO)
        .assert_calls(REPO, "fetch", 2)
        .run()
        .unwrap();
}
