//! Janitor commands.

use super::{cancel_on_ctrl_c, git_backend, open_database};
use anyhow::Result;
use console::style;
use depot_core::{Config, HashResolver, Janitor, JanitorProgress, JanitorReport, RepoStore};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

fn build(config: Config) -> Result<Janitor> {
    let db = open_database(&config)?;
    let store = RepoStore::new(&config.janitor.repos_dir);
    let backend = git_backend(&config);
    Ok(Janitor::new(config, store, backend, db, Arc::new(HashResolver)))
}

/// Run one janitor pass and print the report.
pub async fn run(config: Config, json: bool) -> Result<()> {
    let janitor = build(config)?;
    let cancel = cancel_on_ctrl_c();

    let report = if json {
        janitor.run_once(&cancel).await
    } else {
        let steps: Vec<&str> = janitor.steps().iter().map(|s| s.name()).collect();
        println!(
            "{} Running janitor ({} mode): {}",
            style("→").cyan(),
            janitor.config().gc_mode(),
            steps.join(", ")
        );

        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg:40} [{bar:40.cyan/blue}] {pos}/{len}")?
                .progress_chars("█▓▒░  "),
        );
        let pb_clone = pb.clone();
        let progress: &JanitorProgress = &move |done: usize, total: usize, repo: &str| {
            pb_clone.set_length(total as u64);
            pb_clone.set_position(done as u64);
            pb_clone.set_message(repo.to_string());
        };
        let report = janitor.run_once_with_progress(&cancel, Some(progress)).await;
        pb.finish_and_clear();
        report
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Run the janitor on its interval until Ctrl-C.
pub async fn serve(config: Config) -> Result<()> {
    let interval = config.janitor.interval();
    let janitor = build(config)?;
    println!(
        "{} Janitor running every {}s. Press Ctrl-C to stop.",
        style("→").cyan(),
        interval.as_secs()
    );
    janitor.run_periodic(cancel_on_ctrl_c()).await;
    println!("{} Janitor stopped.", style("✓").green());
    Ok(())
}

fn report_json(report: &JanitorReport) -> serde_json::Value {
    serde_json::json!({
        "repos_visited": report.repos_visited,
        "repos_busy": report.repos_busy,
        "removed": report.removed,
        "sizes_flushed": report.sizes_flushed,
        "bytes_freed": report.bytes_freed,
        "wrong_shard": {
            "repos": report.wrong_shard_repos,
            "bytes": report.wrong_shard_bytes,
            "deleted": report.wrong_shard_deleted,
        },
        "errors": report.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        "aborted": report.aborted,
        "duration_ms": report.duration.as_millis() as u64,
    })
}

fn print_report(report: &JanitorReport) {
    println!();
    println!("{}", style("Janitor Report:").bold());
    println!("  Repositories visited: {}", style(report.repos_visited).cyan());
    if report.repos_busy > 0 {
        println!("  Busy, skipped:        {}", style(report.repos_busy).yellow());
    }
    println!(
        "  Removed:              {}",
        if report.removed_total() > 0 {
            style(report.removed_total()).yellow()
        } else {
            style(report.removed_total()).green()
        }
    );
    for (reason, count) in &report.removed {
        println!("    {:20} {}", reason, count);
    }
    println!(
        "  Wrong shard:          {} ({:.2} MB, {} deleted)",
        report.wrong_shard_repos,
        report.wrong_shard_bytes as f64 / 1_048_576.0,
        report.wrong_shard_deleted
    );
    println!("  Sizes updated:        {}", report.sizes_flushed);
    if report.bytes_freed > 0 {
        println!(
            "  Disk space freed:     {:.2} MB",
            report.bytes_freed as f64 / 1_048_576.0
        );
    }
    println!("  Duration:             {:.1}s", report.duration.as_secs_f64());

    if report.aborted {
        println!();
        println!("{} Run was interrupted before visiting every repository.", style("⚠").yellow());
    }

    if !report.errors.is_empty() {
        println!();
        println!("{}", style("Errors encountered:").red().bold());
        for error in report.errors.iter() {
            println!("  {} {}", style("×").red(), error);
        }
    }
}
