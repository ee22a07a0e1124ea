//! # Livecount CLI
//!
//! A standalone walkthrough of the Livecount aggregator. Each scenario drives a
//! `LivenessAggregator` backed by an in-memory durable store and prints what
//! the aggregate, the per-key snapshot and the change log look like.
//!
//! ## Report model
//!
//! ```text
//! report(key, count, suppress_minutes)
//!   suppressed?  → dropped
//!   persist      → key store (delta into aggregate, TTL reset)
//!   changed?     → change log
//!   minutes > 0  → suppression window
//! ```

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use livecount_service::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "livecount")]
#[command(about = "Self-expiring alive counts with a running aggregate (Livecount)")]
#[command(version)]
struct Cli {
    /// Base TTL in seconds for every key
    #[arg(long, global = true, default_value_t = 3)]
    ttl: u64,

    /// Upper bound of the random jitter added to the TTL, in seconds
    #[arg(long, global = true, default_value_t = 1)]
    fuzz: u64,

    /// Print library logs (honors RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: several nodes report, the aggregate follows
    Demo,
    /// Expiry: a node stops reporting and drops out of the aggregate
    Expiry,
    /// Suppression: an authoritative report pins a node's value
    Suppression,
    /// Recovery: rebuild the aggregate from persisted counts
    Recovery,
    /// Interactive REPL for manual experimentation
    Interactive,
}

type Aggregator = LivenessAggregator<MemoryDurableStore>;

fn build(cli: &Cli, store: MemoryDurableStore) -> Result<Aggregator, LivenessError> {
    let config = LivenessConfigBuilder::new()
        .base_ttl_secs(cli.ttl)
        .fuzz_secs(cli.fuzz)
        .change_log_capacity(20)
        .max_keys_per_recovery_page(4)
        .build()?;
    LivenessAggregator::new(config, Arc::new(store))
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn warn_step(text: &str) {
    println!("  {} {}", "!".bright_red(), text);
}

fn show_state(agg: &Aggregator) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Living count: {}", agg.living_count())
            .bright_yellow()
            .to_string()
    );
    println!("  ├{}┤", border);

    let mut values = agg.key_values();
    values.sort();
    if values.is_empty() {
        println!("  │ {:^42} │", "(no live keys)".dimmed().to_string());
    } else {
        let suppressed = agg.suppressed_keys();
        for (key, count) in &values {
            let marker = if suppressed.contains(key) { "pinned" } else { "" };
            let line = format!("  {:<20} = {:>6}  {}", key, count, marker);
            println!("  │ {:<42} │", line);
        }
    }
    println!("  └{}┘", border);
}

fn show_log(agg: &Aggregator) {
    let log = agg.change_log();
    if log.is_empty() {
        step("change log is empty");
        return;
    }
    for entry in log {
        println!(
            "    {} {:<12} {}",
            entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
            entry.key.bright_magenta(),
            entry.description
        );
    }
}

fn consistency_result(agg: &Aggregator) {
    let sum: i64 = agg.key_values().iter().map(|(_, c)| c).sum();
    if sum == agg.living_count() {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            format!("AGGREGATE CONSISTENT — {} == Σ key values", sum)
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            format!(
                "AGGREGATE MISMATCH — living {} vs Σ {}",
                agg.living_count(),
                sum
            )
            .bright_red()
            .bold()
        );
    }
}

async fn report(agg: &Aggregator, key: &str, count: i64, minutes: u32) {
    match agg.report_alive(key, count, minutes).await {
        Ok(ReportOutcome::Recorded { previous }) => {
            let before = previous
                .map(|p| p.to_string())
                .unwrap_or_else(|| "new".to_string());
            let pin = if minutes > 0 {
                format!("  (pinned {}m)", minutes)
            } else {
                String::new()
            };
            step(&format!("{}: {} → {}{}", key, before, count, pin));
        }
        Ok(ReportOutcome::Suppressed) => {
            warn_step(&format!("{}: report of {} dropped, key is pinned", key, count));
        }
        Err(err) => warn_step(&format!("{}: {}", key, err)),
    }
}

async fn countdown(secs: u64) {
    for remaining in (1..=secs).rev() {
        print!("\r  {} waiting {:>2}s ", "⏳".bright_cyan(), remaining);
        let _ = io::stdout().flush();
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    println!("\r  {} waited {}s    ", "⏳".bright_cyan(), secs);
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo(agg: &Aggregator) {
    header("DEMO — Reporting & Aggregation");

    section("Phase 1: Three nodes report their alive containers");
    report(agg, "node-1", 4, 0).await;
    report(agg, "node-2", 7, 0).await;
    report(agg, "node-3", 2, 0).await;
    show_state(agg);

    section("Phase 2: Counts change, the aggregate follows by delta");
    report(agg, "node-1", 6, 0).await;
    report(agg, "node-2", 7, 0).await;
    report(agg, "node-3", 0, 0).await;
    show_state(agg);

    section("Change log (most recent first)");
    show_log(agg);

    consistency_result(agg);
}

// ─── Expiry ────────────────────────────────────────────────────────────────

async fn run_expiry(agg: &Aggregator) {
    let ttl = agg.config().base_ttl_secs;
    let fuzz = agg.config().fuzz_secs;
    header("EXPIRY — Silent Nodes Leave the Aggregate");

    section("Phase 1: Two nodes report");
    report(agg, "node-1", 5, 0).await;
    report(agg, "node-2", 3, 0).await;
    show_state(agg);

    section(&format!(
        "Phase 2: Only node-2 keeps reporting (TTL {}s + up to {}s jitter)",
        ttl, fuzz
    ));
    let total = ttl + fuzz + 1;
    for _ in 0..total {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = agg.report_alive("node-2", 3, 0).await;
    }
    step(&format!("{}s elapsed", total));
    show_state(agg);

    match agg.try_get("node-1") {
        None => step("node-1 expired; its 5 left the aggregate exactly once"),
        Some(count) => warn_step(&format!("node-1 still live with {}", count)),
    }
    consistency_result(agg);
}

// ─── Suppression ───────────────────────────────────────────────────────────

async fn run_suppression(agg: &Aggregator) {
    header("SUPPRESSION — Pinning a Node During Failover");

    section("Phase 1: node-1 announces failover and pins its value for 1 minute");
    report(agg, "node-1", 0, 1).await;
    show_state(agg);

    section("Phase 2: Stale heartbeats for node-1 arrive and are dropped");
    report(agg, "node-1", 12, 0).await;
    report(agg, "node-1", 11, 0).await;
    show_state(agg);

    section("Phase 3: The pin is lifted; heartbeats apply again");
    if agg.end_suppression("node-1") {
        step("suppression for node-1 ended");
    }
    report(agg, "node-1", 9, 0).await;
    show_state(agg);

    section("Change log");
    show_log(agg);
}

// ─── Recovery ──────────────────────────────────────────────────────────────

async fn run_recovery(agg: &Aggregator) {
    header("RECOVERY — Replaying Persisted Counts");

    section("Phase 1: Persisted state from a previous primary");
    let mut persisted: Vec<(String, i64)> = agg
        .store()
        .list_keys(usize::MAX, None)
        .await
        .map(|page| page.keys)
        .unwrap_or_default()
        .into_iter()
        .map(|key| {
            let count = agg.store().get(&key).unwrap_or(0);
            (key, count)
        })
        .collect();
    persisted.sort();
    for (key, count) in &persisted {
        step(&format!("{} = {}", key, count));
    }

    section("Phase 2: Replay in pages");
    match agg.recover(&CancellationToken::new()).await {
        Ok(report) => {
            step(&format!(
                "{:?}: {} page(s), {} key(s) replayed, {} skipped",
                report.outcome, report.pages, report.keys_replayed, report.keys_skipped
            ));
        }
        Err(err) => warn_step(&err.to_string()),
    }
    show_state(agg);
    consistency_result(agg);
}

// ─── Interactive ───────────────────────────────────────────────────────────

async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input),
        }
    })
    .await
    .ok()
    .flatten()
}

async fn run_interactive(agg: &Aggregator) {
    header("INTERACTIVE REPL — Livecount Aggregator");

    println!();
    println!("  {}", "Commands:".bold().underline());
    println!(
        "    {} <key> <count> [min]     Report count, optionally pin for min minutes",
        "report".bright_cyan()
    );
    println!(
        "    {}                         Show living count and keys",
        "show".bright_cyan()
    );
    println!(
        "    {} [--json]                 Show change log",
        "log".bright_cyan()
    );
    println!(
        "    {} <key>                  End a key's suppression window",
        "release".bright_cyan()
    );
    println!(
        "    {}                         Exit",
        "quit".bright_cyan()
    );
    println!();

    loop {
        print!("{}", "livecount> ".bright_cyan().bold());
        let _ = io::stdout().flush();

        let Some(input) = read_line().await else {
            break;
        };
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "report" | "r" => {
                let parsed = match (parts.get(1), parts.get(2).and_then(|s| s.parse::<i64>().ok())) {
                    (Some(key), Some(count)) => Some((*key, count)),
                    _ => None,
                };
                let Some((key, count)) = parsed else {
                    warn_step("Usage: report <key> <count> [minutes]");
                    continue;
                };
                let minutes: u32 = parts.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);
                report(agg, key, count, minutes).await;
            }

            "show" | "s" => show_state(agg),

            "log" | "l" => {
                if parts.get(1) == Some(&"--json") {
                    match serde_json::to_string_pretty(&agg.change_log()) {
                        Ok(json) => println!("{}", json),
                        Err(err) => warn_step(&err.to_string()),
                    }
                } else {
                    show_log(agg);
                }
            }

            "release" => match parts.get(1) {
                Some(key) if agg.end_suppression(key) => step(&format!("{} released", key)),
                Some(key) => warn_step(&format!("{} is not pinned", key)),
                None => warn_step("Usage: release <key>"),
            },

            "quit" | "q" | "exit" => {
                println!("  {}", "Bye!".bright_cyan());
                break;
            }

            "help" | "h" | "?" => {
                println!("  report <key> <count> [min] | show | log [--json] | release <key> | quit");
            }

            other => {
                println!(
                    "  {} Unknown command '{}' — type 'help'",
                    "?".bright_yellow(),
                    other
                );
            }
        }
    }
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .init();
    }

    let store = match cli.command {
        Commands::Recovery => MemoryDurableStore::with_counts([
            ("node-a", 3),
            ("node-b", 8),
            ("node-c", 1),
            ("node-d", 4),
            ("node-e", 6),
            ("node-f", 2),
        ]),
        _ => MemoryDurableStore::new(),
    };

    let agg = match build(&cli, store) {
        Ok(agg) => agg,
        Err(err) => {
            eprintln!("{} {}", "error:".bright_red().bold(), err);
            std::process::exit(2);
        }
    };

    match cli.command {
        Commands::Demo => run_demo(&agg).await,
        Commands::Expiry => run_expiry(&agg).await,
        Commands::Suppression => run_suppression(&agg).await,
        Commands::Recovery => run_recovery(&agg).await,
        Commands::Interactive => run_interactive(&agg).await,
    }
}
