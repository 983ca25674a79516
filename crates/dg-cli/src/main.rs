//! # dg-cli — The "Moat" of DIRGE
//!
//! Minimal CLI over the diagnostics store.
//!
//! - `dg hub` — launch the diagnostics hub.
//! - `dg seed` — fill a store directory with demo events.
//! - `dg query` — run a local query, NDJSON rows on stdout.
//! - `dg status` — per-partition counts for a store directory.

use std::path::PathBuf;
use std::process::Command;

use clap::{Parser, Subcommand};
use rand::seq::SliceRandom;
use rand::Rng;

use dg_core::{EventKind, EventRecord, ALL_KINDS};
use dg_query::{QueryArgument, QueryEngine, QueryLimits, QueryRule, ResultSink};
use dg_store::EventStore;

/// DIRGE — device-local diagnostics, queryable.
#[derive(Parser)]
#[command(name = "dg", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the diagnostics hub.
    Hub {
        /// Server bind address.
        #[arg(long)]
        bind: Option<String>,

        /// Event store directory.
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Path to the hub config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Generate demo events into a store directory.
    Seed {
        /// Event store directory.
        #[arg(long, default_value = "dirge-store")]
        store_dir: PathBuf,

        /// How many events to generate.
        #[arg(long, default_value_t = 100)]
        count: usize,
    },

    /// Run a query against a local store directory.
    Query {
        /// Event store directory.
        #[arg(long, default_value = "dirge-store")]
        store_dir: PathBuf,

        /// Window start, epoch milliseconds (-1 = unbounded).
        #[arg(long, default_value_t = -1)]
        begin: i64,

        /// Window end, epoch milliseconds (-1 = unbounded).
        #[arg(long, default_value_t = -1)]
        end: i64,

        /// Most events to return (-1 = unbounded).
        #[arg(long, default_value_t = -1)]
        max_events: i32,

        /// Sequence window start (with --to-seq, switches to
        /// sequence-ordered pagination).
        #[arg(long)]
        from_seq: Option<i64>,

        /// Sequence window end.
        #[arg(long)]
        to_seq: Option<i64>,

        /// Restrict to one domain.
        #[arg(long)]
        domain: Option<String>,

        /// Restrict to event names (repeatable; requires --domain).
        #[arg(long = "name")]
        names: Vec<String>,

        /// Restrict to one partition (1=fault 2=statistic 3=security
        /// 4=behavior; 0 = all).
        #[arg(long, default_value_t = 0)]
        event_type: u32,

        /// Raw condition JSON attached to the rule.
        #[arg(long)]
        condition: Option<String>,
    },

    /// Report per-partition counts for a store directory.
    Status {
        /// Event store directory.
        #[arg(long, default_value = "dirge-store")]
        store_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Hub {
            bind,
            store_dir,
            config,
        } => run_hub(bind, store_dir, config),
        Commands::Seed { store_dir, count } => run_seed(&store_dir, count),
        Commands::Query {
            store_dir,
            begin,
            end,
            max_events,
            from_seq,
            to_seq,
            domain,
            names,
            event_type,
            condition,
        } => run_query(
            &store_dir, begin, end, max_events, from_seq, to_seq, domain, names, event_type,
            condition,
        ),
        Commands::Status { store_dir } => run_status(&store_dir),
    }
}

// =============================================================================
// hub
// =============================================================================

fn run_hub(bind: Option<String>, store_dir: Option<PathBuf>, config: Option<PathBuf>) {
    let mut command = Command::new("dg-hub");
    if let Some(bind) = bind {
        command.arg("--bind").arg(bind);
    }
    if let Some(dir) = store_dir {
        command.arg("--store-dir").arg(dir);
    }
    if let Some(config) = config {
        command.arg("--config").arg(config);
    }
    match command.status() {
        Ok(status) if status.success() => {}
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(error) => {
            eprintln!("failed to launch dg-hub (is it on PATH?): {error}");
            std::process::exit(1);
        }
    }
}

// =============================================================================
// seed
// =============================================================================

const DEMO_DOMAINS: &[&str] = &["RELIABILITY", "POWER", "GRAPHIC", "ACCOUNT", "USB"];
const DEMO_NAMES: &[&str] = &[
    "APP_FREEZE",
    "CPP_CRASH",
    "BATTERY_DRAIN",
    "FRAME_DROP",
    "LOGIN",
    "PLUG_IN",
];

fn run_seed(store_dir: &PathBuf, count: usize) {
    let store = match EventStore::open(store_dir) {
        Ok(store) => store,
        Err(error) => {
            eprintln!("cannot open store at {}: {error}", store_dir.display());
            std::process::exit(1);
        }
    };

    let mut rng = rand::thread_rng();
    let now = chrono::Utc::now().timestamp_millis();
    for _ in 0..count {
        let kind = *ALL_KINDS.choose(&mut rng).unwrap_or(&EventKind::Fault);
        let domain = DEMO_DOMAINS.choose(&mut rng).unwrap_or(&"RELIABILITY");
        let name = DEMO_NAMES.choose(&mut rng).unwrap_or(&"APP_FREEZE");
        // Jitter timestamps over the last hour.
        let time = now - rng.gen_range(0..3_600_000);
        let record = EventRecord::new(*domain, *name, kind, time)
            .with_param("PID", rng.gen_range(1..10_000i64))
            .with_param("UID", rng.gen_range(0..20_000i64));
        if let Err(error) = store.append(record) {
            eprintln!("append failed: {error}");
            std::process::exit(1);
        }
    }
    println!(
        "seeded {count} events into {} (max seq {})",
        store_dir.display(),
        store.max_seq()
    );
}

// =============================================================================
// query
// =============================================================================

/// NDJSON rows to stdout, one completion summary line to stderr.
struct PrintSink {
    batches: usize,
}

impl ResultSink for PrintSink {
    fn on_batch(&mut self, rows: Vec<String>, _seqs: Vec<i64>) {
        self.batches += 1;
        for row in rows {
            println!("{row}");
        }
    }

    fn on_complete(&mut self, status: i32, total_transported: i64) {
        eprintln!(
            "query complete: status={status} total={total_transported} batches={}",
            self.batches
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn run_query(
    store_dir: &PathBuf,
    begin: i64,
    end: i64,
    max_events: i32,
    from_seq: Option<i64>,
    to_seq: Option<i64>,
    domain: Option<String>,
    names: Vec<String>,
    event_type: u32,
    condition: Option<String>,
) {
    let store = match EventStore::open(store_dir) {
        Ok(store) => store,
        Err(error) => {
            eprintln!("cannot open store at {}: {error}", store_dir.display());
            std::process::exit(1);
        }
    };

    let argument = QueryArgument {
        begin_time: begin,
        end_time: end,
        max_events,
        from_seq,
        to_seq,
    };
    let mut rules = Vec::new();
    if let Some(domain) = domain {
        let mut rule = QueryRule::new(domain, names, event_type);
        if let Some(condition) = condition {
            rule = rule.with_filter(condition);
        }
        rules.push(rule);
    } else if !names.is_empty() || condition.is_some() {
        eprintln!("--name and --condition require --domain");
        std::process::exit(2);
    }

    let engine = QueryEngine::new(QueryLimits::default());
    let mut sink = PrintSink { batches: 0 };
    let report = engine.run(&store, &argument, &rules, &mut sink);
    if report.status != dg_query::status::OK {
        std::process::exit(1);
    }
}

// =============================================================================
// status
// =============================================================================

fn run_status(store_dir: &PathBuf) {
    let store = match EventStore::open(store_dir) {
        Ok(store) => store,
        Err(error) => {
            eprintln!("cannot open store at {}: {error}", store_dir.display());
            std::process::exit(1);
        }
    };
    let partitions: Vec<serde_json::Value> = store
        .counts()
        .into_iter()
        .map(|(kind, count)| serde_json::json!({"kind": kind.name(), "count": count}))
        .collect();
    let status = serde_json::json!({
        "store_dir": store_dir.display().to_string(),
        "max_seq": store.max_seq(),
        "partitions": partitions,
    });
    println!("{}", serde_json::to_string_pretty(&status).unwrap());
}
