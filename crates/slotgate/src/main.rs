//! slotgate CLI
//!
//! Thin wrapper over `slotgate-core`: validate a page configuration, inspect
//! breakpoint and ordering decisions, and simulate a page load against a
//! recording backend.
//!
//! ## Usage
//! ```bash
//! slotgate --config page.toml check --strict
//! slotgate --config page.toml breakpoint --width 1024
//! slotgate --config page.toml order
//! slotgate --config page.toml --format json simulate --context ctx.json --events events.json
//! ```
//!
//! Exit code 0 on success, 1 on configuration or I/O errors. Errors print
//! remediation text on stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use slotgate_core::backend::RecordingBackend;
use slotgate_core::breakpoint::BreakpointResolver;
use slotgate_core::config::{Config, LogFormat};
use slotgate_core::error::{ConfigError, Remediation};
use slotgate_core::host::{PageContext, StaticHost};
use slotgate_core::lifecycle::{
    Collaborators, LifecycleController, PassReport, RegistrationReport, SlotEvent,
};
use slotgate_core::logging::init_logging;
use slotgate_core::slot::{Priority, RenderState, Slot};
use slotgate_core::storage::{JsonFileStore, KeyValueStore, MemoryStore};

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "slotgate")]
#[command(about = "Admission and conflict resolution for page ad slots")]
#[command(version)]
struct Cli {
    /// Page configuration file
    #[arg(long, global = true, env = "SLOTGATE_CONFIG", default_value = "slotgate.toml")]
    config: PathBuf,

    /// Output format (pretty or json)
    #[arg(long, global = true, default_value = "pretty")]
    format: LogFormat,

    /// Log level filter, overriding `[log] level` (RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and list registered and rejected slots
    Check {
        /// Exit non-zero when any slot is rejected
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Resolve a viewport width and report which slots have an ad there
    Breakpoint {
        /// Viewport width in pixels
        #[arg(long)]
        width: u32,
    },

    /// Print the initial-pass definition order
    Order,

    /// Run a page load against a recording backend and print the final state
    Simulate {
        /// Page context JSON: page signals plus host elements
        #[arg(long)]
        context: PathBuf,

        /// JSON array of outcome and breakpoint events, applied in order
        #[arg(long)]
        events: Option<PathBuf>,

        /// Durable store file for throttle and funnel state (in-memory when omitted)
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

/// Contents of `simulate --context`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SimulationContext {
    #[serde(flatten)]
    page: PageContext,
    host: StaticHost,
    /// Pinned clock (epoch ms); wall clock when absent.
    now_ms: Option<i64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(remediation) = remediation_for(&err) {
                eprint!("{}", remediation.render_plain());
            }
            ExitCode::FAILURE
        }
    }
}

fn remediation_for(err: &anyhow::Error) -> Option<Remediation> {
    if let Some(config) = err.downcast_ref::<ConfigError>() {
        return Some(config.remediation());
    }
    err.downcast_ref::<slotgate_core::Error>()
        .and_then(slotgate_core::Error::remediation)
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load_from(&cli.config)?;

    let mut log = config.log.clone();
    if let Some(level) = &cli.log_level {
        log.level.clone_from(level);
    }
    init_logging(&log).context("failed to initialize logging")?;
    debug!(
        config = %cli.config.display(),
        slots = config.slots.len(),
        "Configuration loaded"
    );

    match &cli.command {
        Command::Check { strict } => cmd_check(&config, cli.format, *strict),
        Command::Breakpoint { width } => cmd_breakpoint(&config, cli.format, *width),
        Command::Order => cmd_order(&config, cli.format),
        Command::Simulate {
            context,
            events,
            store,
        } => cmd_simulate(
            &config,
            cli.format,
            context,
            events.as_deref(),
            store.as_deref(),
        ),
    }
}

fn controller(
    config: &Config,
    context: PageContext,
    host: StaticHost,
    durable: Box<dyn KeyValueStore>,
) -> Result<LifecycleController<RecordingBackend>> {
    let ctl = LifecycleController::new(
        config,
        context,
        Collaborators {
            host: Box::new(host),
            backend: RecordingBackend::new(),
            durable,
            session: Box::new(MemoryStore::new()),
        },
    )?;
    Ok(ctl)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// check
// =============================================================================

fn cmd_check(config: &Config, format: LogFormat, strict: bool) -> Result<()> {
    let mut ctl = controller(
        config,
        PageContext::default(),
        StaticHost::new(),
        Box::new(MemoryStore::new()),
    )?;
    let report = ctl.register_slots(config.slots.iter().cloned());

    match format {
        LogFormat::Json => print_json(&registration_json(&report))?,
        LogFormat::Pretty => {
            println!(
                "{} slot(s) registered, {} rejected",
                report.registered.len(),
                report.rejected.len()
            );
            for id in &report.registered {
                let note = if report.deferred.contains(id) {
                    " (deferred)"
                } else {
                    ""
                };
                println!("  ok        {id}{note}");
            }
            for err in &report.rejected {
                println!("  rejected  {}: {err}", err.slot_id().unwrap_or("-"));
            }
        }
    }

    if strict {
        if let Some(first) = report.rejected.first() {
            return Err(anyhow::Error::new(first.clone())
                .context(format!("{} slot(s) rejected", report.rejected.len())));
        }
    }
    Ok(())
}

fn registration_json(report: &RegistrationReport) -> Value {
    let rejected: Vec<Value> = report
        .rejected
        .iter()
        .map(|e| json!({ "slot": e.slot_id(), "error": e.to_string() }))
        .collect();
    json!({
        "registered": report.registered,
        "deferred": report.deferred,
        "rejected": rejected,
    })
}

// =============================================================================
// breakpoint
// =============================================================================

fn cmd_breakpoint(config: &Config, format: LogFormat, width: u32) -> Result<()> {
    let resolver = BreakpointResolver::new(&config.breakpoints)?;
    let breakpoint = resolver.resolve(width);

    let rows: Vec<(String, std::result::Result<bool, String>)> = config
        .slots
        .iter()
        .map(|cfg| {
            let has_ad = match Slot::from_config(cfg.clone(), &resolver) {
                Ok(slot) if slot.is_responsive() => resolver
                    .has_ad_at(&slot, &breakpoint)
                    .map_err(|e| e.to_string()),
                Ok(_) => Ok(true),
                Err(err) => Err(err.to_string()),
            };
            (cfg.id.clone(), has_ad)
        })
        .collect();

    match format {
        LogFormat::Json => {
            let slots: Vec<Value> = rows
                .iter()
                .map(|(id, has_ad)| match has_ad {
                    Ok(value) => json!({ "id": id, "has_ad": value }),
                    Err(err) => json!({ "id": id, "has_ad": null, "error": err }),
                })
                .collect();
            print_json(&json!({
                "width": width,
                "breakpoint": breakpoint.name,
                "index": breakpoint.index,
                "slots": slots,
            }))?;
        }
        LogFormat::Pretty => {
            println!("breakpoint: {breakpoint} (width {width})");
            for (id, has_ad) in &rows {
                match has_ad {
                    Ok(true) => println!("  {id:<32} ad"),
                    Ok(false) => println!("  {id:<32} no ad"),
                    Err(err) => println!("  {id:<32} invalid: {err}"),
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// order
// =============================================================================

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

fn cmd_order(config: &Config, format: LogFormat) -> Result<()> {
    let mut ctl = controller(
        config,
        PageContext::default(),
        StaticHost::new(),
        Box::new(MemoryStore::new()),
    )?;
    let report = ctl.register_slots(config.slots.iter().cloned());
    let order = ctl.scheduled_ids();
    let unscheduled: Vec<&String> = report
        .registered
        .iter()
        .filter(|id| !order.contains(id))
        .collect();

    let entries: Vec<(usize, &str, &'static str)> = order
        .iter()
        .enumerate()
        .filter_map(|(i, id)| {
            ctl.slot(id)
                .map(|s| (i + 1, id.as_str(), priority_label(s.priority())))
        })
        .collect();

    match format {
        LogFormat::Json => {
            let order: Vec<Value> = entries
                .iter()
                .map(|(pos, id, priority)| json!({ "position": pos, "id": id, "priority": priority }))
                .collect();
            print_json(&json!({ "order": order, "unscheduled": unscheduled }))?;
        }
        LogFormat::Pretty => {
            for (pos, id, priority) in &entries {
                println!("{pos:>3}. {id} ({priority})");
            }
            for id in unscheduled {
                println!("  -. {id} (not scheduled)");
            }
        }
    }
    Ok(())
}

// =============================================================================
// simulate
// =============================================================================

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(slotgate_core::Error::from)
        .with_context(|| format!("failed to read {what} {}", path.display()))?;
    let value = serde_json::from_str(&text)
        .map_err(slotgate_core::Error::from)
        .with_context(|| format!("failed to parse {what} {}", path.display()))?;
    Ok(value)
}

fn state_label(state: RenderState) -> String {
    match state {
        RenderState::Unrequested => "unrequested".to_string(),
        RenderState::Requested => "requested".to_string(),
        RenderState::Rendered(size) => format!("rendered {size}"),
        RenderState::RenderedEmpty => "rendered empty".to_string(),
    }
}

fn pass_json(report: &PassReport) -> Value {
    let denied: Vec<Value> = report
        .denied
        .iter()
        .map(|(id, reason)| json!({ "id": id, "reason": reason }))
        .collect();
    let errored: Vec<Value> = report
        .errored
        .iter()
        .map(|(id, error)| json!({ "id": id, "error": error }))
        .collect();
    json!({
        "admitted": report.admitted,
        "denied": denied,
        "errored": errored,
        "hidden": report.hidden,
        "flush": report.flush,
    })
}

fn print_pass(label: &str, report: &PassReport) {
    println!(
        "{label}: {} admitted, {} denied, {} errored, {} hidden",
        report.admitted.len(),
        report.denied.len(),
        report.errored.len(),
        report.hidden.len()
    );
    for id in &report.admitted {
        println!("  admitted  {id}");
    }
    for (id, reason) in &report.denied {
        println!("  denied    {id}: {reason}");
    }
    for (id, error) in &report.errored {
        println!("  errored   {id}: {error}");
    }
}

fn cmd_simulate(
    config: &Config,
    format: LogFormat,
    context: &Path,
    events: Option<&Path>,
    store: Option<&Path>,
) -> Result<()> {
    let sim: SimulationContext = read_json_file(context, "context")?;
    let events: Vec<SlotEvent> = match events {
        Some(path) => read_json_file(path, "events")?,
        None => Vec::new(),
    };
    let durable: Box<dyn KeyValueStore> = match store {
        Some(path) => Box::new(
            JsonFileStore::open(path)
                .map_err(slotgate_core::Error::from)
                .with_context(|| format!("failed to open store {}", path.display()))?,
        ),
        None => Box::new(MemoryStore::new()),
    };

    let mut ctl = controller(config, sim.page, sim.host, durable)?;
    if let Some(now) = sim.now_ms {
        ctl.set_now(now);
    }

    let registration = ctl.register_slots(config.slots.iter().cloned());
    let initial = ctl.run_initial_pass();
    let event_count = events.len();
    for event in events {
        ctl.enqueue(event);
    }
    let after_events = ctl.process_events();
    let snapshot = ctl.snapshot();

    match format {
        LogFormat::Json => print_json(&json!({
            "registration": registration_json(&registration),
            "initial_pass": pass_json(&initial),
            "events": pass_json(&after_events),
            "snapshot": snapshot,
            "calls": ctl.backend().calls(),
        }))?,
        LogFormat::Pretty => {
            for err in &registration.rejected {
                println!("rejected  {}: {err}", err.slot_id().unwrap_or("-"));
            }
            print_pass("initial pass", &initial);
            print_pass(&format!("{event_count} event(s)"), &after_events);
            println!(
                "breakpoint: {} (width {})",
                snapshot.breakpoint, snapshot.viewport_width
            );
            for slot in &snapshot.slots {
                let mut flags = Vec::new();
                if slot.hidden {
                    flags.push("hidden");
                }
                if slot.deferred {
                    flags.push("deferred");
                }
                println!(
                    "  {:<32} {:<20} {}",
                    slot.id,
                    state_label(slot.state),
                    flags.join(",")
                );
            }
            let c = snapshot.counters;
            println!(
                "counters: admitted={} denied={} errored={} released={} hidden={}",
                c.admitted, c.denied, c.errored, c.released, c.hidden
            );
        }
    }
    Ok(())
}
