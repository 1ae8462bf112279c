//! Hotpath CLI - viewer for per-line execution count reports

#![deny(warnings)]

// Global invariants enforced:
// - A single ReportEngine owns all report state for the session
// - Polling never overlaps; an in-flight poll does not hold up the status
//   tick, flash expiry or commands
// - Diagnostics go to stderr; rendered reports go to stdout

use anyhow::Context;
use clap::{Parser, Subcommand};
use hotpath_core::config::{self, ResolvedConfig};
use hotpath_core::freshness::STATUS_TICK_MS;
use hotpath_core::report::format_big_count;
use hotpath_core::source::PollOutcome;
use hotpath_core::storage::Preferences;
use hotpath_core::{
    now_ms, open_report, render_json, render_source, render_text, DirectorySource, EngineOptions,
    FileStore, Poller, ReportEngine,
};
use std::cell::RefCell;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hotpath")]
#[command(about = "View per-line execution count reports with live refresh and diff laps")]
#[command(version = env!("HOTPATH_VERSION"))]
struct Cli {
    /// Log debug diagnostics to stderr (overrides HOTPATH_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a report once
    Show {
        /// Directory holding the report files
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// File to show, as a display path (p/dir/File.java) or URL fragment (#p%2F...)
        #[arg(long)]
        select: Option<String>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Poll a report and re-render on every update
    ///
    /// Reads commands from stdin: `d` diff/lap, `c` clear diff, `a` toggle
    /// aggregates, `s` toggle show-all, `t` toggle theme, `o <path>` open a
    /// file, `f <path>` fold/unfold a folder, `q` quit.
    Watch {
        /// Directory holding the report files
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Poll interval in milliseconds (overrides config file)
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Poll like a report opened from file:// (script transport only)
        #[arg(long)]
        file_local: bool,

        /// Start in diff mode
        #[arg(long)]
        diff: bool,

        /// File to show, as a display path or URL fragment
        #[arg(long)]
        select: Option<String>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show or change persisted viewer preferences
    Prefs {
        /// Directory holding the report files
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: Option<PrefsAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print every preference
    Show,
    /// Switch between dark and light
    ToggleTheme,
    /// Include or hide files that were never executed
    ToggleShowAll,
    /// Show or hide folder totals
    ToggleAggregates,
    /// Collapse or expand a folder by display path
    ToggleFolder { path: String },
    /// Set the sidebar width (clamped to 200-800)
    SidebarWidth { width: u32 },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Show {
            dir,
            format,
            select,
            config: config_path,
        } => {
            let resolved = config::load_and_resolve(&dir, config_path.as_deref())
                .context("failed to load configuration")?;
            let mut engine = open_report(&dir, &resolved, now_ms())?;
            if let Some(target) = select {
                select_target(&mut engine, &target)?;
            }
            print_report(&engine, format)?;
        }
        Commands::Watch {
            dir,
            format,
            poll_interval,
            file_local,
            diff,
            select,
            config: config_path,
        } => {
            let mut resolved = config::load_and_resolve(&dir, config_path.as_deref())
                .context("failed to load configuration")?;
            if let Some(interval) = poll_interval {
                resolved = resolved.with_poll_interval(interval)?;
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(watch(
                &dir,
                &resolved,
                WatchOptions {
                    format,
                    file_local,
                    diff,
                    select,
                },
            ))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let report_dir = std::env::current_dir()?;
                match config::load_and_resolve(&report_dir, path.as_deref()) {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let report_dir = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&report_dir, path.as_deref())
                    .context("failed to load configuration")?;

                println!("Configuration:");
                if let Some(ref p) = resolved.config_path {
                    println!("  Source: {}", p.display());
                } else {
                    println!("  Source: defaults (no config file found)");
                }
                println!();
                println!("Report files:");
                println!("  json_file: {}", resolved.json_file);
                println!("  script_file: {}", resolved.script_file);
                println!("  state_file: {}", resolved.state_file);
                println!();
                println!("Timing:");
                println!("  poll_interval_ms: {}", resolved.poll_interval_ms);
                println!("  script_timeout_ms: {}", resolved.script_timeout_ms);
                println!("  flash_ms: {}", resolved.flash_ms);
                println!("  offline_timeout_ms: {}", resolved.offline_timeout_ms);
            }
        },
        Commands::Prefs {
            dir,
            config: config_path,
            action,
        } => {
            let resolved = config::load_and_resolve(&dir, config_path.as_deref())
                .context("failed to load configuration")?;
            let state_path = resolved.state_path(&dir);
            let mut prefs = Preferences::load(Box::new(FileStore::new(&state_path)));

            match action.unwrap_or(PrefsAction::Show) {
                PrefsAction::Show => {}
                PrefsAction::ToggleTheme => {
                    prefs.toggle_theme();
                }
                PrefsAction::ToggleShowAll => {
                    let show_all = !prefs.show_all();
                    prefs.set_show_all(show_all);
                }
                PrefsAction::ToggleAggregates => {
                    let show_aggregates = !prefs.show_aggregates();
                    prefs.set_show_aggregates(show_aggregates);
                }
                PrefsAction::ToggleFolder { path } => {
                    prefs.toggle_collapsed(&path);
                }
                PrefsAction::SidebarWidth { width } => {
                    prefs.set_sidebar_width(width);
                }
            }
            print_prefs(&prefs, &state_path);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("HOTPATH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_prefs(prefs: &Preferences, state_path: &Path) {
    println!("Preferences ({}):", state_path.display());
    println!("  theme: {}", prefs.theme().as_str());
    println!("  show_all: {}", prefs.show_all());
    println!("  show_aggregates: {}", prefs.show_aggregates());
    println!("  sidebar_width: {}", prefs.sidebar_width());
    if prefs.collapsed().is_empty() {
        println!("  collapsed: none");
    } else {
        println!("  collapsed:");
        for path in prefs.collapsed() {
            println!("    {}", path);
        }
    }
}

/// Select by display path, or by URL fragment when it starts with `#`
fn select_target(engine: &mut ReportEngine, target: &str) -> anyhow::Result<()> {
    let found = if target.starts_with('#') {
        engine.restore_from_fragment(target).is_some()
    } else {
        engine.select(target);
        engine.selected().is_some()
    };
    if !found {
        anyhow::bail!("no file matches: {}", target);
    }
    Ok(())
}

fn print_report(engine: &ReportEngine, format: OutputFormat) -> anyhow::Result<()> {
    let now = now_ms();
    match format {
        OutputFormat::Text => {
            print!("{}", render_text(engine, now));
            if let Some(id) = engine.selected() {
                println!();
                print!("{}", render_source(engine, id));
            }
        }
        OutputFormat::Json => println!("{}", render_json(engine, now)?),
    }
    Ok(())
}

struct WatchOptions {
    format: OutputFormat,
    file_local: bool,
    diff: bool,
    select: Option<String>,
}

async fn watch(dir: &Path, config: &ResolvedConfig, options: WatchOptions) -> anyhow::Result<()> {
    let engine = match open_report(dir, config, now_ms()) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::warn!("starting without data: {:#}", e);
            let prefs = Preferences::load(Box::new(FileStore::new(config.state_path(dir))));
            ReportEngine::new(EngineOptions::from(config), prefs)
        }
    };
    let engine = RefCell::new(engine);
    if options.diff {
        engine.borrow_mut().toggle_diff();
    }
    if let Some(target) = options.select.as_deref() {
        if let Err(e) = select_target(&mut engine.borrow_mut(), target) {
            tracing::warn!("{:#}", e);
        }
    }

    let poller = Poller::new(DirectorySource::new(dir, config).file_local(options.file_local));
    let mut poll = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
    // a slow poll delays the next one instead of queueing a burst
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut status = tokio::time::interval(Duration::from_millis(STATUS_TICK_MS));
    let mut commands = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut in_flight: Option<Pin<Box<dyn Future<Output = PollOutcome> + '_>>> = None;

    redraw(&engine.borrow(), options.format)?;

    loop {
        let flash_wait = engine
            .borrow()
            .next_flash_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now_ms())));
        let polling = in_flight.is_some();

        tokio::select! {
            _ = poll.tick(), if !polling => {
                in_flight = Some(Box::pin(poller.poll(&engine, now_ms)));
            }
            outcome = async {
                match in_flight.as_mut() {
                    Some(pending) => pending.await,
                    None => std::future::pending().await,
                }
            }, if polling => {
                in_flight = None;
                if outcome == PollOutcome::Updated {
                    redraw(&engine.borrow(), options.format)?;
                }
            }
            _ = status.tick() => {
                let report = engine.borrow_mut().tick(now_ms());
                if report.previous.is_some() || !report.cleared.is_empty() {
                    redraw(&engine.borrow(), options.format)?;
                }
            }
            _ = tokio::time::sleep(flash_wait.unwrap_or(Duration::ZERO)), if flash_wait.is_some() => {
                if !engine.borrow_mut().expire_flashes(now_ms()).is_empty() {
                    redraw(&engine.borrow(), options.format)?;
                }
            }
            line = commands.next_line(), if stdin_open => {
                match line.context("failed to read command")? {
                    Some(line) => {
                        let command = apply_command(&mut engine.borrow_mut(), line.trim());
                        match command {
                            Command::Quit => break,
                            Command::Redraw => redraw(&engine.borrow(), options.format)?,
                            Command::Ignored => {}
                        }
                    }
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let engine = engine.borrow();
    eprintln!(
        "hotpath: {} executions across {} files",
        format_big_count(engine.total_executions()),
        engine.total_files()
    );
    Ok(())
}

enum Command {
    Redraw,
    Ignored,
    Quit,
}

fn apply_command(engine: &mut ReportEngine, line: &str) -> Command {
    let now = now_ms();
    let (cmd, arg) = match line.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };
    match cmd {
        "q" | "quit" => return Command::Quit,
        "d" | "diff" => engine.toggle_diff(),
        "c" | "clear" => engine.clear_diff(),
        "a" | "aggregates" => {
            engine.toggle_aggregates();
        }
        "s" | "show-all" => {
            engine.toggle_show_all(now);
        }
        "t" | "theme" => {
            let theme = engine.toggle_theme();
            tracing::info!(theme = theme.as_str(), "theme changed");
        }
        "o" | "open" => {
            if let Err(e) = select_target(engine, arg) {
                eprintln!("{:#}", e);
                return Command::Ignored;
            }
        }
        "f" | "fold" => {
            engine.toggle_folder(arg);
        }
        "" => return Command::Ignored,
        other => {
            eprintln!("unknown command: {}", other);
            return Command::Ignored;
        }
    }
    Command::Redraw
}

fn redraw(engine: &ReportEngine, format: OutputFormat) -> anyhow::Result<()> {
    if matches!(format, OutputFormat::Text) {
        // clear screen, cursor home
        print!("\x1b[2J\x1b[H");
    }
    print_report(engine, format)
}
