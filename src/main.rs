use clap::{Parser, Subcommand};
use inkrefresh::scheduler::{CycleEvent, CycleOutcome, ScheduleEntry};
use inkrefresh::state::StateStore;
use inkrefresh::{config, output, plugin, runtime};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "inkrefresh")]
#[command(about = "Refresh daemon for e-paper and other slow raster displays")]
#[command(long_about = "\
Refresh daemon for e-paper and other slow raster displays

Each configured source names a plugin and an interval. On every cycle the
plugin produces an image (or an HTML page, rasterized with headless
Chromium), which is rotated, cropped and enhanced for the panel. Content
identical to what the panel already shows is skipped.

Plugins:
  image      a file, or a directory shown in rotation      (settings: path)
  markdown   Markdown rendered as a page                    (settings: text | file, title)
  html       an HTML document                               (settings: file)

Run 'inkrefresh gen-config' to generate a documented inkrefresh.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, short, default_value = "inkrefresh.toml", global = true)]
    config: PathBuf,

    /// Log debug output
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh every source on its interval until interrupted
    Run {
        /// Read commands from stdin: `trigger <source>`, `status`, `quit`
        #[arg(long)]
        interactive: bool,
    },
    /// Run a single cycle for one source and exit
    Render {
        /// Source id from the config file
        source: String,
    },
    /// Validate the config and look for a headless browser
    Check,
    /// Show what the device last displayed
    Status,
    /// Print a stock inkrefresh.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    match cli.command {
        Command::Run { interactive } => {
            let app = config::load_config(&cli.config)?;
            if app.sources.is_empty() {
                log::warn!("no sources configured in {}", cli.config.display());
            }
            let (tx, rx) = std::sync::mpsc::channel();
            let scheduler = Arc::new(runtime::build_scheduler(&app)?.with_events(tx));

            let on_signal = Arc::clone(&scheduler);
            ctrlc::set_handler(move || {
                log::info!("interrupted, stopping");
                on_signal.stop();
                if interactive {
                    // The console thread is blocked on stdin.
                    std::process::exit(130);
                }
            })?;
            scheduler.start()?;

            if interactive {
                let printer = std::thread::spawn(move || {
                    for event in rx {
                        output::print_cycle_event(&event);
                    }
                });
                run_console(&scheduler)?;
                scheduler.stop();
                if printer.join().is_err() {
                    log::error!("output thread panicked");
                }
            } else {
                // Ends once stop() has joined the loop and dropped its sender.
                for event in rx {
                    output::print_cycle_event(&event);
                }
            }
        }
        Command::Render { source } => {
            let app = config::load_config(&cli.config)?;
            let source = app
                .source(&source)
                .cloned()
                .ok_or_else(|| format!("no source '{source}' in {}", cli.config.display()))?;
            let mut runner = runtime::build_runner(&app)?;

            let cancel = Arc::new(AtomicBool::new(false));
            let on_signal = Arc::clone(&cancel);
            ctrlc::set_handler(move || {
                log::info!("interrupted, abandoning cycle at the next checkpoint");
                on_signal.store(true, Ordering::SeqCst);
            })?;

            let entry = ScheduleEntry::manual(source);
            let started = Instant::now();
            let started_at = chrono::Utc::now();
            let result = runner.run_cycle(&entry, &cancel);
            let failed = result.as_ref().err().map(|e| e.to_string());
            output::print_cycle_event(&CycleEvent {
                source_id: entry.source.id.clone(),
                priority: entry.priority,
                outcome: CycleOutcome::from_result(result),
                started_at,
                elapsed: started.elapsed(),
            });
            if let Some(message) = failed {
                return Err(message.into());
            }
        }
        Command::Check => {
            let app = config::load_config(&cli.config)?;
            let diag = runtime::diagnose(&app, &plugin::PluginRegistry::with_builtin());
            output::print_diagnostics(&diag, app.sources.len());
            if !diag.is_ok() {
                return Err("configuration references unknown plugins".into());
            }
            println!("==> {} is valid", cli.config.display());
        }
        Command::Status => {
            let app = config::load_config(&cli.config)?;
            let store = StateStore::new(&app.device.state_file);
            output::print_device_state(&store.load(), store.path());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Read console commands until `quit` or end of input.
fn run_console(scheduler: &inkrefresh::scheduler::Scheduler) -> std::io::Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (None, _) => {}
            (Some("trigger"), Some(id)) => match scheduler.trigger_source(id) {
                Ok(()) => println!("queued {id}"),
                Err(e) => println!("{e}"),
            },
            (Some("status"), None) => output::print_status(scheduler.phase(), &scheduler.status()),
            (Some("quit" | "exit"), None) => break,
            _ => println!("commands: trigger <source> | status | quit"),
        }
    }
    Ok(())
}
