use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledgerlimit::config::LimiterSettings;
use ledgerlimit::driver;

#[derive(Debug, Parser)]
#[command(name = "ledgerlimit", version, about = "Sliding-window rate limiter driver")]
struct Cli {
    /// YAML settings file; LEDGERLIMIT_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay `key,timestamp` lines and print one decision per request
    Replay {
        /// Input file; reads stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Probe with `allowed` instead of recording with `check_and_hit`
        #[arg(long)]
        probe: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Hammer one limiter from several threads at a fixed timestamp
    Stress {
        #[arg(long, default_value_t = 8)]
        threads: usize,

        #[arg(long, default_value_t = 1000)]
        calls: usize,

        #[arg(long, default_value_t = 16)]
        keys: usize,

        #[arg(long, default_value_t = 0)]
        timestamp: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = LimiterSettings::load(cli.config.as_deref())
        .context("failed to load limiter settings")?;
    let limiter = settings.build().context("invalid limiter settings")?;
    info!(
        max_requests = settings.max_requests,
        window_seconds = settings.window_seconds,
        concurrency = ?settings.concurrency,
        insert_mode = ?settings.insert_mode,
        reference = ?settings.reference,
        "Rate limiter initialized"
    );

    match cli.command {
        Command::Replay {
            input,
            probe,
            format,
        } => {
            let reader: Box<dyn BufRead> = match input {
                Some(path) => Box::new(BufReader::new(
                    File::open(&path)
                        .with_context(|| format!("failed to open {}", path.display()))?,
                )),
                None => Box::new(io::stdin().lock()),
            };

            let decisions = driver::replay(&limiter, reader, probe)?;

            let mut out = io::stdout().lock();
            for decision in &decisions {
                match format {
                    OutputFormat::Json => {
                        serde_json::to_writer(&mut out, decision)?;
                        writeln!(out)?;
                    }
                    OutputFormat::Text => writeln!(
                        out,
                        "{}\t{}\t{}",
                        decision.key,
                        decision.timestamp,
                        if decision.admitted { "allow" } else { "deny" }
                    )?,
                }
            }
        }
        Command::Stress {
            threads,
            calls,
            keys,
            timestamp,
        } => {
            let report = driver::stress(&limiter, threads, calls, keys, timestamp);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Install a stderr subscriber so stdout stays clean for decisions.
fn init_tracing(default_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
