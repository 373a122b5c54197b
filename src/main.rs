mod config;
mod follow;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing::info;

use tailscope_client::{TailApi, TailClient};
use tailscope_logs::{
    FetchKind, FilterConfig, LogLevel, LogSession, Notice, Profile, ViewEvent, spawn_session,
};
use tailscope_types::{PRESET_KEYS, format_age};

use crate::config::AppConfig;
use crate::follow::Follower;

/// Tailscope - follow, filter and truncate remote log files
#[derive(Parser, Debug)]
#[command(name = "tailscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root URL of the log API (overrides the config file)
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the logs known to the server
    List,
    /// Print a log and follow it
    Tail(TailArgs),
    /// Empty a log on the server
    Truncate {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(clap::Args, Debug)]
struct TailArgs {
    /// Log name (defaults to the first existing log)
    #[arg(value_name = "NAME")]
    name: Option<String>,

    /// Only lines containing every token (comma or space separated)
    #[arg(long, short)]
    include: Vec<String>,

    /// Drop lines containing any token
    #[arg(long, short = 'x')]
    exclude: Vec<String>,

    /// Treat include tokens as regular expressions
    #[arg(long)]
    regex: bool,

    /// Minimum level (debug, info, warning, error)
    #[arg(long, value_name = "LEVEL")]
    min_level: Option<LogLevel>,

    /// Level profile (all, info, warnings, errors)
    #[arg(long, value_parser = parse_profile)]
    profile: Option<Profile>,

    /// Topic preset (auth, dhcp, wireless, vpn, dns, kernel)
    #[arg(long = "preset", value_parser = parse_preset)]
    presets: Vec<String>,

    /// Strip leading timestamps from printed lines
    #[arg(long)]
    no_timestamps: bool,

    /// Lines to fetch per window
    #[arg(long, short = 'n')]
    lines: Option<usize>,

    /// Print the current window and exit
    #[arg(long)]
    once: bool,
}

impl TailArgs {
    /// Overlay the command line on the configured filter
    fn filter(&self, base: FilterConfig) -> FilterConfig {
        let mut filter = base;
        for raw in &self.include {
            filter = filter.with_include(raw);
        }
        for raw in &self.exclude {
            filter = filter.with_exclude(raw);
        }
        for key in &self.presets {
            filter = filter.with_preset(key);
        }
        if let Some(profile) = self.profile {
            filter = filter.with_profile(profile);
        }
        if let Some(level) = self.min_level {
            filter.min_level = level;
        }
        filter.regex_enabled |= self.regex;
        filter.show_timestamps &= !self.no_timestamps;
        filter
    }
}

fn parse_profile(s: &str) -> Result<Profile, String> {
    [Profile::All, Profile::Info, Profile::Warnings, Profile::Errors]
        .into_iter()
        .find(|p| p.label().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown profile '{}'", s))
}

fn parse_preset(s: &str) -> Result<String, String> {
    let key = s.trim().to_lowercase();
    if PRESET_KEYS.contains(&key.as_str()) {
        Ok(key)
    } else {
        Err(format!(
            "unknown preset '{}', expected one of: {}",
            s,
            PRESET_KEYS.join(", ")
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(url) = args.base_url {
        config.client.base_url = url;
    }
    let client = TailClient::new(&config.client).context("Failed to set up the log API client")?;
    let api: Arc<dyn TailApi> = Arc::new(client);

    match args.command {
        Cmd::List => list(api.as_ref()).await,
        Cmd::Truncate { name } => {
            api.truncate(&name)
                .await
                .with_context(|| format!("Failed to truncate '{}'", name))?;
            eprintln!("Truncated {}", name);
            Ok(())
        }
        Cmd::Tail(tail) => {
            let filter = tail.filter(config.filter.clone());
            if let Some(lines) = tail.lines {
                config.session.window_lines = lines;
            }
            if tail.once {
                print_window(api.as_ref(), config, filter, tail.name).await
            } else {
                follow(api, config, filter, tail.name).await
            }
        }
    }
}

async fn list(api: &dyn TailApi) -> Result<()> {
    let logs = api.list_logs().await.context("Failed to list logs")?;
    let now = chrono::Utc::now();
    for log in logs {
        let age = log.age(now).map(format_age).unwrap_or_else(|| "-".to_string());
        let missing = if log.exists { "" } else { "  (missing)" };
        println!("{:<28} {:>12} {:>6}{}", log.name, log.size, age, missing);
    }
    Ok(())
}

/// One manual fetch through a session, without any live transport
async fn print_window(
    api: &dyn TailApi,
    config: AppConfig,
    filter: FilterConfig,
    name: Option<String>,
) -> Result<()> {
    let mut session = LogSession::new(config.session, filter);
    let name = match name {
        Some(name) => name,
        None => {
            let logs = api.list_logs().await.context("Failed to list logs")?;
            session
                .on_descriptors(logs)
                .context("The server has no logs")?
        }
    };

    session.select_log(&name);
    let request = session
        .begin_fetch(FetchKind::Manual)
        .context("No log selected")?;
    let result = api.fetch_tail(&request).await;
    session
        .finish_fetch(&request, FetchKind::Manual, result, Instant::now())
        .with_context(|| format!("Failed to fetch '{}'", name))?;

    let snapshot = session.snapshot();
    if snapshot.missing {
        anyhow::bail!("Log '{}' does not exist on the server", name);
    }
    if let Some(err) = &snapshot.regex_error {
        eprintln!("Regex ignored, matching plain text: {}", err);
    }
    if !snapshot.lines.is_empty() {
        println!("{}", session.copy_visible());
    }
    eprintln!("{}", snapshot.stats);
    Ok(())
}

async fn follow(
    api: Arc<dyn TailApi>,
    config: AppConfig,
    filter: FilterConfig,
    name: Option<String>,
) -> Result<()> {
    let mut out = Follower::new(
        std::io::stdout(),
        config.session.buffer_capacity(),
        filter.show_timestamps,
    );
    let (handle, mut events) = spawn_session(api, config.session, filter, name);
    let mut regex_error: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ViewEvent::Updated(_) => {
                        let snapshot = handle.snapshot();
                        if snapshot.regex_error != regex_error {
                            if let Some(err) = &snapshot.regex_error {
                                eprintln!("Regex ignored, matching plain text: {}", err);
                            }
                            regex_error = snapshot.regex_error.clone();
                        }
                        if !out.sync(&snapshot.lines)? {
                            eprintln!("-- view reloaded ({})", snapshot.stats);
                        }
                    }
                    ViewEvent::Notice(notice) => eprintln!("-- {}", describe(&notice)),
                    ViewEvent::Failed { action, error } => {
                        eprintln!("Error: {} failed: {}", action, error);
                    }
                    ViewEvent::StreamChanged(state) => info!(state = state.label(), "stream"),
                    ViewEvent::LogsChanged => {}
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn describe(notice: &Notice) -> String {
    match notice {
        Notice::Resynced { name } => format!("{} was rotated or truncated, window reloaded", name),
        Notice::FileMissing { name } => format!("{} does not exist (yet), waiting", name),
        Notice::Truncated { name } => format!("{} truncated", name),
    }
}
