// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! applesword command line front end.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use applesword::config::{self, Config};
use applesword::error::{engine_unreachable, ErrorBuilder};
use applesword::{
    format_bytes, Activation, AddOptions, BatchOutcome, Bucket, DownloadTask, Engine, Poller,
    RpcClient, SelectionFlow, Snapshot, StoreOptions, TaskStatus, TaskStore,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// AppleSword - download manager front end for aria2.
#[derive(Parser)]
#[command(name = "applesword")]
#[command(version = VERSION)]
#[command(about = "Manage aria2 downloads: list, add, pause, resume, stop and remove tasks.")]
#[command(long_about = "AppleSword - download manager front end for aria2\n\n\
    Start the engine:    aria2c --enable-rpc\n\
    List tasks:          applesword list\n\
    Follow progress:     applesword watch\n\
    Add a download:      applesword add <uri>\n\
    Add a torrent:       applesword torrent file.torrent\n\
    Configure:           applesword config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON-RPC endpoint (overrides the config file for this run)
    #[arg(long, global = true, value_name = "URL")]
    rpc_url: Option<String>,

    /// RPC secret (overrides the config file for this run)
    #[arg(long, global = true)]
    secret: Option<String>,

    /// Verbose mode: debug logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks once
    #[command(alias = "ls")]
    List {
        /// all, downloading, waiting, stopped or completed
        #[arg(short, long, default_value = "all")]
        bucket: Bucket,
        /// Print the tasks as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep refreshing and print the task list on every change (Ctrl-C to quit)
    Watch {
        #[arg(short, long, default_value = "all")]
        bucket: Bucket,
    },
    /// Add a download; several URIs are treated as mirrors of one file
    Add {
        #[arg(required = true)]
        uris: Vec<String>,
        /// Destination directory
        #[arg(short, long)]
        dir: Option<String>,
        /// Output file name
        #[arg(short, long)]
        out: Option<String>,
        /// Connections per download
        #[arg(long)]
        split: Option<u32>,
    },
    /// Open a magnet link, applesword:// link, URL or .torrent file
    Open {
        target: String,
        #[arg(short, long)]
        dir: Option<String>,
        /// Add torrents without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Add a .torrent file, optionally choosing which files to download
    ///
    /// Examples:
    ///   applesword torrent show.torrent
    ///   applesword torrent show.torrent --select 1,3 --yes
    Torrent {
        file: PathBuf,
        /// Comma-separated file indices (default: all files)
        #[arg(short, long, value_delimiter = ',')]
        select: Vec<String>,
        #[arg(short, long)]
        dir: Option<String>,
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the contents of a .torrent file without adding it
    Inspect { file: PathBuf },
    /// Pause tasks
    Pause {
        #[arg(required = true)]
        gids: Vec<String>,
    },
    /// Resume paused tasks
    Resume {
        #[arg(required = true)]
        gids: Vec<String>,
    },
    /// Stop tasks immediately (force pause)
    Stop {
        #[arg(required = true)]
        gids: Vec<String>,
    },
    /// Remove tasks
    #[command(alias = "rm")]
    Remove {
        #[arg(required = true)]
        gids: Vec<String>,
    },
    /// Show the engine version
    Version,
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file location
    Path,
    /// Set a configuration key
    ///
    /// Keys: rpc_url, rpc_secret, rpc_timeout_secs, poll_interval_ms,
    /// removal_suppression_secs, failure_threshold, page_size, download_dir
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let mut config = config::load_config()?;
    if let Some(url) = cli.rpc_url {
        config.rpc_url = url;
    }
    if let Some(secret) = cli.secret {
        config.rpc_secret = Some(secret);
    }

    if let Commands::Config { command } = cli.command {
        return handle_config(command, config);
    }
    if let Commands::Inspect { file } = &cli.command {
        return handle_inspect(file);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let store = connect(&config)?;

    match command {
        Commands::List { bucket, json } => {
            refresh_or_explain(&store, &config).await?;
            let snapshot = store.snapshot();
            if json {
                let tasks: Vec<&DownloadTask> = snapshot.bucket(bucket).collect();
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print_tasks(&snapshot, bucket);
            }
        }
        Commands::Watch { bucket } => watch(store, &config, bucket).await?,
        Commands::Add {
            uris,
            dir,
            out,
            split,
        } => {
            let options = AddOptions {
                dir,
                out,
                split,
                ..AddOptions::default()
            };
            let gid = store.add_uri(&uris, &options).await?;
            println!("{} Added {}", "[✓]".bright_green(), gid.bright_white());
        }
        Commands::Open { target, dir, yes } => match Activation::parse(&target)? {
            Activation::Uri(uri) => {
                let options = AddOptions {
                    dir,
                    ..AddOptions::default()
                };
                let gid = store.add_uri(&[uri], &options).await?;
                println!("{} Added {}", "[✓]".bright_green(), gid.bright_white());
            }
            Activation::TorrentFile(path) => {
                add_torrent_interactive(&store, &config, path, Vec::new(), dir, yes).await?
            }
        },
        Commands::Torrent {
            file,
            select,
            dir,
            yes,
        } => add_torrent_interactive(&store, &config, file, select, dir, yes).await?,
        Commands::Pause { gids } => print_outcome("Paused", &store.pause(&gids).await)?,
        Commands::Resume { gids } => print_outcome("Resumed", &store.resume(&gids).await)?,
        Commands::Stop { gids } => print_outcome("Stopped", &store.stop(&gids).await)?,
        Commands::Remove { gids } => {
            // Refresh first so already-finished tasks get their result purged
            // instead of an aria2.remove the engine would refuse.
            let _ = store.refresh().await;
            print_outcome("Removed", &store.remove(&gids).await)?
        }
        Commands::Version => {
            let version = store.engine().get_version().await?;
            println!("applesword {}", VERSION);
            println!("aria2 {} ({})", version.version, config.rpc_url);
            if !version.enabled_features.is_empty() {
                println!("  {}", version.enabled_features.join(", ").bright_black());
            }
        }
        Commands::Config { .. } | Commands::Inspect { .. } => {}
    }

    Ok(())
}

fn connect(config: &Config) -> Result<Arc<TaskStore>> {
    let client = RpcClient::from_config(config)?;
    let engine = Engine::new(Arc::new(client)).with_page_size(config.page_size);
    Ok(Arc::new(TaskStore::new(
        engine,
        StoreOptions::from_config(config),
    )))
}

async fn refresh_or_explain(store: &TaskStore, config: &Config) -> Result<()> {
    if let Err(err) = store.refresh().await {
        eprint!("{}", engine_unreachable(&config.rpc_url, &err));
        bail!(err);
    }
    Ok(())
}

async fn watch(store: Arc<TaskStore>, config: &Config, bucket: Bucket) -> Result<()> {
    let poller = Poller::spawn(Arc::clone(&store), config.poll_interval());
    let mut snapshots = store.subscribe();
    let mut reported = false;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print!("\x1B[2J\x1B[H");
                print_tasks(&snapshot, bucket);
                reported = false;
            }
            _ = tokio::time::sleep(config.poll_interval()) => {
                let health = store.health();
                if health.is_degraded() && !reported {
                    if let Some(err) = &health.last_error {
                        eprint!("{}", engine_unreachable(&config.rpc_url, err));
                    }
                    reported = true;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    poller.shutdown().await
}

async fn add_torrent_interactive(
    store: &TaskStore,
    config: &Config,
    path: PathBuf,
    select: Vec<String>,
    dir: Option<String>,
    yes: bool,
) -> Result<()> {
    let payload = std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;

    let mut flow = SelectionFlow::new();
    let pending = flow.begin(payload, dir.or_else(|| config.download_dir.clone()))?;

    let select: Vec<String> = select
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !select.is_empty() {
        pending.select_none();
        for index in &select {
            pending.select(index)?;
        }
    }

    let metadata = pending.metadata();
    println!();
    println!("{} {}", "Torrent:".bold(), metadata.name.bright_white());
    println!("  Info hash: {}", metadata.info_hash.bright_black());
    println!(
        "  Save to:   {}",
        pending.dir().unwrap_or("(engine default)")
    );
    println!();
    for file in &metadata.files {
        let mark = if pending.is_selected(&file.index) {
            "[x]".bright_green()
        } else {
            "[ ]".bright_black()
        };
        println!(
            "  {} {:>3}  {:>10}  {}",
            mark,
            file.index,
            format_bytes(file.length),
            file.path
        );
    }
    println!();
    println!(
        "  {} of {} files, {}",
        pending.selected().len(),
        metadata.files.len(),
        format_bytes(pending.selected_length())
    );

    if !yes && !confirm("Add this torrent?")? {
        flow.cancel();
        println!("{} Cancelled", "[i]".bright_blue());
        return Ok(());
    }

    let gid = flow.commit(store).await?;
    println!("{} Added {}", "[✓]".bright_green(), gid.bright_white());
    Ok(())
}

fn handle_inspect(file: &Path) -> Result<()> {
    let payload = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let metadata = applesword::resolve_torrent(&payload)?;

    println!();
    println!("{} {}", "Name:".bold(), metadata.name);
    println!("{} {}", "Info hash:".bold(), metadata.info_hash);
    println!("{} {}", "Size:".bold(), format_bytes(metadata.total_length));
    if metadata.private {
        println!("{} yes", "Private:".bold());
    }
    if let Some(comment) = &metadata.comment {
        println!("{} {}", "Comment:".bold(), comment);
    }
    if !metadata.announce_list.is_empty() {
        println!("{}", "Trackers:".bold());
        for tier in &metadata.announce_list {
            println!("  {}", tier.join(" "));
        }
    }
    println!("{}", "Files:".bold());
    for file in &metadata.files {
        println!("  {:>3}  {:>10}  {}", file.index, format_bytes(file.length), file.path);
    }
    println!();
    Ok(())
}

fn handle_config(command: Option<ConfigCommands>, config: Config) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", "=== AppleSword Configuration ===".bright_cyan().bold());
            println!();
            println!("  RPC URL:            {}", config.rpc_url);
            let secret = if config.rpc_secret.is_some() {
                "(set)".to_string()
            } else {
                "(not set)".bright_black().to_string()
            };
            println!("  RPC secret:         {}", secret);
            println!("  RPC timeout:        {}s", config.rpc_timeout().as_secs());
            println!("  Poll interval:      {}ms", config.poll_interval().as_millis());
            println!("  Removal hide time:  {}s", config.removal_suppression_secs);
            println!("  Failure threshold:  {}", config.failure_threshold);
            println!("  Page size:          {}", config.page_size);
            println!(
                "  Download dir:       {}",
                config.download_dir.as_deref().unwrap_or("(engine default)")
            );
            println!();
            println!("Config file: {}", config::config_path()?.display());
            println!();
        }
        Some(ConfigCommands::Path) => println!("{}", config::config_path()?.display()),
        Some(ConfigCommands::Set { key, value }) => {
            // Start from the stored file so command line overrides are not persisted.
            let mut stored = config::load_config()?;
            stored.set(&key, &value)?;
            config::save_config(&stored)?;
            println!("{} {} updated", "[✓]".bright_green(), key);
        }
    }
    Ok(())
}

fn print_outcome(verb: &str, outcome: &BatchOutcome) -> Result<()> {
    for gid in outcome.succeeded() {
        println!("{} {} {}", "[✓]".bright_green(), verb, gid);
    }
    let failed = outcome.failed();
    for (gid, err) in &failed {
        eprintln!("{} {}: {}", "[✗]".bright_red(), gid, err);
    }
    if !failed.is_empty() {
        let builder = failed.iter().fold(
            ErrorBuilder::new(format!("{} of {} tasks failed", failed.len(), outcome.len())),
            |b, (gid, err)| b.cause(format!("{}: {}", gid, err)),
        );
        bail!(builder.fix("Check the gids with: applesword list").build());
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [Y/n] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer.is_empty() || answer == "y" || answer == "yes")
}

// Table output ---------------------------------------------------------------

const COL_GID: usize = 16;
const COL_STATUS: usize = 8;
const COL_PROGRESS: usize = 6;
const COL_SIZE: usize = 10;
const COL_SPEED: usize = 12;
const COL_NAME: usize = 48;

fn print_tasks(snapshot: &Snapshot, bucket: Bucket) {
    let tasks: Vec<&DownloadTask> = snapshot.bucket(bucket).collect();
    println!();
    println!(
        "{}",
        format!(
            "{} {} {} {} {} {}",
            pad("GID", COL_GID),
            pad("STATUS", COL_STATUS),
            pad_left("DONE", COL_PROGRESS),
            pad_left("SIZE", COL_SIZE),
            pad_left("SPEED", COL_SPEED),
            "NAME"
        )
        .bold()
    );

    for task in &tasks {
        let status = pad(task.status.as_str(), COL_STATUS);
        let speed = if task.status == TaskStatus::Active {
            format!("{}/s", format_bytes(task.download_speed))
        } else {
            String::new()
        };
        println!(
            "{} {} {} {} {} {}",
            pad(&task.gid, COL_GID).bright_black(),
            color_status(task.status, status),
            pad_left(&format!("{:.1}%", task.progress() * 100.0), COL_PROGRESS),
            pad_left(&format_bytes(task.total_length), COL_SIZE),
            pad_left(&speed, COL_SPEED),
            truncate(&task.display_name(), COL_NAME)
        );
        if let Some(message) = &task.error_message {
            println!("{}  {}", " ".repeat(COL_GID), message.red());
        }
    }

    println!();
    println!(
        "{} tasks, {} shown, {}/s down",
        snapshot.len(),
        tasks.len(),
        format_bytes(snapshot.total_download_speed())
    );
}

fn color_status(status: TaskStatus, padded: String) -> ColoredString {
    match status {
        TaskStatus::Active => padded.bright_green(),
        TaskStatus::Waiting => padded.bright_yellow(),
        TaskStatus::Paused => padded.bright_blue(),
        TaskStatus::Complete => padded.green(),
        TaskStatus::Error => padded.bright_red(),
        TaskStatus::Removed => padded.bright_black(),
    }
}

/// Truncate to a display width, marking the cut with an ellipsis.
fn truncate(s: &str, width: usize) -> String {
    if s.width() <= width {
        return s.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in s.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

// Padding happens before coloring: escape codes would count towards width.
fn pad(s: &str, width: usize) -> String {
    let s = truncate(s, width);
    let fill = width.saturating_sub(s.width());
    format!("{}{}", s, " ".repeat(fill))
}

fn pad_left(s: &str, width: usize) -> String {
    let s = truncate(s, width);
    let fill = width.saturating_sub(s.width());
    format!("{}{}", " ".repeat(fill), s)
}
