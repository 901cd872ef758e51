// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! tracehound command line.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Method;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use tracehound::api::types::{parse_tag, ResourceId, ResourceKind, SpecInfo};
use tracehound::api::{
    DirectoryApi, DirectoryClient, FailureReporter, SessionApi, SessionClient, Transport,
};
use tracehound::collector::CollectorEvent;
use tracehound::config::{self, CliOptions, ResolvedConfig};
use tracehound::daemon::{Daemon, LoggingHandler};
use tracehound::error::TransportError;
use tracehound::resolve::{IdResolver, SystemClock};
use tracehound::sync::{Synchronizer, UploadRequest};
use tracehound::telemetry::{init_telemetry, TelemetryConfig};
use tracehound::VERSION;

/// tracehound - sync observed API traffic with your trace backend.
#[derive(Parser)]
#[command(name = "tracehound")]
#[command(author, version, about = "Sync observed API traffic with your trace backend", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Backend domain; the API is reached at api.<domain>
    #[arg(long, global = true)]
    domain: Option<String>,

    /// Full API base URL, overriding --domain
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Permit a plain http:// base URL (local test backends)
    #[arg(long, global = true)]
    allow_insecure_http: bool,

    /// Forward proxy URL
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Accept any server certificate (debugging only)
    #[arg(long, global = true)]
    skip_tls_verify: bool,

    /// Expected name on the server certificate (debugging only)
    #[arg(long, global = true)]
    tls_server_name: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the services visible to your credentials
    Services {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Upload captured events into a trace
    Upload(UploadArgs),

    /// Print the identifier behind a service or trace name
    Resolve {
        service: String,
        trace: Option<String>,
    },

    /// Show a spec by name or version label
    Spec {
        service: String,
        /// Spec name or version label
        spec: String,
        /// Print the spec content
        #[arg(long)]
        content: bool,
    },

    /// Compare two specs
    Diff {
        service: String,
        base: String,
        head: String,
    },

    /// Follow the active traces of one or more services until interrupted
    Daemon {
        #[arg(required = true)]
        services: Vec<String>,
    },

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

#[derive(Args)]
struct UploadArgs {
    service: String,

    /// Target trace; a random name is generated when omitted
    #[arg(short, long)]
    trace: Option<String>,

    /// Add to the trace if it already exists
    #[arg(short, long)]
    append: bool,

    /// Tag for a newly created trace, as KEY=VALUE (repeatable)
    #[arg(long = "tag", value_parser = parse_tag)]
    tags: Vec<(String, String)>,

    /// Spec (name or version label) the new trace extends
    #[arg(long)]
    base_spec: Option<String>,

    /// Keep events addressed to known analytics and tracking hosts
    #[arg(long)]
    include_trackers: bool,

    /// Drop events whose host matches this regex (repeatable)
    #[arg(long = "host-exclusion")]
    host_exclusions: Vec<String>,

    /// Drop events whose path matches this regex (repeatable)
    #[arg(long = "path-exclusion")]
    path_exclusions: Vec<String>,

    /// JSON Lines file of captured events, or - for stdin
    #[arg(short, long, default_value = "-")]
    events: PathBuf,

    /// Upload events as they are read instead of loading them first
    #[arg(long)]
    stream: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged configuration (secrets hidden)
    Show,
    /// Write a starter .tracehound.json in the current directory
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = match (&cli.command, cli.verbose) {
        (Commands::Daemon { .. }, 0) => TelemetryConfig::daemon(),
        (_, verbose) => TelemetryConfig::for_verbosity(verbose),
    };
    let _guard = init_telemetry(&telemetry).context("Failed to initialize logging")?;

    FailureReporter::global().register(Arc::new(
        |method: &Method, path: &str, err: &TransportError| {
            warn!(%method, path, error = %err, "API call failed");
        },
    ));

    let cli_options = CliOptions {
        domain: cli.domain.clone(),
        base_url: cli.base_url.clone(),
        allow_insecure_http: cli.allow_insecure_http.then_some(true),
        proxy: cli.proxy.clone(),
        skip_tls_verify: cli.skip_tls_verify.then_some(true),
        tls_server_name: cli.tls_server_name.clone(),
        request_timeout_secs: cli.timeout,
    };

    match cli.command {
        Commands::Version => {
            println!("tracehound {}", VERSION);
            Ok(())
        }
        Commands::Config { action } => handle_config(action, cli_options),
        command => {
            let config = load_config(cli_options)?;
            let transport = Transport::shared(config.transport_config())
                .context("Failed to set up the API client")?;
            handle_command(command, &config, transport, cli.verbose).await
        }
    }
}

fn workspace_root() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(config::find_workspace_root(&cwd).unwrap_or(cwd))
}

fn load_config(cli_options: CliOptions) -> anyhow::Result<ResolvedConfig> {
    let root = workspace_root()?;
    config::load_config(&root, cli_options).context("Failed to load configuration")
}

fn handle_config(action: Option<ConfigAction>, cli_options: CliOptions) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let config = load_config(cli_options)?;
            println!("{}", serde_json::to_string_pretty(&config.to_display_json())?);
        }
        Some(ConfigAction::Init) => {
            let path = config::init_config(&std::env::current_dir()?)?;
            println!("{} Created {}", "✓".green(), path.display());
        }
    }
    Ok(())
}

async fn handle_command(
    command: Commands,
    config: &ResolvedConfig,
    transport: Arc<Transport>,
    verbose: u8,
) -> anyhow::Result<()> {
    let directory: Arc<dyn DirectoryApi> = Arc::new(DirectoryClient::new(transport.clone()));
    let resolver = Arc::new(IdResolver::with_config(
        directory.clone(),
        config.cache_fresh,
        config.cache_hard,
        Arc::new(SystemClock),
    ));

    match command {
        Commands::Services { json } => {
            let services = directory.list_services().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&services)?);
            } else if services.is_empty() {
                println!("{}", "No services found".yellow());
            } else {
                for service in services {
                    println!("{}  {}", service.id.to_string().dimmed(), service.name.bold());
                }
            }
        }
        Commands::Upload(args) => {
            upload(args, config, transport, resolver, verbose).await?;
        }
        Commands::Resolve { service, trace } => {
            let service_id = resolver.service_id(&service).await?;
            println!("{}  {}", service.bold(), service_id);
            if let Some(trace) = trace {
                let sessions = SessionClient::new(transport, service_id);
                let trace_id = resolver.trace_id(&sessions, &trace).await?;
                println!("{}  {}", trace.bold(), trace_id);
            }
        }
        Commands::Spec {
            service,
            spec,
            content,
        } => {
            let sessions = SessionClient::new(transport, resolver.service_id(&service).await?);
            let info = lookup_spec(&sessions, &spec).await?;
            print_spec(&info, content);
        }
        Commands::Diff {
            service,
            base,
            head,
        } => {
            let sessions = SessionClient::new(transport, resolver.service_id(&service).await?);
            let base = lookup_spec(&sessions, &base).await?;
            let head = lookup_spec(&sessions, &head).await?;
            let diff = sessions.get_spec_diff(base.id, head.id).await?;
            for change in &diff.added {
                println!("{} {} {}", "+".green(), change.method, change.path);
            }
            for change in &diff.removed {
                println!("{} {} {}", "-".red(), change.method, change.path);
            }
            for change in &diff.modified {
                println!("{} {} {} ({})", "~".yellow(), change.method, change.path, change.change);
            }
            if diff.added.is_empty() && diff.removed.is_empty() && diff.modified.is_empty() {
                println!("{}", "No differences".dimmed());
            }
        }
        Commands::Daemon { services } => {
            run_daemons(services, config, directory, &resolver).await?;
        }
        Commands::Config { .. } | Commands::Version => {}
    }
    Ok(())
}

async fn upload(
    args: UploadArgs,
    config: &ResolvedConfig,
    transport: Arc<Transport>,
    resolver: Arc<IdResolver>,
    verbose: u8,
) -> anyhow::Result<()> {
    let mut request = UploadRequest::new(&args.service).append(args.append);
    request.trace = args.trace;
    request.tags = config.default_tags.clone();
    for (key, value) in args.tags {
        request.tags.insert(key, value);
    }
    request.include_trackers = args.include_trackers || config.include_trackers;
    request.host_exclusions = config.host_exclusions.clone();
    request.host_exclusions.extend(args.host_exclusions);
    request.path_exclusions = config.path_exclusions.clone();
    request.path_exclusions.extend(args.path_exclusions);

    if let Some(spec) = &args.base_spec {
        let service_id = resolver.service_id(&args.service).await?;
        let sessions = SessionClient::new(transport.clone(), service_id);
        request.base_spec = Some(lookup_spec(&sessions, spec).await?.id);
    }

    let sync = Synchronizer::connect(transport, Some(resolver)).with_batch_policy(config.batch);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let summary = if args.stream {
        spinner.set_message("Waiting for events");
        let (events, reader) = stream_events(args.events.clone());
        let result = sync
            .upload_stream_with_progress(request, events, |fed| {
                spinner.set_message(format!("Uploading events {}", fed));
            })
            .await;
        spinner.finish_and_clear();
        let summary = result?;
        let read = reader.await.context("Event reader stopped unexpectedly")?;
        read.with_context(|| {
            format!(
                "Stopped after {} events were uploaded to trace {}",
                summary.submitted, summary.trace_name
            )
        })?;
        summary
    } else {
        let events = read_events(&args.events)?;
        let total = events.len();
        spinner.set_message(format!("Uploading {} events", total));
        let result = sync
            .upload_with_progress(request, events, |fed| {
                spinner.set_message(format!("Uploading events {}/{}", fed, total));
            })
            .await;
        spinner.finish_and_clear();
        result?
    };

    let verb = if summary.created { "Created" } else { "Appended to" };
    println!(
        "{} {} trace {} ({})",
        "✓".green(),
        verb,
        summary.trace_name.bold(),
        summary.trace_id.to_string().dimmed()
    );
    let totals = summary.counts.total();
    println!(
        "  {} events read, {} uploaded in {} batches, {} filtered",
        totals.input,
        summary.submitted.to_string().green(),
        summary.batches,
        totals.filtered.to_string().yellow()
    );
    if verbose > 0 {
        for (direction, kind, bucket) in summary.counts.iter() {
            println!(
                "  {:>8} {:<13} in={} forwarded={} filtered={}",
                direction.as_str(),
                kind.as_str(),
                bucket.input,
                bucket.forwarded,
                bucket.filtered
            );
        }
        #[cfg(feature = "telemetry")]
        eprintln!(
            "{}",
            tracehound::telemetry::GLOBAL_METRICS.snapshot().format_report()
        );
    }
    Ok(())
}

fn open_events(path: &Path) -> anyhow::Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open events file {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Parse the JSON Lines in `reader`, calling `each` per event. Stops early
/// when `each` returns `false`.
fn parse_events(
    path: &Path,
    reader: Box<dyn BufRead>,
    mut each: impl FnMut(CollectorEvent) -> bool,
) -> anyhow::Result<usize> {
    let mut parsed = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid event", path.display(), index + 1))?;
        parsed += 1;
        if !each(event) {
            break;
        }
    }
    Ok(parsed)
}

/// Read JSON Lines events from `path`, or stdin for `-`.
fn read_events(path: &Path) -> anyhow::Result<Vec<CollectorEvent>> {
    let mut events = Vec::new();
    parse_events(path, open_events(path)?, |event| {
        events.push(event);
        true
    })?;
    Ok(events)
}

/// Read events on a separate thread, handing each over as soon as it is
/// parsed. The thread is detached so a failed upload never waits on stdin.
fn stream_events(
    path: PathBuf,
) -> (mpsc::Receiver<CollectorEvent>, oneshot::Receiver<anyhow::Result<usize>>) {
    let (tx, rx) = mpsc::channel(1024);
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::spawn(move || {
        let result = open_events(&path)
            .and_then(|reader| parse_events(&path, reader, |event| tx.blocking_send(event).is_ok()));
        let _ = done_tx.send(result);
    });
    (rx, done_rx)
}

/// Find a spec by name, falling back to a version label.
async fn lookup_spec(sessions: &dyn SessionApi, name: &str) -> anyhow::Result<SpecInfo> {
    match sessions
        .resolve_name(ResourceKind::Spec, name.to_string())
        .await?
    {
        Some(ResourceId::Spec(id)) => Ok(sessions.get_spec(id).await?),
        Some(ResourceId::Trace(id)) => bail!("{:?} names trace {}, not a spec", name, id),
        None => sessions
            .get_spec_by_version(name.to_string())
            .await
            .with_context(|| format!("No spec or version label named {:?}", name)),
    }
}

fn print_spec(spec: &SpecInfo, content: bool) {
    println!("{}  {}", spec.name.bold(), spec.id.to_string().dimmed());
    println!("  state: {:?}", spec.state);
    if !spec.version_labels.is_empty() {
        println!("  versions: {}", spec.version_labels.join(", "));
    }
    for (key, value) in spec.tags.iter() {
        println!("  {}={}", key.cyan(), value);
    }
    if content {
        println!();
        println!("{}", spec.content);
    }
}

async fn run_daemons(
    services: Vec<String>,
    config: &ResolvedConfig,
    directory: Arc<dyn DirectoryApi>,
    resolver: &IdResolver,
) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handler = Arc::new(LoggingHandler);

    let mut tasks = Vec::new();
    for name in services {
        let daemon = Daemon::for_service(
            directory.clone(),
            resolver,
            &name,
            handler.clone(),
            config.daemon,
        )
        .await?;
        let rx = shutdown_rx.clone();
        tasks.push((name, tokio::spawn(async move { daemon.run(rx).await })));
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupted; shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C; shutting down"),
    }
    let _ = shutdown_tx.send(true);

    let mut failed = false;
    for (name, task) in tasks {
        match task.await {
            Ok(Ok(report)) => println!(
                "{} {}: {} activations, {} deactivations, {} poll errors",
                "✓".green(),
                name.bold(),
                report.activations,
                report.deactivations,
                report.poll_errors
            ),
            Ok(Err(e)) => {
                eprintln!("{} {}: {}", "✗".red(), name.bold(), e);
                failed = true;
            }
            Err(e) => {
                eprintln!("{} {}: task failed: {}", "✗".red(), name.bold(), e);
                failed = true;
            }
        }
    }
    if failed {
        bail!("One or more daemons failed");
    }
    Ok(())
}
