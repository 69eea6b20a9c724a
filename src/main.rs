use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use voxbridge::bus::capability::parse_mask;
use voxbridge::bus::{Capabilities, HostBridge, HostEvent, HostEventBus};
use voxbridge::codec::CodecRegistry;
use voxbridge::config::{Config, TransportConfig};
use voxbridge::echo::{self, EchoRequest};
use voxbridge::lifecycle::{Command, ConnectionDriver, Phase, SessionHandshake};
use voxbridge::transport::{CallOptions, Endpoint, SocketConnector, StreamTransport};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxbridge")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("voxbridge.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        if let Some(level) = level {
            builder.parse_filters(level);
        }
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn transport_config(config: &Config, endpoint: Option<&str>) -> TransportConfig {
    let mut transport = config.transport.clone();
    if let Some(endpoint) = endpoint {
        transport.endpoint = endpoint.to_string();
    }
    transport
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Caps { mask } => handle_caps_command(mask.as_deref(), config),
        Commands::Serve { endpoint } => handle_serve_command(endpoint.as_deref(), config).await,
        Commands::Call {
            endpoint,
            text,
            count,
            interval_ms,
            timeout_ms,
        } => {
            let mut request = EchoRequest::new(text.clone(), *count);
            request.interval_ms = *interval_ms;
            handle_call_command(endpoint.as_deref(), request, *timeout_ms, config).await
        }
        Commands::Listen { keys } => handle_listen_command(keys, config).await,
        Commands::Connect { endpoint } => handle_connect_command(endpoint.as_deref(), config).await,
    }
}

fn handle_caps_command(mask: Option<&str>, config: &Config) -> Result<()> {
    let caps = match mask {
        Some(raw) => Capabilities::from_mask(parse_mask(raw).ok_or_else(|| eyre!("Invalid mask: {}", raw))?),
        None => config.bus.resolve_capabilities(),
    };
    info!("Capabilities: {:?}", caps);

    println!("{} {:#07b}", "Mask:".cyan(), caps.bits());
    for (name, set) in [
        ("host", caps.is_host()),
        ("macos", caps.is_host_macos()),
        ("windows", caps.is_host_windows()),
        ("mobile", caps.is_host_mobile()),
    ] {
        let flag = if set { "yes".green() } else { "no".dimmed() };
        println!("  {:<8} {}", name, flag);
    }
    Ok(())
}

async fn handle_serve_command(endpoint: Option<&str>, config: &Config) -> Result<()> {
    let transport = transport_config(config, endpoint);
    let endpoint = Endpoint::parse(&transport.endpoint).context("Invalid endpoint")?;
    let server = Arc::new(echo::server().with_max_frame_length(transport.max_frame_length));

    println!("{} {} ({})", "Serving:".green(), endpoint, server.methods().join(", "));

    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run(&endpoint).await })
    };
    tokio::signal::ctrl_c().await.context("Failed to wait for ctrl-c")?;
    println!("{}", "Shutting down...".yellow());
    server.shutdown();

    running.await.context("Server task failed")??;
    Ok(())
}

async fn handle_call_command(
    endpoint: Option<&str>,
    request: EchoRequest,
    timeout_ms: Option<u64>,
    config: &Config,
) -> Result<()> {
    let transport = StreamTransport::with_socket(transport_config(config, endpoint), Arc::new(echo::registry()));
    transport.connect().await.context("Failed to connect")?;

    let mut options = CallOptions::default();
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let mut call = transport
        .invoke_streaming(&echo::REPEAT, &request, options)
        .await
        .context("Failed to start call")?;

    let mut failure = None;
    while let Some(item) = call.message().await {
        match item {
            Ok(reply) => println!("{} {}", format!("[{}]", reply.seq).cyan(), reply.text),
            Err(e) => failure = Some(e),
        }
    }

    let trailers = call.trailers().await;
    println!("{} {:?}", "Status:".cyan(), call.status());
    for (key, value) in &trailers {
        println!("  {} = {}", key, value);
    }

    transport.destroy().await;
    match failure {
        Some(e) => Err(e).context("Call failed"),
        None => Ok(()),
    }
}

async fn handle_listen_command(keys: &[String], config: &Config) -> Result<()> {
    let registry = CodecRegistry::new().with::<HostEvent>();
    let bus = Arc::new(HostEventBus::<HostEvent>::new(&registry, config.bus.resolve_capabilities())?);

    for key in keys {
        let token = bus.on(key.clone(), |event: HostEvent| {
            println!("{} {} {}", "Event:".green(), event.key, event.data);
        });
        println!("{} {} -> handle {}", "Listening:".cyan(), token.key(), token.handle());
    }

    let (bridge, mut faults) = HostBridge::new(bus);
    let supervisor = tokio::spawn(async move {
        while let Some(fault) = faults.recv().await {
            eprintln!("{} handle {}: {}", "Fault:".red(), fault.handle, fault.error);
        }
    });

    let stats = bridge.pump(tokio::io::stdin()).await.context("Host pipe failed")?;
    drop(bridge);
    supervisor.await.context("Supervisor task failed")?;

    println!(
        "{} delivered={} dropped={} malformed={} faults={}",
        "Done:".cyan(),
        stats.delivered,
        stats.dropped,
        stats.malformed,
        stats.faults
    );
    Ok(())
}

async fn handle_connect_command(endpoint: Option<&str>, config: &Config) -> Result<()> {
    let connector = SessionHandshake::new(Arc::new(SocketConnector::new()), transport_config(config, endpoint));
    let handle = ConnectionDriver::spawn(connector, &config.lifecycle);
    let mut states = handle.subscribe();

    handle.send(Command::Connect);
    let snapshot = loop {
        states.changed().await.context("Connection driver stopped")?;
        let snapshot = states.borrow_and_update().clone();

        let phase = match snapshot.phase() {
            Phase::Connected => snapshot.phase().as_str().green(),
            Phase::Waiting => snapshot.phase().as_str().yellow(),
            Phase::Disconnected => snapshot.phase().as_str().red(),
            Phase::Connecting => snapshot.phase().as_str().cyan(),
        };
        match &snapshot.state.last_error {
            Some(error) if snapshot.phase() == Phase::Waiting => {
                println!("{} (retry {}): {}", phase, snapshot.state.retry_count, error)
            }
            _ => println!("{}", phase),
        }

        if snapshot.phase() == Phase::Connected || snapshot.phase() == Phase::Disconnected {
            break snapshot;
        }
    };

    let result = match (&snapshot.state.context, snapshot.connected_at) {
        (Some(context), Some(at)) => {
            println!("{} {} at {}", "Connected:".green(), context.endpoint, at.to_rfc3339());
            context.session.close().await;
            Ok(())
        }
        _ => Err(eyre!("Gave up after {} attempts", snapshot.attempts)),
    };

    handle.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
