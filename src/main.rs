//! Garage Gas Bridge CLI
//!
//! Gas sensor gateway with peer-relative anomaly detection.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use garage_gas_bridge::{
    bridge::{Bridge, BridgeIo},
    config::{Config, DatasetConfig},
    core::ControlCommand,
    dataset,
    messaging::{publish_once, MessageSink, MqttLink},
    sensor::{list_ports, SerialSensorLink, FRAME_QUEUE_CAPACITY},
    shutdown::shutdown_channel,
    stats::{create_shared_stats_with_persistence, BridgeStats},
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gas-bridge")]
#[command(version = VERSION)]
#[command(about = "Gas sensor gateway with peer-relative anomaly detection", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Start {
        /// Serial port of the sensor board
        #[arg(long)]
        port: Option<String>,

        /// Serial baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// MQTT broker host
        #[arg(long)]
        broker: Option<String>,

        /// MQTT broker port
        #[arg(long)]
        mqtt_port: Option<u16>,

        /// Garage identifier used in topic names
        #[arg(long)]
        garage: Option<String>,

        /// Anomaly factor applied to the peer mean
        #[arg(long)]
        factor: Option<f64>,

        /// Cooldown between automatic fan transitions, in seconds
        #[arg(long)]
        cooldown: Option<u64>,

        /// Replay peer readings from a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Publish one operator command to this garage's command topic
    Send {
        /// FAN_ON, FAN_OFF or FAN_AUTO
        command: ControlCommand,
    },

    /// List available serial ports
    Ports,

    /// Show statistics from previous runs
    Status,

    /// Show configuration
    Config,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::config_path);

    match cli.command {
        Commands::Start {
            port,
            baud,
            broker,
            mqtt_port,
            garage,
            factor,
            cooldown,
            csv,
        } => {
            let mut config = load_config(&config_path)?;
            apply_overrides(
                &mut config,
                port,
                baud,
                broker,
                mqtt_port,
                garage,
                factor,
                cooldown,
                csv,
            );
            cmd_start(config).await
        }
        Commands::Send { command } => cmd_send(&load_config(&config_path)?, command).await,
        Commands::Ports => cmd_ports(),
        Commands::Status => cmd_status(&load_config(&config_path)?),
        Commands::Config => cmd_config(&config_path),
        Commands::Init { force } => cmd_init(&config_path, force),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_from(path).with_context(|| format!("failed to load config from {path:?}"))
}

#[allow(clippy::too_many_arguments)]
fn apply_overrides(
    config: &mut Config,
    port: Option<String>,
    baud: Option<u32>,
    broker: Option<String>,
    mqtt_port: Option<u16>,
    garage: Option<String>,
    factor: Option<f64>,
    cooldown: Option<u64>,
    csv: Option<PathBuf>,
) {
    if let Some(port) = port {
        config.serial.port = port;
    }
    if let Some(baud) = baud {
        config.serial.baud_rate = baud;
    }
    if let Some(host) = broker {
        config.mqtt.host = host;
    }
    if let Some(mqtt_port) = mqtt_port {
        config.mqtt.port = mqtt_port;
    }
    if let Some(garage) = garage {
        config.garage_id = garage;
    }
    if let Some(factor) = factor {
        config.detection.factor = factor;
    }
    if let Some(secs) = cooldown {
        config.cooldown = std::time::Duration::from_secs(secs);
    }
    if let Some(path) = csv {
        config.dataset = DatasetConfig::Csv { path };
    }
}

async fn cmd_start(config: Config) -> Result<()> {
    config.validate()?;

    println!("Garage Gas Bridge v{VERSION}");
    println!();

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let topics = config.topics();

    println!("  Garage: {}", config.garage_id);
    println!(
        "  Serial: {} @ {} baud",
        config.serial.port, config.serial.baud_rate
    );
    println!("  Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    println!(
        "  Detection: factor {} ({:?}), cooldown {}s",
        config.detection.factor,
        config.detection.rule,
        config.cooldown.as_secs()
    );
    println!("  Telemetry topic: {}", topics.telemetry);
    println!("  Command topic: {}", topics.commands);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let peers = dataset::from_config(&config.dataset).context("failed to load peer dataset")?;

    let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
    let (serial, actuator) = SerialSensorLink::open(&config.serial, frames_tx)?;

    let (commands_tx, commands_rx) = mpsc::channel(config.command_queue_capacity);
    let link = MqttLink::new(&config.mqtt, topics.commands.clone());
    let sink: Arc<dyn MessageSink> = Arc::new(link.sink());

    // The link outlives the bridge so queued messages still reach the broker.
    let (link_trigger, link_signal) = shutdown_channel();
    let link_task = tokio::spawn(link.run(commands_tx, stats.clone(), link_signal));

    let (trigger, _) = shutdown_channel();
    let ctrlc_trigger = trigger.clone();
    ctrlc::set_handler(move || ctrlc_trigger.trigger())
        .context("failed to install Ctrl+C handler")?;

    let bridge = Bridge::new(&config, stats.clone())?;
    let io = BridgeIo {
        frames: frames_rx,
        commands: commands_rx,
        dataset: peers,
        actuator: Arc::new(actuator),
        sink,
    };
    let snapshot = bridge.run(io, trigger).await;

    println!();
    println!("Stopping bridge...");

    link_trigger.trigger();
    if let Err(e) = link_task.await {
        eprintln!("Warning: MQTT link task failed: {e}");
    }
    // Joining the reader thread blocks until its current read times out.
    if tokio::task::spawn_blocking(move || drop(serial)).await.is_err() {
        eprintln!("Warning: Serial reader did not stop cleanly");
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save bridge stats: {e}");
    }

    println!();
    println!("{}", snapshot.summary());
    Ok(())
}

async fn cmd_send(config: &Config, command: ControlCommand) -> Result<()> {
    config.validate()?;
    let topic = config.topics().commands;

    publish_once(
        &config.mqtt,
        &topic,
        command.as_str().as_bytes().to_vec(),
        config.publish.timeout.max(std::time::Duration::from_secs(5)),
    )
    .await
    .with_context(|| format!("failed to publish {command} to {topic}"))?;

    println!("Sent {command} to {topic}");
    Ok(())
}

fn cmd_ports() -> Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }

    println!("Available serial ports:");
    for port in ports {
        println!("  {port}");
    }
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Garage Gas Bridge Status");
    println!("========================");
    println!();
    println!("Garage: {}", config.garage_id);
    println!("Stats file: {:?}", config.stats_path());
    println!();

    match BridgeStats::read_persisted(&config.stats_path())? {
        Some(snapshot) => println!("{}", snapshot.summary()),
        None => println!("No statistics recorded yet. Run `gas-bridge start` first."),
    }
    Ok(())
}

fn cmd_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);

    if let Err(e) = config.validate() {
        println!();
        println!("Warning: {e}");
    }
    Ok(())
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{path:?} already exists (use --force to overwrite)");
    }

    Config::default().save_to(path)?;
    println!("Wrote default configuration to {path:?}");
    Ok(())
}
