//! Binary entrypoint for the sms2mqtt bridge.
//!
//! Commands:
//! - `start` (default) - connect to the modem and the broker and bridge messages
//! - `init` - write a starter `config.toml`
//!
//! Every setting can be overridden by environment variables and then by the flags below.
//! See the [`sms2mqtt`] library docs for the modules behind each step.
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use sms2mqtt::bridge::Bridge;
use sms2mqtt::config::{Config, ConfigOverlay};
use sms2mqtt::lifecycle::{self, Shutdown};
use sms2mqtt::modem::ModemHandle;
use sms2mqtt::mqtt;

#[derive(Parser)]
#[command(name = "sms2mqtt")]
#[command(about = "Bridge SMS messages between a GSM modem and an MQTT broker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge (default)
    Start,
    /// Write a default configuration file
    Init,
}

/// Highest-precedence configuration layer
#[derive(Args, Default)]
struct OverrideArgs {
    /// Modem serial device (e.g., /dev/ttyUSB2)
    #[arg(short = 'd', long, global = true)]
    mobile_device: Option<String>,

    /// Modem baud rate
    #[arg(short = 'b', long, global = true)]
    mobile_baudrate: Option<u32>,

    /// SIM PIN code
    #[arg(long, global = true)]
    mobile_pin_code: Option<String>,

    /// MQTT client id
    #[arg(short = 'i', long, global = true)]
    mqtt_client_id: Option<String>,

    /// Topic prefix (may be empty)
    #[arg(short = 'r', long, global = true)]
    mqtt_prefix: Option<String>,

    /// MQTT broker host
    #[arg(short = 'o', long, global = true)]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(short = 'p', long, global = true)]
    mqtt_port: Option<u16>,

    /// MQTT username
    #[arg(short = 'u', long, global = true)]
    mqtt_username: Option<String>,

    /// MQTT password
    #[arg(short = 'x', long, global = true)]
    mqtt_password: Option<String>,

    /// Append log lines to this file
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write log lines to stdout
    #[arg(long, global = true)]
    log_stdout: bool,
}

impl From<&OverrideArgs> for ConfigOverlay {
    fn from(args: &OverrideArgs) -> Self {
        ConfigOverlay {
            mobile_device: args.mobile_device.clone(),
            mobile_baudrate: args.mobile_baudrate,
            mobile_pin_code: args.mobile_pin_code.clone(),
            mqtt_client_id: args.mqtt_client_id.clone(),
            mqtt_prefix: args.mqtt_prefix.clone(),
            mqtt_host: args.mqtt_host.clone(),
            mqtt_port: args.mqtt_port,
            mqtt_username: args.mqtt_username.clone(),
            mqtt_password: args.mqtt_password.clone(),
            log_file: args.log_file.clone(),
            log_level: args.log_level.clone(),
            log_stdout: args.log_stdout.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.as_ref().unwrap_or(&Commands::Start) {
        Commands::Init => {
            init_logging(&Config::default(), cli.verbose);
            info!("Initializing new sms2mqtt configuration");
            Config::create_default(&cli.config)
                .await
                .with_context(|| format!("writing {}", cli.config))?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Start => {
            let env = ConfigOverlay::from_env(|key| std::env::var(key).ok())?;
            let (config, source) =
                Config::resolve(&cli.config, &env, &ConfigOverlay::from(&cli.overrides)).await?;
            init_logging(&config, cli.verbose);
            info!("Starting sms2mqtt v{}", env!("CARGO_PKG_VERSION"));
            source.log();
            run(config).await?;
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    info!(
        "Modem: {} @ {} baud, broker: {}:{}, prefix: {:?}",
        config.modem.device,
        config.modem.baud_rate,
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.prefix
    );

    let (modem, inbound) = ModemHandle::connect(
        &config.modem.device,
        config.modem.baud_rate,
        config.modem.pin_code.as_deref(),
    )
    .await
    .with_context(|| format!("connecting to modem on {}", config.modem.device))?;

    let shutdown = Shutdown::new();
    lifecycle::spawn_signal_listener(shutdown.clone());
    let (publisher, supervisor, outbound) = mqtt::start(&config.mqtt, shutdown.clone());

    let bridge = Bridge::new(&config.mqtt.prefix, &config.reassembly, modem, publisher);
    bridge
        .announce_ready(&config.modem.device, config.modem.baud_rate)
        .await;
    let bridge = bridge
        .run(
            inbound,
            outbound,
            config.reassembly.sweep_interval(),
            shutdown.clone(),
        )
        .await;

    lifecycle::stop(&shutdown, supervisor, bridge.into_modem()).await;
    Ok(())
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity can only raise the configured level
    let base_level = match verbosity {
        0 => config.logging.level_filter(),
        1 => config.logging.level_filter().max(log::LevelFilter::Debug),
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // rumqttc is chatty below warn
    if verbosity < 2 {
        builder.filter_module("rumqttc", log::LevelFilter::Warn);
    }
    let to_console = config.logging.stdout || config.logging.file.is_none();
    if config.logging.stdout {
        builder.target(env_logger::Target::Stdout);
    }

    let file = config.logging.file.as_ref().and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("Cannot open log file {}: {}", path, e);
                None
            }
        }
    });

    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        builder.format(move |fmt, record| {
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());

            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }

            if to_console {
                writeln!(fmt, "{}", line)
            } else {
                // file only: an empty record is not emitted
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
