use clap::Parser;
use hue_presence::ble::{BleTransport, link_event_channel};
use hue_presence::config::{Config, load_dotenv};
use hue_presence::presence::{MmWaveRadar, SharedPresence, shared_presence};
use hue_presence::simulation::{
    SimulatedBulb, SimulatedPresence, SimulatedTransport, run_presence_simulation,
};
use hue_presence::{Controller, ControllerContext};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the simulated sensor flips presence when no radar is attached.
const SIMULATED_PRESENCE_PERIOD: Duration = Duration::from_secs(20);

#[derive(Parser, Debug)]
#[command(name = "hue-presence")]
#[command(about = "Switch BLE bulbs following an mmWave presence sensor")]
struct Cli {
    /// JSON config file
    #[arg(short, long, env = "HUE_PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device of the radar; the sensor is simulated when omitted
    #[arg(short, long, env = "RADAR_SERIAL_PORT")]
    serial_port: Option<String>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn load_config(cli: &Cli) -> hue_presence::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?.with_env_overrides()?,
        None => Config::load()?,
    };
    if let Some(port) = &cli.serial_port {
        config.sensor.serial_port = Some(port.clone());
    }
    config.validate()?;
    Ok(config)
}

/// The serial line is opened as a plain file, so the port must already be
/// configured for the radar (115200 baud, 8N1, raw), e.g. with
/// `stty -F <port> 115200 cs8 -cstopb -parenb raw`.
async fn open_presence(config: &Config) -> hue_presence::Result<(SharedPresence, Option<JoinHandle<()>>)> {
    match &config.sensor.serial_port {
        Some(port) => {
            let serial = OpenOptions::new().read(true).write(true).open(port).await?;
            info!("[Radar] Using sensor on {}", port);
            let radar = MmWaveRadar::new(serial, config.sensor.radar_settings());
            Ok((shared_presence(radar), None))
        }
        None => {
            info!("[Radar] No serial port configured, simulating presence");
            let presence = SimulatedPresence::new();
            let task = run_presence_simulation(presence.clone(), SIMULATED_PRESENCE_PERIOD);
            Ok((shared_presence(presence), Some(task)))
        }
    }
}

fn main() {
    load_dotenv();
    init_logger();
    info!("Starting Hue presence controller");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run());
}

async fn run() {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded:");
    for address in &config.targets {
        info!("  Bulb: {}", address);
    }
    info!(
        "  Pause on external control: {}",
        config.policy.pause_on_external_control
    );

    let (presence, simulation) = match open_presence(&config).await {
        Ok(opened) => opened,
        Err(e) => {
            error!("[Radar] Failed to open sensor: {}", e);
            std::process::exit(1);
        }
    };

    // No BLE stack binding yet, bulbs are simulated
    let (events_tx, events_rx) = link_event_channel();
    let simulated = SimulatedTransport::new(events_tx);
    for address in &config.targets {
        simulated.add_bulb(SimulatedBulb::new(*address));
    }
    let transport: Arc<dyn BleTransport> = Arc::new(simulated);

    let ctx = ControllerContext::new(config, transport, presence);
    let mut controller = Controller::new(ctx, events_rx);
    if let Err(e) = controller.initialize().await {
        error!("[Presence] Failed to configure sensor: {}", e);
        std::process::exit(1);
    }

    let shutdown = CancellationToken::new();
    let control_task = tokio::spawn(controller.run(shutdown.clone()));
    info!("Hue presence controller is running, press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    shutdown.cancel();
    if let Some(task) = simulation {
        task.abort();
    }
    if let Err(e) = control_task.await {
        error!("Control loop panicked: {}", e);
    }
    info!("Shutdown complete");
}
