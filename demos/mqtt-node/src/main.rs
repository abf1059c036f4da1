use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use gvcomm::comm::{GvComm, PollStatus};
use gvcomm::device::DeviceInfo;
use gvcomm::error::Error;
use gvcomm::protocol::DeviceStatus;
use gvcomm::transport::Transport;

use gvcomm_transports::Credentials;
use gvcomm_transports::mqtt::{MqttConfig, MqttTransport};

use tracing::{info, warn};

// Pause of the loop when no inbound message is available.
const IDLE_PAUSE: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Device identifier, also used as `MQTT` client identifier.
    #[arg(long, default_value = "gvcomm-node")]
    id: String,

    /// Device name.
    #[arg(long, default_value = "GVComm node")]
    name: String,

    /// Address announced to the network.
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Port announced to the network.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Broker address.
    #[arg(long, default_value = "localhost")]
    broker: String,

    /// Broker port.
    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    /// Broker username.
    #[arg(long)]
    username: Option<String>,

    /// Broker password.
    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Milliseconds between two temperature readings.
    #[arg(long, default_value_t = 1000)]
    interval: u64,

    /// Seconds of activity before the node shuts down.
    #[arg(long, default_value_t = 60)]
    duration: u64,
}

fn run<T: Transport>(
    comm: &mut GvComm<T>,
    interval: Duration,
    duration: Duration,
) -> Result<(), Error> {
    let led = Arc::new(AtomicBool::new(false));
    let led_state = Arc::clone(&led);

    comm.on_device_message(|payload| {
        info!("Device command: {}", String::from_utf8_lossy(payload));
    });

    comm.add_device()?;
    comm.send_status(&DeviceStatus::Online)?;
    comm.add_sensor("temperature", "Temperature", "temperature")?;
    comm.add_actuator("led", "Led", "switch", move |payload| {
        let on = matches!(payload, b"on" | b"1" | b"true");
        led_state.store(on, Ordering::Relaxed);
        info!("Led switched {}", if on { "on" } else { "off" });
    })?;

    let deadline = Instant::now() + duration;
    let mut next_reading = Instant::now();
    let mut step = 0_u32;

    while Instant::now() < deadline {
        if Instant::now() >= next_reading {
            // A slow sawtooth between 20 and 25 degrees.
            let temperature = 20.0 + f64::from(step % 10) * 0.5;
            step = step.wrapping_add(1);

            if let Err(e) = comm.send_sensor_data("temperature", &temperature) {
                warn!("Reading not sent: {e}");
            }
            next_reading += interval;
        }

        if comm.poll()? == PollStatus::Empty {
            thread::sleep(IDLE_PAUSE);
        }
    }

    info!(
        "Led left {}",
        if led.load(Ordering::Relaxed) { "on" } else { "off" }
    );

    comm.send_status(&DeviceStatus::Offline)
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let device = DeviceInfo::new(cli.id, cli.name, cli.address, cli.port)?;

    let mut config = MqttConfig::new(cli.broker, cli.broker_port);
    if let Some(username) = cli.username {
        config = config.credentials(Credentials::new(
            username,
            cli.password.unwrap_or_default(),
        ));
    }

    let transport = MqttTransport::new(&device, config)?;
    let mut comm = GvComm::with_transport(device, transport);

    comm.connect()?;
    info!("Node `{}` online", comm.device_info());

    let result = run(
        &mut comm,
        Duration::from_millis(cli.interval),
        Duration::from_secs(cli.duration),
    );

    comm.shutdown();

    result
}
