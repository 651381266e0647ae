use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use xlinkbridge::capture::{adapter_mac, list_adapters};
use xlinkbridge::codec::mac_to_string;
use xlinkbridge::config::DEFAULT_CONFIG_PATH;
use xlinkbridge::{Bridge, CaptureDevice, Config, PcapFileCapture, PnetCapture, XLinkSession};

#[derive(Parser)]
#[command(name = "xlinkbridge")]
#[command(about = "Relay 802.11 ad-hoc traffic through XLink Kai")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Monitor-mode wireless interface to capture on (e.g., wlan0mon)
    #[arg(short, long, conflicts_with = "file")]
    interface: Option<String>,

    /// Replay frames from a pcap file instead of capturing live
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// List network interfaces and exit
    #[arg(short, long)]
    list_interfaces: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_interfaces {
        print_interfaces();
        return Ok(());
    }

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if let Some(interface) = args.interface {
        config.capture_source = interface;
        config.offline = false;
    }
    if let Some(file) = args.file {
        config.capture_source = file.display().to_string();
        config.offline = true;
    }

    let default_filter = if args.verbose { "debug" } else { config.log_filter.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    run(&config).context("Bridge failed")
}

fn print_interfaces() {
    for name in list_adapters() {
        match adapter_mac(&name) {
            Some(mac) => println!("{:<16} {}", name, mac_to_string(mac)),
            None => println!("{}", name),
        }
    }
}

fn open_capture(config: &Config) -> Result<Arc<dyn CaptureDevice>> {
    let mut capture: Box<dyn CaptureDevice> = if config.offline {
        Box::new(PcapFileCapture::new(&config.capture_source)?)
    } else {
        if let Some(mac) = adapter_mac(&config.capture_source) {
            info!("Adapter {} has address {}", config.capture_source, mac_to_string(mac));
        }
        Box::new(PnetCapture::new(&config.capture_source)?)
    };

    capture.set_snap_length(config.snap_length)?;
    capture.set_timeout(config.capture_timeout)?;
    capture
        .activate()
        .with_context(|| format!("Failed to activate {}", config.capture_source))?;

    Ok(Arc::from(capture))
}

/// Open the session socket if needed and start the handshake.
fn establish(session: &XLinkSession) {
    if !session.is_open() {
        if let Err(e) = session.open() {
            warn!("Failed to open XLink Kai socket: {}", e);
            return;
        }
    }

    if let Err(e) = session.connect() {
        warn!("Failed to connect to XLink Kai at {}: {}", session.remote(), e);
    }
}

fn run(config: &Config) -> Result<()> {
    let settings = config.bridge_settings()?;
    let capture = open_capture(config)?;
    let bridge = Arc::new(Bridge::new(settings));
    let session = Arc::new(XLinkSession::new(config.xlink_address()));

    {
        let bridge = Arc::clone(&bridge);
        let capture = Arc::clone(&capture);
        session.set_data_handler(move |frame| {
            bridge.inject_received(frame, capture.as_ref());
        });
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        let capture = Arc::clone(&capture);
        ctrlc::set_handler(move || {
            info!("Shutting down");
            running.store(false, Ordering::SeqCst);
            capture.break_loop();
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    info!("Connecting to XLink Kai at {}", session.remote());
    establish(&session);

    // Re-establish the session whenever the handshake times out.
    let supervisor = {
        let session = Arc::clone(&session);
        let running = Arc::clone(&running);
        let delay = config.reconnect_delay;
        thread::spawn(move || loop {
            thread::park_timeout(delay);
            if !running.load(Ordering::SeqCst) {
                break;
            }
            if session.is_disconnected() {
                info!("Reconnecting to XLink Kai at {}", session.remote());
                establish(&session);
            }
        })
    };

    info!("Bridging {}", capture.source_name());
    let result = capture.dispatch(0, &mut |frame| {
        bridge.forward_captured(frame, capture.as_ref(), session.as_ref());
    });

    running.store(false, Ordering::SeqCst);
    supervisor.thread().unpark();
    if supervisor.join().is_err() {
        warn!("Reconnect thread panicked");
    }

    session.close();
    capture.close();

    let handled = result.context("Capture failed")?;
    debug!("Handled {} captured frames", handled);
    info!("Bridge stopped");
    Ok(())
}
