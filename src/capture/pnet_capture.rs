//! pnet-based live capture on a monitor-mode adapter.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::Duration;

use macaddr::MacAddr6;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};

use super::{snap, CaptureDevice, NextFrame, DEFAULT_SNAP_LENGTH, DEFAULT_TIMEOUT};
use crate::error::CaptureError;
use crate::utils::lock;

/// Live capture using the pnet datalink layer.
///
/// On a monitor-mode interface the raw frames carry a radiotap header
/// followed by the 802.11 frame, which is exactly what the codec expects.
pub struct PnetCapture {
    interface: NetworkInterface,
    snap_length: usize,
    timeout: Duration,
    rx: Mutex<Option<Box<dyn DataLinkReceiver>>>,
    tx: Mutex<Option<Box<dyn DataLinkSender>>>,
    break_requested: AtomicBool,
}

impl PnetCapture {
    /// Create a capture on the named adapter. Nothing is opened until `activate`.
    pub fn new(interface_name: &str) -> Result<Self, CaptureError> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == interface_name)
            .ok_or_else(|| CaptureError::InterfaceNotFound(interface_name.to_string()))?;

        Ok(Self {
            interface,
            snap_length: DEFAULT_SNAP_LENGTH,
            timeout: DEFAULT_TIMEOUT,
            rx: Mutex::new(None),
            tx: Mutex::new(None),
            break_requested: AtomicBool::new(false),
        })
    }
}

impl CaptureDevice for PnetCapture {
    fn set_snap_length(&mut self, length: usize) -> Result<(), CaptureError> {
        if self.is_activated() {
            return Err(CaptureError::AlreadyActivated);
        }
        self.snap_length = length;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        if self.is_activated() {
            return Err(CaptureError::AlreadyActivated);
        }
        self.timeout = timeout;
        Ok(())
    }

    fn activate(&mut self) -> Result<(), CaptureError> {
        if self.is_activated() {
            return Err(CaptureError::AlreadyActivated);
        }

        let config = Config {
            read_timeout: Some(self.timeout),
            read_buffer_size: self.snap_length.max(DEFAULT_SNAP_LENGTH),
            promiscuous: true,
            ..Config::default()
        };

        let (tx, rx) = match datalink::channel(&self.interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => {
                return Err(CaptureError::ChannelCreation(
                    "unsupported channel type".to_string(),
                ))
            }
            Err(e) => {
                let msg = e.to_string();
                if e.kind() == io::ErrorKind::PermissionDenied
                    || msg.contains("permission")
                    || msg.contains("Operation not permitted")
                {
                    return Err(CaptureError::InsufficientPermissions);
                }
                return Err(CaptureError::ChannelCreation(msg));
            }
        };

        *lock(&self.tx) = Some(tx);
        *lock(&self.rx) = Some(rx);

        tracing::info!("Capturing on {}", self.interface.name);
        Ok(())
    }

    fn is_activated(&self) -> bool {
        lock(&self.rx).is_some()
    }

    fn next_frame(&self) -> Result<NextFrame, CaptureError> {
        let mut rx = lock(&self.rx);
        let rx = rx.as_mut().ok_or(CaptureError::NotActivated)?;

        match rx.next() {
            Ok(packet) => Ok(NextFrame::Frame(snap(packet, self.snap_length))),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(NextFrame::Timeout)
            }
            Err(e) => Err(CaptureError::Io(e)),
        }
    }

    fn inject(&self, frame: &[u8]) -> Result<usize, CaptureError> {
        let mut tx = lock(&self.tx);
        let tx = tx.as_mut().ok_or(CaptureError::NotActivated)?;

        match tx.send_to(frame, None) {
            Some(Ok(())) => Ok(frame.len()),
            Some(Err(e)) => Err(CaptureError::InjectFailed(e.to_string())),
            None => Err(CaptureError::InjectFailed(
                "no room in the write buffer".to_string(),
            )),
        }
    }

    fn close(&self) {
        let had_channel = lock(&self.rx).take().is_some();
        lock(&self.tx).take();
        if had_channel {
            tracing::debug!("Closed capture on {}", self.interface.name);
        }
    }

    fn source_name(&self) -> &str {
        &self.interface.name
    }

    fn break_flag(&self) -> &AtomicBool {
        &self.break_requested
    }
}

impl Drop for PnetCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// List the adapters that can be captured on.
pub fn list_adapters() -> Vec<String> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| {
            let status = if iface.is_up() { "UP" } else { "DOWN" };
            let mac = iface
                .mac
                .map(|m| m.to_string())
                .unwrap_or_else(|| "no MAC".to_string());
            format!("{}: {} [{}]", iface.name, status, mac)
        })
        .collect()
}

/// Hardware address of the named adapter, if it has one.
pub fn adapter_mac(interface_name: &str) -> Option<MacAddr6> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == interface_name)
        .and_then(|iface| iface.mac)
        .map(|m| MacAddr6::new(m.0, m.1, m.2, m.3, m.4, m.5))
}
