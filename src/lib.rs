//! Bridge between monitor-mode 802.11 ad-hoc traffic and the XLink Kai engine.
//!
//! Frames captured from a wireless adapter are decapsulated to Ethernet and
//! tunnelled to XLink Kai over UDP; Ethernet frames arriving from XLink Kai
//! are wrapped back into 802.11 data frames and injected on air.

pub mod bridge;
pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod utils;
pub mod xlink;

pub use bridge::{Bridge, BridgeSettings, EthernetLink};
pub use capture::{CaptureDevice, LinkFrame, NextFrame, PcapFileCapture, PnetCapture};
pub use config::Config;
pub use error::{CaptureError, CodecError, ConfigError, SessionError};
pub use xlink::{SessionState, XLinkSession};
