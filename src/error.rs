use thiserror::Error;

/// Errors raised by capture devices.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Could not open capture source '{source_name}': {message}")]
    OpenFailed { source_name: String, message: String },

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Insufficient permissions to capture (try running as root)")]
    InsufficientPermissions,

    #[error("Failed to create capture channel: {0}")]
    ChannelCreation(String),

    #[error("Capture device is already activated")]
    AlreadyActivated,

    #[error("Capture device is not activated")]
    NotActivated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Injection is not supported on {0}")]
    InjectUnsupported(String),

    #[error("Failed to inject frame: {0}")]
    InjectFailed(String),

    #[error("PCAP error: {0}")]
    Pcap(String),
}

/// Errors raised while parsing or converting link-layer frames.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid radiotap header: {0}")]
    InvalidRadioHeader(String),

    #[error("Not an 802.11 data frame (frame control {0:#06x})")]
    NotDataFrame(u16),

    #[error("Not an ad-hoc frame (distribution system bits {0:#04b})")]
    NotAdHoc(u8),

    #[error("Missing LLC/SNAP encapsulation")]
    MissingLlcSnap,

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),
}

/// Errors raised by the XLink Kai session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Could not send message on closed socket")]
    SocketClosed,

    #[error("No other messages before XLink Kai has connected")]
    NotConnected,

    #[error("Socket is already open")]
    AlreadyOpen,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Unsupported channel {0}, only 2.4GHz channels 1-13 are supported")]
    UnsupportedChannel(i32),
}
