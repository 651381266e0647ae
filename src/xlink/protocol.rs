//! XLink Kai text command protocol.
//!
//! Every datagram is `<tag><separator>[payload]`. Ethernet frames travel as
//! `e;e;<frame>`; the doubled marker keeps them apart from a bare `e;`.

/// Separator terminating every command tag.
pub const SEPARATOR: u8 = b';';

/// Sent to the engine to open a session.
pub const CONNECT_MESSAGE: &[u8] = b"connect;xlinkbridge;";

/// Sent to the engine to close a session.
pub const DISCONNECT_MESSAGE: &[u8] = b"disconnect;";

/// Tag the engine uses to acknowledge a connect.
pub const CONNECTED_TAG: &[u8] = b"connected;";

/// Keepalive, echoed back while connected.
pub const KEEPALIVE_MESSAGE: &[u8] = b"keepalive;";

/// Single ethernet marker, the tag found by the separator scan.
pub const ETHERNET_DATA_TAG: &[u8] = b"e;";

/// Full ethernet data marker preceding a frame.
pub const ETHERNET_DATA_PREFIX: &[u8] = b"e;e;";

/// A parsed datagram from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCommand<'a> {
    /// Connect acknowledgement; the payload is whatever followed the tag.
    Connected { payload: &'a [u8] },
    KeepAlive,
    /// An ethernet frame wrapped in `e;e;`.
    EthernetData { frame: &'a [u8] },
    /// Anything else, with the tag that was found (empty when no separator).
    Unknown { tag: &'a [u8] },
}

impl<'a> ProtocolCommand<'a> {
    /// Classify a received datagram.
    pub fn parse(datagram: &'a [u8]) -> Self {
        let Some(separator) = datagram.iter().position(|&b| b == SEPARATOR) else {
            return ProtocolCommand::Unknown { tag: &[] };
        };

        let tag = &datagram[..=separator];
        let payload = &datagram[separator + 1..];

        if tag == CONNECTED_TAG {
            ProtocolCommand::Connected { payload }
        } else if tag == KEEPALIVE_MESSAGE {
            ProtocolCommand::KeepAlive
        } else if tag == ETHERNET_DATA_TAG {
            // "e;" alone is not data, only the full "e;e;" marker is.
            match datagram.get(..ETHERNET_DATA_PREFIX.len()) {
                Some(prefix) if prefix == ETHERNET_DATA_PREFIX => ProtocolCommand::EthernetData {
                    frame: &datagram[ETHERNET_DATA_PREFIX.len()..],
                },
                _ => ProtocolCommand::Unknown { tag },
            }
        } else {
            ProtocolCommand::Unknown { tag }
        }
    }

    /// Printable form of the command tag, for logging.
    pub fn tag(&self) -> String {
        match self {
            ProtocolCommand::Connected { .. } => String::from_utf8_lossy(CONNECTED_TAG).into_owned(),
            ProtocolCommand::KeepAlive => String::from_utf8_lossy(KEEPALIVE_MESSAGE).into_owned(),
            ProtocolCommand::EthernetData { .. } => {
                String::from_utf8_lossy(ETHERNET_DATA_PREFIX).into_owned()
            }
            ProtocolCommand::Unknown { tag } => String::from_utf8_lossy(tag).into_owned(),
        }
    }
}

/// Wrap an ethernet frame in the data command.
pub fn encode_ethernet_data(frame: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(ETHERNET_DATA_PREFIX.len() + frame.len());
    message.extend_from_slice(ETHERNET_DATA_PREFIX);
    message.extend_from_slice(frame);
    message
}

/// Whether a message is one of the control messages allowed before the
/// handshake completes.
pub fn is_control_message(message: &[u8]) -> bool {
    message == CONNECT_MESSAGE || message == DISCONNECT_MESSAGE
}
