//! XLink Kai engine protocol and session.

mod protocol;
mod session;

pub use protocol::{
    encode_ethernet_data, is_control_message, ProtocolCommand, CONNECTED_TAG, CONNECT_MESSAGE,
    DISCONNECT_MESSAGE, ETHERNET_DATA_PREFIX, ETHERNET_DATA_TAG, KEEPALIVE_MESSAGE, SEPARATOR,
};
pub use session::{
    DataHandler, SessionState, XLinkSession, CONNECTION_TIMEOUT, MAX_DATAGRAM_LENGTH,
    POLL_INTERVAL,
};
