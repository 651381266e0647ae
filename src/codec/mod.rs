//! Link-layer frame codec.
//!
//! Stateless conversions between radiotap + 802.11 frames, MAC address
//! representations and diagnostic renderings.

mod hexdump;
mod ieee80211;
mod mac;
mod radiotap;

pub use hexdump::hex_dump;
pub use ieee80211::{
    build_acknowledgement_frame, build_data_frame, parse_data_frame, push_llc_snap, DataFrame,
    ACKNOWLEDGEMENT_HEADER_LENGTH, DATA_HEADER_LENGTH, DURATION_MAX, FC_TYPE_ACKNOWLEDGEMENT,
    FC_TYPE_DATA, LLC_SNAP_LENGTH,
};
pub use mac::{
    is_group_address, mac_to_string, mac_to_u64, parse_mac, string_to_mac, swap_mac_endian,
    u64_to_mac, MAC_LENGTH,
};
pub(crate) use mac::read_mac;
pub use radiotap::{
    build_radio_header, channel_to_frequency, frame_flags, parse_radio_header, present_flags,
    RadioHeader, RadioParameters, MCS_LENGTH, RADIOTAP_LENGTH,
};
