//! IEEE 802.11 data and acknowledgement frames for ad-hoc networks.
//!
//! For ad-hoc traffic the address fields are used as follows:
//!
//! | Address 1   | Address 2   | Address 3   | Address 4 |
//! |-------------|-------------|-------------|-----------|
//! | Destination | Source      | BSSID       | N/A       |

use macaddr::MacAddr6;

use super::mac::{read_mac, MAC_LENGTH};
use super::radiotap::{build_radio_header, parse_radio_header, RadioParameters};
use crate::error::CodecError;

/// Frame control of a plain data frame (type 2, subtype 0).
pub const FC_TYPE_DATA: u16 = 0x0008;

/// Frame control of an acknowledgement (type 1, subtype 13).
pub const FC_TYPE_ACKNOWLEDGEMENT: u16 = 0x00d4;

/// Duration sentinel: reserve the medium for as long as possible.
pub const DURATION_MAX: u16 = 0xffff;

/// Frame control, duration, three addresses and sequence control.
pub const DATA_HEADER_LENGTH: usize = 24;

/// QoS data frames append a 2 byte QoS control field.
pub const QOS_CONTROL_LENGTH: usize = 2;

/// Frame control, duration and receiver address.
pub const ACKNOWLEDGEMENT_HEADER_LENGTH: usize = 10;

/// Trailing frame check sequence.
pub const FCS_LENGTH: usize = 4;

/// LLC/SNAP header preceding the ethertype in data frames.
pub const LLC_SNAP_HEADER: [u8; 6] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00];

/// LLC/SNAP header plus ethertype.
pub const LLC_SNAP_LENGTH: usize = LLC_SNAP_HEADER.len() + 2;

const ADDRESS_1_OFFSET: usize = 4;
const ADDRESS_2_OFFSET: usize = ADDRESS_1_OFFSET + MAC_LENGTH;
const ADDRESS_3_OFFSET: usize = ADDRESS_2_OFFSET + MAC_LENGTH;

const FC_TYPE_MASK: u16 = 0x000c;
const FC_TYPE_DATA_BITS: u16 = 0x0008;
const FC_SUBTYPE_QOS: u16 = 0x0080;
const FC_SUBTYPE_NO_DATA: u16 = 0x0040;
const FC_DS_SHIFT: u16 = 8;
const FC_DS_MASK: u16 = 0x0003;

/// Builds the radiotap header and 802.11 header of an ad-hoc data frame.
///
/// The caller appends the LLC/SNAP header and payload.
pub fn build_data_frame(
    source: MacAddr6,
    destination: MacAddr6,
    bssid: MacAddr6,
    params: &RadioParameters,
) -> Vec<u8> {
    let mut frame = build_radio_header(params);
    frame.reserve(DATA_HEADER_LENGTH);

    frame.extend_from_slice(&FC_TYPE_DATA.to_le_bytes());
    frame.extend_from_slice(&DURATION_MAX.to_le_bytes());
    frame.extend_from_slice(destination.as_bytes());
    frame.extend_from_slice(source.as_bytes());
    frame.extend_from_slice(bssid.as_bytes());
    frame.extend_from_slice(&0u16.to_le_bytes()); // sequence control

    frame
}

/// Builds a radiotap header followed by an acknowledgement for `receiver`.
pub fn build_acknowledgement_frame(receiver: MacAddr6, params: &RadioParameters) -> Vec<u8> {
    let mut frame = build_radio_header(params);
    frame.reserve(ACKNOWLEDGEMENT_HEADER_LENGTH);

    frame.extend_from_slice(&FC_TYPE_ACKNOWLEDGEMENT.to_le_bytes());
    frame.extend_from_slice(&DURATION_MAX.to_le_bytes());
    frame.extend_from_slice(receiver.as_bytes());

    frame
}

/// A data frame captured from the air, with its payload decapsulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub destination: MacAddr6,
    pub source: MacAddr6,
    pub bssid: MacAddr6,
    pub ethertype: u16,
    pub payload: &'a [u8],
}

/// Parses a captured radiotap + 802.11 ad-hoc data frame.
///
/// Frames without a payload (null data) yield [`CodecError::MissingLlcSnap`].
pub fn parse_data_frame(data: &[u8]) -> Result<DataFrame<'_>, CodecError> {
    let radio = parse_radio_header(data)?;

    let mut frame = &data[radio.length..];
    if radio.has_fcs() {
        if frame.len() < FCS_LENGTH {
            return Err(CodecError::TooShort {
                expected: radio.length + FCS_LENGTH,
                actual: data.len(),
            });
        }
        frame = &frame[..frame.len() - FCS_LENGTH];
    }

    if frame.len() < DATA_HEADER_LENGTH {
        return Err(CodecError::TooShort {
            expected: DATA_HEADER_LENGTH,
            actual: frame.len(),
        });
    }

    let frame_control = u16::from_le_bytes([frame[0], frame[1]]);
    if frame_control & FC_TYPE_MASK != FC_TYPE_DATA_BITS {
        return Err(CodecError::NotDataFrame(frame_control));
    }

    let ds_bits = ((frame_control >> FC_DS_SHIFT) & FC_DS_MASK) as u8;
    if ds_bits != 0 {
        return Err(CodecError::NotAdHoc(ds_bits));
    }

    if frame_control & FC_SUBTYPE_NO_DATA != 0 {
        return Err(CodecError::MissingLlcSnap);
    }

    let mut header_length = DATA_HEADER_LENGTH;
    if frame_control & FC_SUBTYPE_QOS != 0 {
        header_length += QOS_CONTROL_LENGTH;
    }

    let body = frame.get(header_length..).unwrap_or_default();
    if body.len() < LLC_SNAP_LENGTH || body[..LLC_SNAP_HEADER.len()] != LLC_SNAP_HEADER {
        return Err(CodecError::MissingLlcSnap);
    }

    Ok(DataFrame {
        destination: read_mac(frame, ADDRESS_1_OFFSET),
        source: read_mac(frame, ADDRESS_2_OFFSET),
        bssid: read_mac(frame, ADDRESS_3_OFFSET),
        ethertype: u16::from_be_bytes([body[6], body[7]]),
        payload: &body[LLC_SNAP_LENGTH..],
    })
}

/// Appends the LLC/SNAP header for `ethertype` to a frame.
pub fn push_llc_snap(frame: &mut Vec<u8>, ethertype: u16) {
    frame.extend_from_slice(&LLC_SNAP_HEADER);
    frame.extend_from_slice(&ethertype.to_be_bytes());
}
