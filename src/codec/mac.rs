//! MAC address conversions.
//!
//! Addresses are carried as `MacAddr6`, whose bytes are in wire order.
//! The packed integer form used for arithmetic puts the first wire octet in
//! the most significant position, so `00:11:22:33:44:55` is `0x001122334455`.

use std::str::FromStr;

use macaddr::MacAddr6;

use crate::error::CodecError;

/// Number of octets in a MAC address.
pub const MAC_LENGTH: usize = 6;

const MAC_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Swaps a MAC address between host integer order and wire (little-endian) order.
///
/// Only the low 48 bits are significant.
pub fn swap_mac_endian(mac: u64) -> u64 {
    mac.swap_bytes() >> 16
}

/// Packs a MAC address into its host integer form.
pub fn mac_to_u64(mac: MacAddr6) -> u64 {
    mac.as_bytes()
        .iter()
        .fold(0u64, |acc, &octet| (acc << 8) | u64::from(octet))
}

/// Unpacks the low 48 bits of a host integer into a MAC address.
pub fn u64_to_mac(value: u64) -> MacAddr6 {
    let bytes = (value & MAC_MASK).to_be_bytes();
    MacAddr6::new(bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7])
}

/// Formats a MAC address as lowercase `xx:xx:xx:xx:xx:xx`.
pub fn mac_to_string(mac: MacAddr6) -> String {
    mac.as_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Converts `xx:xx:xx:xx:xx:xx` into a MAC address without validation.
///
/// Hex groups are accumulated until the first group that does not parse, so
/// malformed input yields a partial (possibly zero) address instead of an
/// error. Use [`parse_mac`] where the input is not trusted.
pub fn string_to_mac(text: &str) -> MacAddr6 {
    let mut result: u64 = 0;

    for group in text.split(|c: char| !c.is_ascii_hexdigit()) {
        if group.is_empty() {
            break;
        }
        match u64::from_str_radix(group, 16) {
            Ok(octet) => result = result.wrapping_shl(8).wrapping_add(octet),
            Err(_) => break,
        }
    }

    u64_to_mac(result)
}

/// Strictly parses a MAC address, rejecting anything that is not six octets.
pub fn parse_mac(text: &str) -> Result<MacAddr6, CodecError> {
    MacAddr6::from_str(text.trim()).map_err(|_| CodecError::InvalidMac(text.to_string()))
}

/// Whether the address is a group (broadcast or multicast) address.
pub fn is_group_address(mac: MacAddr6) -> bool {
    mac.as_bytes()[0] & 0x01 != 0
}

/// Reads a MAC address out of a frame at `offset`.
pub(crate) fn read_mac(data: &[u8], offset: usize) -> MacAddr6 {
    let b = &data[offset..offset + MAC_LENGTH];
    MacAddr6::new(b[0], b[1], b[2], b[3], b[4], b[5])
}
