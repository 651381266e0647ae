//! Radiotap header construction and parsing.

use crate::error::CodecError;

/// Radiotap present flag bits used by this crate.
pub mod present_flags {
    pub const TSFT: u32 = 1 << 0;
    pub const FLAGS: u32 = 1 << 1;
    pub const RATE: u32 = 1 << 2;
    pub const CHANNEL: u32 = 1 << 3;
    pub const TX_FLAGS: u32 = 1 << 15;
    pub const MCS: u32 = 1 << 19;
    pub const EXT: u32 = 1 << 31;
}

/// Radiotap flags byte bits.
pub mod frame_flags {
    /// Frame includes a trailing frame check sequence.
    pub const FCS_AT_END: u8 = 0x10;
}

/// Size of the fixed general header (version, pad, length, present).
pub const GENERAL_HEADER_LENGTH: usize = 8;

/// Length of an injected radiotap header without the MCS block.
pub const RADIOTAP_LENGTH: usize = 16;

/// Extra bytes taken by the MCS block.
pub const MCS_LENGTH: usize = 3;

/// Present flags of an injected header: flags, rate, channel and TX flags.
pub const SEND_PRESENT_FLAGS: u32 =
    present_flags::FLAGS | present_flags::RATE | present_flags::CHANNEL | present_flags::TX_FLAGS;

/// TX flags of injected frames (do not wait for an acknowledgement).
pub const TX_FLAGS: u16 = 0x0008;

const FIRST_CHANNEL_FREQUENCY: i32 = 2412;
const CHANNEL_SPACING: i32 = 5;

/// Physical-layer parameters for outgoing frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadioParameters {
    /// Radiotap flags byte.
    pub flags: u8,
    /// Legacy data rate in 500 kbps units.
    pub data_rate: u8,
    /// Channel frequency in MHz.
    pub frequency: u16,
    /// Radiotap channel flags.
    pub channel_flags: u16,
    /// MCS "known" bitmask, zero when the device does not use MCS.
    pub known_mcs_info: u8,
    pub mcs_flags: u8,
    pub mcs_info: u8,
}

impl RadioParameters {
    /// Whether an MCS block should be emitted instead of a legacy rate.
    pub fn has_mcs(&self) -> bool {
        self.known_mcs_info != 0
    }
}

/// Converts a 2.4GHz channel number to its centre frequency in MHz.
///
/// Returns `None` for anything outside channels 1-13.
pub fn channel_to_frequency(channel: i32) -> Option<u16> {
    if (1..=13).contains(&channel) {
        Some((FIRST_CHANNEL_FREQUENCY + (channel - 1) * CHANNEL_SPACING) as u16)
    } else {
        None
    }
}

/// Builds the radiotap header for an injected frame.
///
/// The returned buffer length equals the header length written into it:
/// [`RADIOTAP_LENGTH`], plus [`MCS_LENGTH`] when MCS information is present.
pub fn build_radio_header(params: &RadioParameters) -> Vec<u8> {
    let mut present = SEND_PRESENT_FLAGS;
    let mut length = RADIOTAP_LENGTH;

    if params.has_mcs() {
        present &= !present_flags::RATE;
        present |= present_flags::MCS;
        length += MCS_LENGTH;
    }

    let mut header = Vec::with_capacity(length);

    // General header
    header.push(0); // version
    header.push(0); // pad
    header.extend_from_slice(&(length as u16).to_le_bytes());
    header.extend_from_slice(&present.to_le_bytes());

    // Injected frames never carry an FCS
    header.push(params.flags & !frame_flags::FCS_AT_END);

    // The rate slot stays as padding when MCS is used
    header.push(if params.has_mcs() { 0 } else { params.data_rate });

    header.extend_from_slice(&params.frequency.to_le_bytes());
    header.extend_from_slice(&params.channel_flags.to_le_bytes());
    header.extend_from_slice(&TX_FLAGS.to_le_bytes());

    if params.has_mcs() {
        header.push(params.known_mcs_info);
        header.push(params.mcs_flags);
        header.push(params.mcs_info);
    }

    header
}

/// The interesting parts of a captured radiotap header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioHeader {
    /// Total header length, i.e. the offset of the 802.11 frame.
    pub length: usize,
    /// First present bitmask.
    pub present: u32,
    /// Radio parameters found in the header; absent fields stay zero.
    pub parameters: RadioParameters,
}

impl RadioHeader {
    /// Whether the captured frame ends with a 4 byte FCS.
    pub fn has_fcs(&self) -> bool {
        self.parameters.flags & frame_flags::FCS_AT_END != 0
    }
}

/// (alignment, size) of the radiotap fields for bits 0 through 19.
const FIELD_LAYOUT: [(usize, usize); 20] = [
    (8, 8), // TSFT
    (1, 1), // flags
    (1, 1), // rate
    (2, 4), // channel
    (1, 2), // FHSS
    (1, 1), // dBm antenna signal
    (1, 1), // dBm antenna noise
    (2, 2), // lock quality
    (2, 2), // TX attenuation
    (2, 2), // dB TX attenuation
    (1, 1), // dBm TX power
    (1, 1), // antenna
    (1, 1), // dB antenna signal
    (1, 1), // dB antenna noise
    (2, 2), // RX flags
    (2, 2), // TX flags
    (1, 1), // RTS retries
    (1, 1), // data retries
    (4, 8), // XChannel
    (1, 3), // MCS
];

/// Parses the radiotap header at the start of a captured frame.
pub fn parse_radio_header(data: &[u8]) -> Result<RadioHeader, CodecError> {
    if data.len() < GENERAL_HEADER_LENGTH {
        return Err(CodecError::TooShort {
            expected: GENERAL_HEADER_LENGTH,
            actual: data.len(),
        });
    }

    if data[0] != 0 {
        return Err(CodecError::InvalidRadioHeader(format!(
            "unsupported version {}",
            data[0]
        )));
    }

    let length = u16::from_le_bytes([data[2], data[3]]) as usize;
    if length < GENERAL_HEADER_LENGTH || length > data.len() {
        return Err(CodecError::InvalidRadioHeader(format!(
            "header length {} does not fit frame of {} bytes",
            length,
            data.len()
        )));
    }
    let header = &data[..length];

    let present = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    // Skip extended present words
    let mut offset = 4;
    let mut word = present;
    while word & present_flags::EXT != 0 {
        offset += 4;
        if offset + 4 > header.len() {
            return Err(CodecError::InvalidRadioHeader(
                "truncated present bitmask".to_string(),
            ));
        }
        word = u32::from_le_bytes([
            header[offset],
            header[offset + 1],
            header[offset + 2],
            header[offset + 3],
        ]);
    }
    offset += 4;

    let mut parameters = RadioParameters::default();

    for (bit, &(align, size)) in FIELD_LAYOUT.iter().enumerate() {
        if present & (1 << bit) == 0 {
            continue;
        }

        offset = offset.next_multiple_of(align);
        if offset + size > header.len() {
            return Err(CodecError::InvalidRadioHeader(format!(
                "field {} runs past the header",
                bit
            )));
        }
        let field = &header[offset..offset + size];

        match 1u32 << bit {
            present_flags::FLAGS => parameters.flags = field[0],
            present_flags::RATE => parameters.data_rate = field[0],
            present_flags::CHANNEL => {
                parameters.frequency = u16::from_le_bytes([field[0], field[1]]);
                parameters.channel_flags = u16::from_le_bytes([field[2], field[3]]);
            }
            present_flags::MCS => {
                parameters.known_mcs_info = field[0];
                parameters.mcs_flags = field[1];
                parameters.mcs_info = field[2];
            }
            _ => {}
        }

        offset += size;
    }

    Ok(RadioHeader {
        length,
        present,
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_params() -> RadioParameters {
        RadioParameters {
            flags: 0x12,
            data_rate: 0x04,
            frequency: 2437,
            channel_flags: 0x00a0,
            ..RadioParameters::default()
        }
    }

    fn mcs_params() -> RadioParameters {
        RadioParameters {
            known_mcs_info: 0x07,
            mcs_flags: 0x00,
            mcs_info: 0x05,
            ..legacy_params()
        }
    }

    #[test]
    fn test_channel_to_frequency() {
        for channel in 1..=13 {
            assert_eq!(
                channel_to_frequency(channel),
                Some((2412 + (channel - 1) * 5) as u16)
            );
        }
        assert_eq!(channel_to_frequency(1), Some(2412));
        assert_eq!(channel_to_frequency(13), Some(2472));
    }

    #[test]
    fn test_channel_to_frequency_unsupported() {
        for channel in [i32::MIN, -1, 0, 14, 36, 165, i32::MAX] {
            assert_eq!(channel_to_frequency(channel), None);
        }
    }

    #[test]
    fn test_legacy_header_layout() {
        let header = build_radio_header(&legacy_params());

        assert_eq!(header.len(), RADIOTAP_LENGTH);
        assert_eq!(u16::from_le_bytes([header[2], header[3]]) as usize, RADIOTAP_LENGTH);

        let present = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        assert_ne!(present & present_flags::RATE, 0);
        assert_eq!(present & present_flags::MCS, 0);

        // FCS bit cleared, other flags kept
        assert_eq!(header[8], 0x02);
        assert_eq!(header[9], 0x04);
        assert_eq!(u16::from_le_bytes([header[10], header[11]]), 2437);
        assert_eq!(u16::from_le_bytes([header[12], header[13]]), 0x00a0);
        assert_eq!(u16::from_le_bytes([header[14], header[15]]), TX_FLAGS);
    }

    #[test]
    fn test_mcs_header_layout() {
        let legacy = build_radio_header(&legacy_params());
        let header = build_radio_header(&mcs_params());

        assert_eq!(header.len(), legacy.len() + MCS_LENGTH);
        assert_eq!(u16::from_le_bytes([header[2], header[3]]) as usize, header.len());

        let present = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        assert_eq!(present & (1 << 2), 0);
        assert_ne!(present & (1 << 19), 0);

        assert_eq!(header[9], 0, "rate slot is padding with MCS");
        assert_eq!(&header[16..19], &[0x07, 0x00, 0x05]);
    }

    #[test]
    fn test_parse_built_header() {
        for params in [legacy_params(), mcs_params()] {
            let header = build_radio_header(&params);
            let parsed = parse_radio_header(&header).unwrap();

            assert_eq!(parsed.length, header.len());
            assert!(!parsed.has_fcs());
            assert_eq!(parsed.parameters.frequency, params.frequency);
            assert_eq!(parsed.parameters.channel_flags, params.channel_flags);
            assert_eq!(parsed.parameters.known_mcs_info, params.known_mcs_info);
        }
    }

    #[test]
    fn test_parse_captured_header_with_tsft() {
        // present: TSFT, flags, rate, channel, antenna signal
        let mut header = vec![0u8, 0, 0, 0];
        header.extend_from_slice(&0x0000_002fu32.to_le_bytes());
        header.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        header.push(frame_flags::FCS_AT_END);
        header.push(0x16);
        header.extend_from_slice(&2462u16.to_le_bytes());
        header.extend_from_slice(&0x00c0u16.to_le_bytes());
        header.push(0xc4);
        let length = header.len() as u16;
        header[2..4].copy_from_slice(&length.to_le_bytes());

        let parsed = parse_radio_header(&header).unwrap();
        assert_eq!(parsed.length, 23);
        assert!(parsed.has_fcs());
        assert_eq!(parsed.parameters.data_rate, 0x16);
        assert_eq!(parsed.parameters.frequency, 2462);
        assert_eq!(parsed.parameters.channel_flags, 0x00c0);
    }

    #[test]
    fn test_parse_extended_present() {
        // Two present words, flags field in the first namespace
        let mut header = vec![0u8, 0, 13, 0];
        header.extend_from_slice(&(present_flags::FLAGS | present_flags::EXT).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.push(frame_flags::FCS_AT_END);

        let parsed = parse_radio_header(&header).unwrap();
        assert_eq!(parsed.length, 13);
        assert!(parsed.has_fcs());
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        assert!(matches!(
            parse_radio_header(&[0, 0, 8]),
            Err(CodecError::TooShort { expected: 8, actual: 3 })
        ));
        assert!(parse_radio_header(&[1, 0, 8, 0, 0, 0, 0, 0]).is_err());
        assert!(parse_radio_header(&[0, 0, 64, 0, 0, 0, 0, 0]).is_err());

        // Channel announced but missing
        let mut header = vec![0u8, 0, 8, 0];
        header.extend_from_slice(&present_flags::CHANNEL.to_le_bytes());
        assert!(parse_radio_header(&header).is_err());
    }
}
