//! Hex rendering of frames for diagnostics.

use std::fmt::Write;

/// Octets rendered per line.
pub const OCTETS_PER_LINE: usize = 64;

/// Renders a buffer as lines of 64 space-separated hex octets, each line
/// prefixed with its 6 digit hex offset.
pub fn hex_dump(data: &[u8]) -> String {
    let mut output = String::with_capacity(8 + data.len() * 3);
    output.push_str("000000 ");

    for (count, byte) in data.iter().enumerate() {
        if count != 0 && count % OCTETS_PER_LINE == 0 {
            let _ = write!(output, "\n{:06x} ", count);
        } else if count != 0 {
            output.push(' ');
        }
        let _ = write!(output, "{:02x}", byte);
    }

    output
}
