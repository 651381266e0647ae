//! Frame capture and injection abstraction.
//!
//! This module defines the `CaptureDevice` trait and provides a live
//! pnet-based implementation and an offline pcap file implementation. The
//! bridge only depends on the trait, so tests can substitute fakes.

mod pcap_file;
mod pnet_capture;

pub use pcap_file::PcapFileCapture;
pub use pnet_capture::{adapter_mac, list_adapters, PnetCapture};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::CaptureError;

/// Default snap length for captured frames.
pub const DEFAULT_SNAP_LENGTH: usize = 4096;

/// Default read timeout of a capture device.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// I/O errors in a row after which `dispatch` gives up.
pub const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// One captured or to-be-injected link-layer frame, including its radiotap header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    pub data: Vec<u8>,
}

impl LinkFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of a single pull from a capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextFrame {
    /// A frame was captured.
    Frame(LinkFrame),
    /// Nothing arrived within the read timeout; the caller should retry.
    Timeout,
    /// An offline source has no more frames.
    Exhausted,
}

/// A source of captured frames that can also inject frames.
///
/// Configuration (`set_snap_length`, `set_timeout`) is only allowed before
/// `activate`; afterwards it fails with [`CaptureError::AlreadyActivated`].
/// Runtime operations take `&self` so one device can be shared between the
/// capture loop and the session's receiver.
pub trait CaptureDevice: Send + Sync {
    /// Maximum number of bytes kept per captured frame.
    fn set_snap_length(&mut self, length: usize) -> Result<(), CaptureError>;

    /// Read timeout for `next_frame`.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), CaptureError>;

    /// Enter capture mode.
    fn activate(&mut self) -> Result<(), CaptureError>;

    /// Whether `activate` has succeeded.
    fn is_activated(&self) -> bool;

    /// Pull the next frame, waiting at most the configured timeout.
    fn next_frame(&self) -> Result<NextFrame, CaptureError>;

    /// Write a fully formed frame to the wire, returning the bytes written.
    fn inject(&self, frame: &[u8]) -> Result<usize, CaptureError>;

    /// Release the underlying handle. Safe to call repeatedly.
    fn close(&self);

    /// Name of the adapter or file being captured.
    fn source_name(&self) -> &str;

    /// Flag raised by `break_loop`.
    fn break_flag(&self) -> &AtomicBool;

    /// Ask a running `dispatch` to return. Callable from any thread.
    fn break_loop(&self) {
        self.break_flag().store(true, Ordering::SeqCst);
    }

    /// Invoke `callback` for each captured frame until `limit` frames were
    /// handled, `break_loop` was called or an offline source ran out.
    ///
    /// Read errors are logged and retried; only [`MAX_CONSECUTIVE_ERRORS`]
    /// of them in a row, or any other kind of error, end the dispatch.
    ///
    /// A `limit` of zero means no limit. Returns the number of frames handled.
    fn dispatch(
        &self,
        limit: usize,
        callback: &mut dyn FnMut(&LinkFrame),
    ) -> Result<usize, CaptureError> {
        let mut handled = 0;
        let mut errors = 0;

        while limit == 0 || handled < limit {
            if self.break_flag().swap(false, Ordering::SeqCst) {
                break;
            }

            let next = match self.next_frame() {
                Ok(next) => next,
                Err(CaptureError::Io(e)) if errors + 1 < MAX_CONSECUTIVE_ERRORS => {
                    errors += 1;
                    tracing::warn!("Error reading from {}: {}", self.source_name(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            errors = 0;

            match next {
                NextFrame::Frame(frame) => {
                    callback(&frame);
                    handled += 1;
                }
                NextFrame::Timeout => continue,
                NextFrame::Exhausted => break,
            }
        }

        Ok(handled)
    }
}

/// Truncate a captured frame to the snap length.
pub(crate) fn snap(data: &[u8], snap_length: usize) -> LinkFrame {
    let length = data.len().min(snap_length);
    LinkFrame::new(data[..length].to_vec())
}
