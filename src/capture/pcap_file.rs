//! Offline capture from a legacy pcap file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::Duration;

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, Linktype, PcapBlockOwned, PcapError};

use super::{snap, CaptureDevice, NextFrame, DEFAULT_SNAP_LENGTH};
use crate::error::CaptureError;
use crate::utils::lock;

/// Link type of radiotap-prefixed 802.11 frames.
const LINKTYPE_RADIOTAP: Linktype = Linktype(127);

/// Read buffer of the pcap reader, large enough for any single 802.11 frame.
const READER_BUFFER_SIZE: usize = 65536;

/// Replays frames from a pcap file recorded on a monitor-mode adapter.
///
/// Frames are delivered as fast as they are read; the timeout only exists to
/// satisfy the capture contract. Injection is not possible on a file.
pub struct PcapFileCapture {
    path: PathBuf,
    name: String,
    snap_length: usize,
    file: Mutex<Option<File>>,
    reader: Mutex<Option<LegacyPcapReader<File>>>,
    break_requested: AtomicBool,
}

impl PcapFileCapture {
    /// Open a pcap file for replay.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();

        let file = File::open(&path).map_err(|e| CaptureError::OpenFailed {
            source_name: name.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            path,
            name,
            snap_length: DEFAULT_SNAP_LENGTH,
            file: Mutex::new(Some(file)),
            reader: Mutex::new(None),
            break_requested: AtomicBool::new(false),
        })
    }

    /// Path of the file being replayed.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureDevice for PcapFileCapture {
    fn set_snap_length(&mut self, length: usize) -> Result<(), CaptureError> {
        if self.is_activated() {
            return Err(CaptureError::AlreadyActivated);
        }
        self.snap_length = length;
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), CaptureError> {
        if self.is_activated() {
            return Err(CaptureError::AlreadyActivated);
        }
        Ok(())
    }

    fn activate(&mut self) -> Result<(), CaptureError> {
        if self.is_activated() {
            return Err(CaptureError::AlreadyActivated);
        }

        let file = lock(&self.file).take().ok_or_else(|| CaptureError::OpenFailed {
            source_name: self.name.clone(),
            message: "file was closed".to_string(),
        })?;

        let reader = LegacyPcapReader::new(READER_BUFFER_SIZE, file)
            .map_err(|e| CaptureError::Pcap(format!("{}: {:?}", self.name, e)))?;

        *lock(&self.reader) = Some(reader);
        tracing::info!("Replaying frames from {}", self.name);
        Ok(())
    }

    fn is_activated(&self) -> bool {
        lock(&self.reader).is_some()
    }

    fn next_frame(&self) -> Result<NextFrame, CaptureError> {
        let mut reader = lock(&self.reader);
        let reader = reader.as_mut().ok_or(CaptureError::NotActivated)?;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    let frame = match block {
                        PcapBlockOwned::Legacy(packet) => Some(snap(packet.data, self.snap_length)),
                        PcapBlockOwned::LegacyHeader(header) => {
                            let network = header.network;
                            reader.consume(offset);
                            if network != LINKTYPE_RADIOTAP {
                                return Err(CaptureError::Pcap(format!(
                                    "{}: link type {:?} is not radiotap 802.11",
                                    self.name, network
                                )));
                            }
                            tracing::debug!("pcap link type {:?}", network);
                            continue;
                        }
                        PcapBlockOwned::NG(_) => None,
                    };
                    reader.consume(offset);

                    if let Some(frame) = frame {
                        return Ok(NextFrame::Frame(frame));
                    }
                }
                Err(PcapError::Eof) => return Ok(NextFrame::Exhausted),
                Err(PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| CaptureError::Pcap(format!("{:?}", e)))?;
                }
                Err(e) => return Err(CaptureError::Pcap(format!("{:?}", e))),
            }
        }
    }

    fn inject(&self, _frame: &[u8]) -> Result<usize, CaptureError> {
        Err(CaptureError::InjectUnsupported(self.name.clone()))
    }

    fn close(&self) {
        lock(&self.reader).take();
        lock(&self.file).take();
    }

    fn source_name(&self) -> &str {
        &self.name
    }

    fn break_flag(&self) -> &AtomicBool {
        &self.break_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LinkFrame;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Link type of radiotap-prefixed 802.11 frames.
    const LINKTYPE_IEEE802_11_RADIOTAP: u32 = 127;
    const LINKTYPE_ETHERNET: u32 = 1;

    fn write_pcap(frames: &[&[u8]]) -> NamedTempFile {
        write_pcap_with_linktype(LINKTYPE_IEEE802_11_RADIOTAP, frames)
    }

    fn write_pcap_with_linktype(linktype: u32, frames: &[&[u8]]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();

        file.write_all(&0xa1b2_c3d4u32.to_le_bytes()).unwrap();
        file.write_all(&2u16.to_le_bytes()).unwrap();
        file.write_all(&4u16.to_le_bytes()).unwrap();
        file.write_all(&0i32.to_le_bytes()).unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        file.write_all(&65535u32.to_le_bytes()).unwrap();
        file.write_all(&linktype.to_le_bytes()).unwrap();

        for (i, frame) in frames.iter().enumerate() {
            file.write_all(&(i as u32).to_le_bytes()).unwrap();
            file.write_all(&0u32.to_le_bytes()).unwrap();
            file.write_all(&(frame.len() as u32).to_le_bytes()).unwrap();
            file.write_all(&(frame.len() as u32).to_le_bytes()).unwrap();
            file.write_all(frame).unwrap();
        }

        file.flush().unwrap();
        file
    }

    #[test]
    fn test_open_missing_file() {
        let result = PcapFileCapture::new("/nonexistent/capture.pcap");
        assert!(matches!(result, Err(CaptureError::OpenFailed { .. })));
    }

    #[test]
    fn test_replays_frames_then_exhausts() {
        let file = write_pcap(&[&[1, 2, 3], &[4, 5]]);
        let mut capture = PcapFileCapture::new(file.path()).unwrap();
        capture.activate().unwrap();

        assert_eq!(
            capture.next_frame().unwrap(),
            NextFrame::Frame(LinkFrame::new(vec![1, 2, 3]))
        );
        assert_eq!(
            capture.next_frame().unwrap(),
            NextFrame::Frame(LinkFrame::new(vec![4, 5]))
        );
        assert_eq!(capture.next_frame().unwrap(), NextFrame::Exhausted);
    }

    #[test]
    fn test_rejects_non_radiotap_file() {
        let file = write_pcap_with_linktype(LINKTYPE_ETHERNET, &[&[1, 2, 3]]);
        let mut capture = PcapFileCapture::new(file.path()).unwrap();
        capture.activate().unwrap();

        assert!(matches!(capture.next_frame(), Err(CaptureError::Pcap(_))));
    }

    #[test]
    fn test_configuration_after_activation_fails() {
        let file = write_pcap(&[]);
        let mut capture = PcapFileCapture::new(file.path()).unwrap();
        capture.set_snap_length(2).unwrap();
        capture.activate().unwrap();

        assert!(matches!(capture.set_snap_length(10), Err(CaptureError::AlreadyActivated)));
        assert!(matches!(
            capture.set_timeout(Duration::from_millis(5)),
            Err(CaptureError::AlreadyActivated)
        ));
        assert!(matches!(capture.activate(), Err(CaptureError::AlreadyActivated)));
    }

    #[test]
    fn test_snap_length_applies() {
        let file = write_pcap(&[&[1, 2, 3, 4]]);
        let mut capture = PcapFileCapture::new(file.path()).unwrap();
        capture.set_snap_length(2).unwrap();
        capture.activate().unwrap();

        match capture.next_frame().unwrap() {
            NextFrame::Frame(frame) => assert_eq!(frame.data, vec![1, 2]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_over_file() {
        let file = write_pcap(&[&[1], &[2], &[3]]);
        let mut capture = PcapFileCapture::new(file.path()).unwrap();
        capture.activate().unwrap();

        let mut total = 0;
        let handled = capture.dispatch(0, &mut |f| total += f.len()).unwrap();
        assert_eq!(handled, 3);
        assert_eq!(total, 3);
    }

    #[test]
    fn test_inject_unsupported_and_close_idempotent() {
        let file = write_pcap(&[&[1]]);
        let mut capture = PcapFileCapture::new(file.path()).unwrap();
        capture.activate().unwrap();

        assert!(matches!(capture.inject(&[0u8; 4]), Err(CaptureError::InjectUnsupported(_))));

        capture.close();
        capture.close();
        assert!(!capture.is_activated());
        assert!(matches!(capture.next_frame(), Err(CaptureError::NotActivated)));
    }
}
