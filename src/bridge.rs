//! Glue between the capture device and the XLink Kai session.
//!
//! Captured 802.11 data frames become Ethernet II frames sent to the engine;
//! Ethernet frames from the engine become 802.11 data frames injected on air.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use macaddr::MacAddr6;
use tracing::{debug, trace, warn};

use crate::capture::{CaptureDevice, LinkFrame};
use crate::codec::{
    build_acknowledgement_frame, build_data_frame, hex_dump, is_group_address, mac_to_string,
    parse_data_frame, push_llc_snap, read_mac, DataFrame, RadioParameters, LLC_SNAP_LENGTH,
    MAC_LENGTH,
};
use crate::error::{CodecError, SessionError};
use crate::utils::lock;
use crate::xlink::XLinkSession;

/// Destination, source and ethertype.
pub const ETHERNET_HEADER_LENGTH: usize = 14;

/// Ethertype values below this are 802.3 length fields.
const ETHERTYPE_MIN: u16 = 0x0600;

/// Most remote stations remembered for echo suppression.
pub const MAX_REMOTE_STATIONS: usize = 256;

/// How long a remote station is remembered after its last frame.
pub const REMOTE_STATION_TTL: Duration = Duration::from_secs(300);

/// Where ethernet frames for the engine go.
pub trait EthernetLink: Send + Sync {
    fn send_ethernet(&self, frame: &[u8]) -> Result<(), SessionError>;
}

impl EthernetLink for XLinkSession {
    fn send_ethernet(&self, frame: &[u8]) -> Result<(), SessionError> {
        self.send_ethernet_data(frame)
    }
}

/// Settings the bridge needs to construct frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Radio parameters of injected frames.
    pub radio: RadioParameters,
    /// BSSID of injected frames. When not all-zero, captured frames from
    /// other networks are ignored.
    pub bssid: MacAddr6,
    /// Acknowledge captured unicast data frames on behalf of remote stations.
    pub acknowledge_data_frames: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            radio: RadioParameters::default(),
            bssid: MacAddr6::nil(),
            acknowledge_data_frames: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Seen {
    last_seen: Instant,
    /// Orders stations by their last frame for eviction.
    sequence: u64,
}

#[derive(Debug, Default)]
struct StationTable {
    stations: HashMap<MacAddr6, Seen>,
    sequence: u64,
}

/// Converts and forwards frames in both directions.
pub struct Bridge {
    settings: BridgeSettings,
    /// Stations behind XLink Kai whose frames we injected, with the time of
    /// their last frame, so their echoes on air are not sent back.
    remote_stations: Mutex<StationTable>,
    max_remote_stations: usize,
    remote_station_ttl: Duration,
}

impl Bridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self::with_station_limits(settings, MAX_REMOTE_STATIONS, REMOTE_STATION_TTL)
    }

    /// Bridge remembering at most `capacity` remote stations for `ttl` each.
    pub fn with_station_limits(settings: BridgeSettings, capacity: usize, ttl: Duration) -> Self {
        Self {
            settings,
            remote_stations: Mutex::new(StationTable::default()),
            max_remote_stations: capacity.max(1),
            remote_station_ttl: ttl,
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Whether `mac` was recently seen as a source of frames from the engine.
    pub fn is_remote_station(&self, mac: MacAddr6) -> bool {
        lock(&self.remote_stations)
            .stations
            .get(&mac)
            .is_some_and(|seen| seen.last_seen.elapsed() < self.remote_station_ttl)
    }

    /// Number of remote stations currently remembered.
    pub fn remote_station_count(&self) -> usize {
        lock(&self.remote_stations).stations.len()
    }

    fn remember_remote_station(&self, mac: MacAddr6) {
        let mut table = lock(&self.remote_stations);
        let now = Instant::now();
        table.sequence += 1;
        let seen = Seen {
            last_seen: now,
            sequence: table.sequence,
        };

        if table.stations.insert(mac, seen).is_some() {
            return;
        }
        debug!("New remote station {}", mac_to_string(mac));

        let stations = &mut table.stations;
        if stations.len() > self.max_remote_stations {
            let ttl = self.remote_station_ttl;
            stations.retain(|_, seen| now.duration_since(seen.last_seen) < ttl);
        }
        while stations.len() > self.max_remote_stations {
            let oldest = stations
                .iter()
                .filter(|(station, _)| **station != mac)
                .min_by_key(|(_, seen)| seen.sequence)
                .map(|(station, _)| *station);
            match oldest {
                Some(station) => {
                    stations.remove(&station);
                }
                None => break,
            }
        }
    }

    /// Convert a captured frame into the ethernet frame to send to the engine.
    ///
    /// Returns `Ok(None)` for frames that parse but must not be forwarded.
    pub fn wire_to_ethernet(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        let data = parse_data_frame(frame)?;

        if !self.accepts(&data) {
            return Ok(None);
        }

        Ok(Some(ethernet_from_data_frame(&data)))
    }

    /// Convert an ethernet frame from the engine into a frame to inject.
    pub fn ethernet_to_wire(&self, ethernet: &[u8]) -> Result<Vec<u8>, CodecError> {
        if ethernet.len() < ETHERNET_HEADER_LENGTH {
            return Err(CodecError::TooShort {
                expected: ETHERNET_HEADER_LENGTH,
                actual: ethernet.len(),
            });
        }

        let destination = read_mac(ethernet, 0);
        let source = read_mac(ethernet, MAC_LENGTH);
        let ethertype = u16::from_be_bytes([ethernet[12], ethernet[13]]);
        let payload = &ethernet[ETHERNET_HEADER_LENGTH..];

        let mut frame = build_data_frame(source, destination, self.settings.bssid, &self.settings.radio);

        if ethertype >= ETHERTYPE_MIN {
            frame.reserve(LLC_SNAP_LENGTH + payload.len());
            push_llc_snap(&mut frame, ethertype);
            frame.extend_from_slice(payload);
        } else {
            // 802.3 frame: the payload already starts with its LLC header.
            let length = (ethertype as usize).min(payload.len());
            frame.extend_from_slice(&payload[..length]);
        }

        Ok(frame)
    }

    /// Forward one captured frame to the engine, acknowledging it on air if
    /// configured. Returns whether the frame was sent.
    pub fn forward_captured<C, L>(&self, frame: &LinkFrame, capture: &C, link: &L) -> bool
    where
        C: CaptureDevice + ?Sized,
        L: EthernetLink + ?Sized,
    {
        let data = match parse_data_frame(frame.as_bytes()) {
            Ok(data) => data,
            Err(e) => {
                trace!("Skipping captured frame: {}", e);
                return false;
            }
        };

        if !self.accepts(&data) {
            return false;
        }

        // Only frames for stations behind XLink Kai; local stations answer themselves.
        if self.settings.acknowledge_data_frames
            && !is_group_address(data.destination)
            && self.is_remote_station(data.destination)
        {
            let ack = build_acknowledgement_frame(data.source, &self.settings.radio);
            if let Err(e) = capture.inject(&ack) {
                debug!("Failed to acknowledge frame from {}: {}", mac_to_string(data.source), e);
            }
        }

        let ethernet = ethernet_from_data_frame(&data);
        trace!("Forwarding to XLink Kai: {}", hex_dump(&ethernet));

        match link.send_ethernet(&ethernet) {
            Ok(()) => true,
            Err(e) => {
                debug!("Could not forward frame from {}: {}", mac_to_string(data.source), e);
                false
            }
        }
    }

    /// Inject an ethernet frame received from the engine. Returns whether the
    /// frame reached the wire.
    pub fn inject_received<C>(&self, ethernet: &[u8], capture: &C) -> bool
    where
        C: CaptureDevice + ?Sized,
    {
        let frame = match self.ethernet_to_wire(ethernet) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping malformed frame from XLink Kai: {}", e);
                return false;
            }
        };

        self.remember_remote_station(read_mac(ethernet, MAC_LENGTH));

        trace!("Injecting: {}", hex_dump(&frame));
        match capture.inject(&frame) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to inject frame: {}", e);
                false
            }
        }
    }

    fn accepts(&self, data: &DataFrame<'_>) -> bool {
        if self.settings.bssid != MacAddr6::nil() && data.bssid != self.settings.bssid {
            trace!("Ignoring frame for BSSID {}", mac_to_string(data.bssid));
            return false;
        }

        if self.is_remote_station(data.source) {
            trace!("Ignoring echo of frame from {}", mac_to_string(data.source));
            return false;
        }

        true
    }
}

/// Build an Ethernet II frame from a decapsulated data frame.
pub fn ethernet_from_data_frame(data: &DataFrame<'_>) -> Vec<u8> {
    let mut ethernet = Vec::with_capacity(ETHERNET_HEADER_LENGTH + data.payload.len());
    ethernet.extend_from_slice(data.destination.as_bytes());
    ethernet.extend_from_slice(data.source.as_bytes());
    ethernet.extend_from_slice(&data.ethertype.to_be_bytes());
    ethernet.extend_from_slice(data.payload);
    ethernet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::NextFrame;
    use crate::codec::{FC_TYPE_ACKNOWLEDGEMENT, RADIOTAP_LENGTH};
    use crate::error::CaptureError;
    use std::sync::atomic::AtomicBool;

    /// Records injected frames; never captures anything.
    #[derive(Default)]
    struct RecordingCapture {
        injected: Mutex<Vec<Vec<u8>>>,
        break_requested: AtomicBool,
    }

    impl CaptureDevice for RecordingCapture {
        fn set_snap_length(&mut self, _length: usize) -> Result<(), CaptureError> {
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> Result<(), CaptureError> {
            Ok(())
        }

        fn activate(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn is_activated(&self) -> bool {
            true
        }

        fn next_frame(&self) -> Result<NextFrame, CaptureError> {
            Ok(NextFrame::Exhausted)
        }

        fn inject(&self, frame: &[u8]) -> Result<usize, CaptureError> {
            self.injected.lock().unwrap().push(frame.to_vec());
            Ok(frame.len())
        }

        fn close(&self) {}

        fn source_name(&self) -> &str {
            "recording"
        }

        fn break_flag(&self) -> &AtomicBool {
            &self.break_requested
        }
    }

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl EthernetLink for RecordingLink {
        fn send_ethernet(&self, frame: &[u8]) -> Result<(), SessionError> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    struct DisconnectedLink;

    impl EthernetLink for DisconnectedLink {
        fn send_ethernet(&self, _frame: &[u8]) -> Result<(), SessionError> {
            Err(SessionError::NotConnected)
        }
    }

    const PSP: MacAddr6 = MacAddr6::new(0x00, 0x1f, 0x32, 0x00, 0x00, 0x01);
    const REMOTE_PSP: MacAddr6 = MacAddr6::new(0x00, 0x1f, 0x32, 0x00, 0x00, 0x02);
    const BSSID: MacAddr6 = MacAddr6::new(0x02, 0x1f, 0x32, 0xaa, 0xbb, 0xcc);

    fn settings() -> BridgeSettings {
        BridgeSettings {
            radio: RadioParameters {
                data_rate: 0x02,
                frequency: 2412,
                channel_flags: 0x00a0,
                ..RadioParameters::default()
            },
            bssid: BSSID,
            acknowledge_data_frames: false,
        }
    }

    fn captured(source: MacAddr6, destination: MacAddr6, bssid: MacAddr6, payload: &[u8]) -> LinkFrame {
        let mut frame = build_data_frame(source, destination, bssid, &settings().radio);
        push_llc_snap(&mut frame, 0x88c8);
        frame.extend_from_slice(payload);
        LinkFrame::new(frame)
    }

    fn ethernet(source: MacAddr6, destination: MacAddr6, ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(destination.as_bytes());
        frame.extend_from_slice(source.as_bytes());
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_captured_frame_is_sent_as_ethernet() {
        let bridge = Bridge::new(settings());
        let capture = RecordingCapture::default();
        let link = RecordingLink::default();

        let frame = captured(PSP, MacAddr6::broadcast(), BSSID, b"hello");
        assert!(bridge.forward_captured(&frame, &capture, &link));

        let sent = link.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ethernet(PSP, MacAddr6::broadcast(), 0x88c8, b"hello"));
        assert!(capture.injected.lock().unwrap().is_empty());
    }

    #[test]
    fn test_frames_from_other_bssids_are_ignored() {
        let bridge = Bridge::new(settings());
        let link = RecordingLink::default();

        let other = MacAddr6::new(0x02, 0, 0, 0, 0, 0x99);
        let frame = captured(PSP, MacAddr6::broadcast(), other, b"x");
        assert!(!bridge.forward_captured(&frame, &RecordingCapture::default(), &link));
        assert_eq!(bridge.wire_to_ethernet(frame.as_bytes()), Ok(None));
        assert!(link.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_nil_bssid_accepts_any_network() {
        let bridge = Bridge::new(BridgeSettings {
            bssid: MacAddr6::nil(),
            ..settings()
        });

        let frame = captured(PSP, MacAddr6::broadcast(), BSSID, b"x");
        assert!(bridge.wire_to_ethernet(frame.as_bytes()).unwrap().is_some());
    }

    #[test]
    fn test_non_data_frames_are_skipped() {
        let bridge = Bridge::new(settings());
        let link = RecordingLink::default();

        let ack = LinkFrame::new(build_acknowledgement_frame(PSP, &settings().radio));
        assert!(!bridge.forward_captured(&ack, &RecordingCapture::default(), &link));
        assert!(bridge.wire_to_ethernet(ack.as_bytes()).is_err());
    }

    #[test]
    fn test_unicast_frames_are_acknowledged() {
        let bridge = Bridge::new(BridgeSettings {
            acknowledge_data_frames: true,
            ..settings()
        });
        let capture = RecordingCapture::default();
        let link = RecordingLink::default();

        let learned = RecordingCapture::default();
        assert!(bridge.inject_received(&ethernet(REMOTE_PSP, PSP, 0x88c8, b"hi"), &learned));

        assert!(bridge.forward_captured(&captured(PSP, REMOTE_PSP, BSSID, b"u"), &capture, &link));
        assert!(bridge.forward_captured(&captured(PSP, MacAddr6::broadcast(), BSSID, b"b"), &capture, &link));

        let injected = capture.injected.lock().unwrap();
        assert_eq!(injected.len(), 1, "only the unicast frame is acknowledged");

        let ack = &injected[0][RADIOTAP_LENGTH..];
        assert_eq!(u16::from_le_bytes([ack[0], ack[1]]), FC_TYPE_ACKNOWLEDGEMENT);
        assert_eq!(&ack[4..10], PSP.as_bytes());
    }

    #[test]
    fn test_frames_between_local_stations_are_not_acknowledged() {
        let bridge = Bridge::new(BridgeSettings {
            acknowledge_data_frames: true,
            ..settings()
        });
        let capture = RecordingCapture::default();
        let link = RecordingLink::default();

        let local_peer = MacAddr6::new(0x00, 0x1f, 0x32, 0x00, 0x00, 0x03);
        assert!(bridge.forward_captured(&captured(PSP, local_peer, BSSID, b"u"), &capture, &link));

        assert!(!bridge.is_remote_station(local_peer));
        assert!(capture.injected.lock().unwrap().is_empty());
        assert_eq!(link.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remote_station_table_is_bounded() {
        let bridge = Bridge::with_station_limits(settings(), 16, REMOTE_STATION_TTL);
        let capture = RecordingCapture::default();

        for i in 0..1000u32 {
            let [_, a, b, c] = i.to_be_bytes();
            let source = MacAddr6::new(0x02, 0, 0, a, b, c);
            assert!(bridge.inject_received(&ethernet(source, PSP, 0x88c8, b"x"), &capture));
        }

        assert_eq!(bridge.remote_station_count(), 16);
        // The most recent station survives, the first ones were evicted.
        assert!(bridge.is_remote_station(MacAddr6::new(0x02, 0, 0, 0, 0x03, 0xe7)));
        assert!(!bridge.is_remote_station(MacAddr6::new(0x02, 0, 0, 0, 0, 0)));
    }

    #[test]
    fn test_remote_stations_expire() {
        let bridge = Bridge::with_station_limits(settings(), 16, Duration::from_millis(20));
        let capture = RecordingCapture::default();

        assert!(bridge.inject_received(&ethernet(REMOTE_PSP, PSP, 0x88c8, b"x"), &capture));
        assert!(bridge.is_remote_station(REMOTE_PSP));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!bridge.is_remote_station(REMOTE_PSP));

        // Its frames are forwarded again once forgotten.
        let echo = LinkFrame::new(capture.injected.lock().unwrap()[0].clone());
        assert!(bridge.forward_captured(&echo, &capture, &RecordingLink::default()));
    }

    #[test]
    fn test_send_failure_is_reported_not_fatal() {
        let bridge = Bridge::new(settings());
        let frame = captured(PSP, MacAddr6::broadcast(), BSSID, b"x");
        assert!(!bridge.forward_captured(&frame, &RecordingCapture::default(), &DisconnectedLink));
    }

    #[test]
    fn test_received_ethernet_is_injected_as_data_frame() {
        let bridge = Bridge::new(settings());
        let capture = RecordingCapture::default();

        let received = ethernet(REMOTE_PSP, PSP, 0x88c8, b"from afar");
        assert!(bridge.inject_received(&received, &capture));

        let injected = capture.injected.lock().unwrap();
        assert_eq!(injected.len(), 1);

        let parsed = parse_data_frame(&injected[0]).unwrap();
        assert_eq!(parsed.destination, PSP);
        assert_eq!(parsed.source, REMOTE_PSP);
        assert_eq!(parsed.bssid, BSSID);
        assert_eq!(parsed.ethertype, 0x88c8);
        assert_eq!(parsed.payload, b"from afar");
    }

    #[test]
    fn test_round_trip_through_both_directions() {
        let bridge = Bridge::new(settings());
        let original = ethernet(REMOTE_PSP, MacAddr6::broadcast(), 0x0800, &[0x45, 0, 0, 20]);

        let wire = bridge.ethernet_to_wire(&original).unwrap();
        let parsed = parse_data_frame(&wire).unwrap();
        assert_eq!(ethernet_from_data_frame(&parsed), original);
    }

    #[test]
    fn test_echoes_of_injected_frames_are_not_forwarded() {
        let bridge = Bridge::new(settings());
        let capture = RecordingCapture::default();
        let link = RecordingLink::default();

        assert!(bridge.inject_received(&ethernet(REMOTE_PSP, PSP, 0x88c8, b"x"), &capture));
        assert!(bridge.is_remote_station(REMOTE_PSP));

        // The monitor interface sees our own injection.
        let echo = LinkFrame::new(capture.injected.lock().unwrap()[0].clone());
        assert!(!bridge.forward_captured(&echo, &capture, &link));
        assert!(link.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_short_ethernet_frames_are_dropped() {
        let bridge = Bridge::new(settings());
        let capture = RecordingCapture::default();

        assert!(!bridge.inject_received(&[0u8; 13], &capture));
        assert_eq!(
            bridge.ethernet_to_wire(&[0u8; 13]),
            Err(CodecError::TooShort {
                expected: ETHERNET_HEADER_LENGTH,
                actual: 13
            })
        );
        assert!(capture.injected.lock().unwrap().is_empty());
    }

    #[test]
    fn test_ieee8023_frames_keep_their_llc_header() {
        let bridge = Bridge::new(settings());
        let llc = [0x42, 0x42, 0x03, 0xde, 0xad];
        // Length field of 5 with trailing padding
        let mut received = ethernet(REMOTE_PSP, PSP, 5, &llc);
        received.extend_from_slice(&[0, 0, 0]);

        let wire = bridge.ethernet_to_wire(&received).unwrap();
        assert_eq!(&wire[wire.len() - llc.len()..], &llc);
        assert_eq!(wire.len(), RADIOTAP_LENGTH + crate::codec::DATA_HEADER_LENGTH + llc.len());
    }
}
