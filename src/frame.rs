//! Packet layout and the stream demultiplexer.
//!
//! The link interleaves fixed-size binary packets with newline-terminated text. Packets start
//! with [`MAGIC_BYTES`]; anything else is treated as a text report.

use crate::checksum::{self, PacketOutcome};
use byteorder::{ByteOrder, LittleEndian};

pub const MAGIC_BYTES: &[u8; 4] = &[0xAA, 0xFF, 0xF1, 0x20];
pub const NUM_CHANNELS: usize = 8;
const CHANNEL_SIZE: usize = 4;
pub const PAYLOAD_SIZE: usize = NUM_CHANNELS * CHANNEL_SIZE;
pub const CHECKSUM_OFFSET: usize = MAGIC_BYTES.len() + PAYLOAD_SIZE;
pub const PACKET_LEN: usize = CHECKSUM_OFFSET + 2;

/// Conversion from a raw channel reading to volts.
pub const VOLTS_PER_COUNT: f32 = 0.5364 / 12.0;

const LINE_FEED: u8 = b'\n';

#[derive(Debug, Clone, PartialEq, Eq)]
/// A 38-byte data packet together with its checksum verdict.
pub struct DataPacket {
    raw: [u8; PACKET_LEN],
    outcome: PacketOutcome,
}

impl DataPacket {
    /// Wraps a packet-sized slice and verifies it. Returns `None` for any other length.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; PACKET_LEN] = bytes.try_into().ok()?;
        Some(DataPacket {
            raw,
            outcome: checksum::verify(&raw),
        })
    }

    /// Builds a stamped packet carrying the given channel readings.
    pub fn encode(channels: &[i32; NUM_CHANNELS]) -> Self {
        let mut raw = [0u8; PACKET_LEN];
        raw[..MAGIC_BYTES.len()].copy_from_slice(MAGIC_BYTES);
        let payload = raw[MAGIC_BYTES.len()..CHECKSUM_OFFSET].chunks_exact_mut(CHANNEL_SIZE);
        for (chunk, &value) in payload.zip(channels) {
            LittleEndian::write_i32(chunk, value);
        }
        checksum::stamp(&mut raw);
        DataPacket {
            raw,
            outcome: PacketOutcome::Pass,
        }
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.raw
    }

    pub fn into_bytes(self) -> [u8; PACKET_LEN] {
        self.raw
    }

    pub fn outcome(&self) -> PacketOutcome {
        self.outcome
    }

    pub fn is_valid(&self) -> bool {
        self.outcome.is_pass()
    }

    /// Raw channel readings, in wire order.
    pub fn channels(&self) -> [i32; NUM_CHANNELS] {
        let payload = self.raw[MAGIC_BYTES.len()..CHECKSUM_OFFSET].chunks_exact(CHANNEL_SIZE);
        let mut channels = [0i32; NUM_CHANNELS];
        for (channel, chunk) in channels.iter_mut().zip(payload) {
            *channel = LittleEndian::read_i32(chunk);
        }
        channels
    }

    /// Channel readings converted to volts.
    pub fn voltages(&self) -> [f32; NUM_CHANNELS] {
        self.channels().map(|raw| raw as f32 * VOLTS_PER_COUNT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A free-form text report from the device, newline included when one was present.
pub struct InfoReport {
    raw: Vec<u8>,
}

impl InfoReport {
    pub fn new(raw: Vec<u8>) -> Self {
        InfoReport { raw }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.raw
    }

    /// Lossy UTF-8 rendering without the trailing line ending.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw)
            .trim_end_matches(['\r', '\n'])
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One record extracted from the stream.
pub enum Frame {
    Packet(DataPacket),
    Info(InfoReport),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
/// Result of one parse pass: the frames found and how many leading bytes they used.
pub struct ParseOutcome {
    pub consumed: usize,
    pub frames: Vec<Frame>,
}

/// Splits a byte buffer into packets and text reports.
///
/// The parser keeps no state between calls. Callers drop the first `consumed` bytes of their
/// buffer and call again once more data has arrived; a record cut off at the end of the buffer
/// is left in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameParser;

impl FrameParser {
    pub fn new() -> Self {
        FrameParser
    }

    pub fn process(&self, buffer: &[u8]) -> ParseOutcome {
        let mut frames = Vec::new();
        let mut i = 0;

        while i < buffer.len() {
            let rest = &buffer[i..];
            if rest.starts_with(MAGIC_BYTES) {
                if rest.len() < PACKET_LEN {
                    break;
                }
                if let Some(packet) = DataPacket::from_bytes(&rest[..PACKET_LEN]) {
                    frames.push(Frame::Packet(packet));
                }
                i += PACKET_LEN;
                continue;
            }

            let newline = rest.iter().position(|&b| b == LINE_FEED);
            let header = find_magic(rest);
            match (newline, header) {
                (Some(nl), None) => {
                    frames.push(Frame::Info(InfoReport::new(rest[..=nl].to_vec())));
                    i += nl + 1;
                }
                (Some(nl), Some(h)) if nl < h => {
                    frames.push(Frame::Info(InfoReport::new(rest[..=nl].to_vec())));
                    i += nl + 1;
                }
                (_, Some(h)) => {
                    // h > 0 here, otherwise the packet branch above would have taken it.
                    frames.push(Frame::Info(InfoReport::new(rest[..h].to_vec())));
                    i += h;
                }
                (None, None) => break,
            }
        }

        ParseOutcome { consumed: i, frames }
    }
}

/// Offset of the first complete magic header in `bytes`.
pub(crate) fn find_magic(bytes: &[u8]) -> Option<usize> {
    bytes.windows(MAGIC_BYTES.len()).position(|w| w == MAGIC_BYTES)
}

/// Length of the longest suffix of `bytes` that could be the start of a magic header.
pub(crate) fn magic_prefix_suffix_len(bytes: &[u8]) -> usize {
    (1..MAGIC_BYTES.len())
        .rev()
        .find(|&n| bytes.len() >= n && bytes[bytes.len() - n..] == MAGIC_BYTES[..n])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with(channels: [i32; NUM_CHANNELS]) -> Vec<u8> {
        DataPacket::encode(&channels).as_bytes().to_vec()
    }

    fn parse_all(parser: &FrameParser, buffer: &mut Vec<u8>) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let outcome = parser.process(buffer);
            if outcome.consumed == 0 {
                break;
            }
            buffer.drain(..outcome.consumed);
            frames.extend(outcome.frames);
        }
        frames
    }

    #[test]
    fn test_parse_single_packet() {
        let raw = packet_with([1, -2, 3, -4, 5, -6, 7, i32::MAX]);
        assert_eq!(raw.len(), PACKET_LEN);

        let outcome = FrameParser::new().process(&raw);
        assert_eq!(outcome.consumed, PACKET_LEN);
        match &outcome.frames[..] {
            [Frame::Packet(packet)] => {
                assert!(packet.is_valid());
                assert_eq!(packet.channels(), [1, -2, 3, -4, 5, -6, 7, i32::MAX]);
            }
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[test]
    fn test_info_report_includes_newline() {
        let outcome = FrameParser::new().process(b"battery ok\nrest");
        assert_eq!(outcome.consumed, 11);
        assert_eq!(
            outcome.frames,
            vec![Frame::Info(InfoReport::new(b"battery ok\n".to_vec()))]
        );
    }

    #[test]
    fn test_line_without_header_ahead() {
        let outcome = FrameParser::new().process(b"a\nb");
        assert_eq!(outcome.consumed, 2);
        assert_eq!(outcome.frames, vec![Frame::Info(InfoReport::new(b"a\n".to_vec()))]);
    }

    #[test]
    fn test_channel_byte_order() {
        let packet = DataPacket::encode(&[0x0403_0201, -1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&packet.as_bytes()[4..12], &[0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(packet.channels()[..2], [0x0403_0201, -1]);
    }

    #[test]
    fn test_text_before_header_is_flushed() {
        let mut buffer = b"boot".to_vec();
        buffer.extend(packet_with([0; NUM_CHANNELS]));

        let outcome = FrameParser::new().process(&buffer);
        assert_eq!(outcome.consumed, buffer.len());
        assert_eq!(outcome.frames.len(), 2);
        assert_eq!(outcome.frames[0], Frame::Info(InfoReport::new(b"boot".to_vec())));
        assert!(matches!(outcome.frames[1], Frame::Packet(_)));
    }

    #[test]
    fn test_partial_packet_stalls() {
        let raw = packet_with([9; NUM_CHANNELS]);
        let partial = &raw[..PACKET_LEN - 1];
        let outcome = FrameParser::new().process(partial);
        assert_eq!(outcome.consumed, 0);
        assert!(outcome.frames.is_empty());
    }

    #[test]
    fn test_unterminated_text_waits() {
        let outcome = FrameParser::new().process(b"no terminator yet\xAA\xFF");
        assert_eq!(outcome.consumed, 0);
        assert!(outcome.frames.is_empty());
    }

    #[test]
    fn test_corrupted_packet_resyncs() {
        let mut bad = packet_with([100; NUM_CHANNELS]);
        bad[36] = bad[36].wrapping_add(1);
        let good = packet_with([7; NUM_CHANNELS]);
        let mut buffer = bad.clone();
        buffer.extend(b"status\n");
        buffer.extend(&good);

        let outcome = FrameParser::new().process(&buffer);
        assert_eq!(outcome.consumed, buffer.len());
        assert_eq!(outcome.frames.len(), 3);
        match &outcome.frames[0] {
            Frame::Packet(p) => assert_eq!(p.outcome(), PacketOutcome::Fail),
            other => panic!("expected packet, got {:?}", other),
        }
        assert_eq!(outcome.frames[1], Frame::Info(InfoReport::new(b"status\n".to_vec())));
        match &outcome.frames[2] {
            Frame::Packet(p) => assert!(p.is_valid()),
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_independence() {
        let mut stream = Vec::new();
        stream.extend(b"hello\n");
        stream.extend(packet_with([1, 2, 3, 4, 5, 6, 7, 8]));
        stream.extend(b"mid");
        stream.extend(packet_with([-1; NUM_CHANNELS]));
        // A payload containing a line feed byte must not split the packet.
        stream.extend(packet_with([0x0A0A0A0A; NUM_CHANNELS]));
        stream.extend(b"tail\r\n");

        let parser = FrameParser::new();
        let mut whole = stream.clone();
        let expected = parse_all(&parser, &mut whole);
        assert_eq!(expected.len(), 6);
        assert!(whole.is_empty());

        for chunk_size in [1, 2, 3, 5, 7, 37, 38, 39, 64] {
            let mut buffer = Vec::new();
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                buffer.extend_from_slice(chunk);
                frames.extend(parse_all(&parser, &mut buffer));
            }
            assert_eq!(frames, expected, "chunk size {}", chunk_size);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_voltage_scaling() {
        let packet = DataPacket::encode(&[12, 0, -12, 0, 0, 0, 0, 24]);
        let volts = packet.voltages();
        assert!((volts[0] - 0.5364).abs() < 1e-6);
        assert!((volts[2] + 0.5364).abs() < 1e-6);
        assert!((volts[7] - 1.0728).abs() < 1e-6);
    }

    #[test]
    fn test_info_text_trims_line_ending() {
        let report = InfoReport::new(b"temp=21C\r\n".to_vec());
        assert_eq!(report.text(), "temp=21C");
    }

    #[test]
    fn test_magic_prefix_suffix() {
        assert_eq!(magic_prefix_suffix_len(b"abc"), 0);
        assert_eq!(magic_prefix_suffix_len(b"abc\xAA"), 1);
        assert_eq!(magic_prefix_suffix_len(b"abc\xAA\xFF"), 2);
        assert_eq!(magic_prefix_suffix_len(b"abc\xAA\xFF\xF1"), 3);
        assert_eq!(magic_prefix_suffix_len(b"\xFF"), 0);
    }
}
