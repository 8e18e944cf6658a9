//! KISS-style framing for the local serial channel.
//!
//! ```text
//! FEND | command | escaped payload | FEND
//! ```
//!
//! FEND inside the body is sent as `FESC TFEND`, FESC as `FESC TFESC`. The same
//! channel also carries human-readable log lines between frames, so a first
//! body byte of 0x20 or above is taken as text rather than a command.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::FrameError;

/// Frame delimiter
pub const FEND: u8 = 0xC0;
/// Escape byte
pub const FESC: u8 = 0xDB;
/// Escaped FEND
pub const TFEND: u8 = 0xDC;
/// Escaped FESC
pub const TFESC: u8 = 0xDD;

/// Command bytes live below this value
pub const COMMAND_LIMIT: u8 = 0x20;

/// Default maximum unescaped frame length (command + payload)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2048;

/// Longest text line kept before it is flushed
pub const MAX_TEXT_LINE: usize = 512;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KissFrame {
    /// Command discriminator
    pub command: u8,
    /// Unescaped payload
    pub payload: Bytes,
}

impl KissFrame {
    /// Create a frame
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Encode with delimiters and escaping
    pub fn encode(&self) -> Bytes {
        encode_frame(self.command, &self.payload)
    }
}

/// Something pulled out of the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// A complete frame
    Frame(KissFrame),
    /// A text line seen outside any frame
    Text(String),
    /// A framing error; the decoder has already resynchronised
    Error(FrameError),
}

/// Encode one frame
pub fn encode_frame(command: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    buf.put_u8(FEND);
    escape_into(&mut buf, &[command]);
    escape_into(&mut buf, payload);
    buf.put_u8(FEND);
    buf.freeze()
}

fn escape_into(buf: &mut BytesMut, data: &[u8]) {
    for &b in data {
        match b {
            FEND => buf.put_slice(&[FESC, TFEND]),
            FESC => buf.put_slice(&[FESC, TFESC]),
            _ => buf.put_u8(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    InFrame,
    Escaped,
    /// Dropping the rest of a bad frame until the next delimiter
    Discard,
}

/// Incremental, restartable frame decoder.
///
/// Feed it whatever bytes are available; it never blocks and keeps partial
/// frames between calls. A closing FEND also opens the next frame, so
/// back-to-back frames may share a delimiter.
#[derive(Debug)]
pub struct KissDecoder {
    state: DecodeState,
    frame: BytesMut,
    text: Vec<u8>,
    max_frame_size: usize,
}

impl KissDecoder {
    /// Create a decoder with the default frame limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom frame limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::Idle,
            frame: BytesMut::new(),
            text: Vec::new(),
            max_frame_size: max_frame_size.max(1),
        }
    }

    /// Bytes retained for the next call
    pub fn pending(&self) -> usize {
        self.frame.len() + self.text.len()
    }

    /// Whether the decoder sits between frames
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Idle
    }

    /// Drop any partial state
    pub fn reset(&mut self) {
        self.state = DecodeState::Idle;
        self.frame.clear();
        self.text.clear();
    }

    /// Consume `data`, returning everything it completed
    pub fn decode(&mut self, data: &[u8]) -> Vec<StreamItem> {
        let mut out = Vec::new();
        for &b in data {
            self.step(b, &mut out);
        }
        out
    }

    fn step(&mut self, b: u8, out: &mut Vec<StreamItem>) {
        match self.state {
            DecodeState::Idle => {
                if b == FEND {
                    self.state = DecodeState::InFrame;
                    self.frame.clear();
                } else {
                    self.push_text(b, out);
                }
            }
            DecodeState::InFrame => match b {
                FEND => self.finish_frame(out),
                FESC => self.state = DecodeState::Escaped,
                _ if self.frame.is_empty() && b >= COMMAND_LIMIT => {
                    // Back to plain text output
                    self.state = DecodeState::Idle;
                    self.push_text(b, out);
                }
                _ => self.push_frame_byte(b, out),
            },
            DecodeState::Escaped => match b {
                TFEND => {
                    self.state = DecodeState::InFrame;
                    self.push_frame_byte(FEND, out);
                }
                TFESC => {
                    self.state = DecodeState::InFrame;
                    self.push_frame_byte(FESC, out);
                }
                FEND => {
                    out.push(StreamItem::Error(FrameError::InvalidEscape(b)));
                    self.frame.clear();
                    self.state = DecodeState::InFrame;
                }
                _ => {
                    out.push(StreamItem::Error(FrameError::InvalidEscape(b)));
                    self.frame.clear();
                    self.state = DecodeState::Discard;
                }
            },
            DecodeState::Discard => {
                if b == FEND {
                    self.state = DecodeState::InFrame;
                }
            }
        }
    }

    fn push_frame_byte(&mut self, b: u8, out: &mut Vec<StreamItem>) {
        if self.frame.len() >= self.max_frame_size {
            debug!(limit = self.max_frame_size, "kiss frame oversize, discarding");
            out.push(StreamItem::Error(FrameError::Oversize(self.max_frame_size)));
            self.frame.clear();
            self.state = DecodeState::Discard;
            return;
        }
        self.frame.put_u8(b);
    }

    fn finish_frame(&mut self, out: &mut Vec<StreamItem>) {
        // Empty frames (FEND FEND) are just delimiters
        if self.frame.is_empty() {
            return;
        }
        let mut body = self.frame.split().freeze();
        let command = body[0];
        let payload = body.split_off(1);
        out.push(StreamItem::Frame(KissFrame { command, payload }));
    }

    fn push_text(&mut self, b: u8, out: &mut Vec<StreamItem>) {
        if b == b'\n' {
            self.flush_text(out);
            return;
        }
        self.text.push(b);
        if self.text.len() >= MAX_TEXT_LINE {
            self.flush_text(out);
        }
    }

    fn flush_text(&mut self, out: &mut Vec<StreamItem>) {
        let line = String::from_utf8_lossy(&self.text)
            .trim_end_matches('\r')
            .to_string();
        self.text.clear();
        if !line.is_empty() {
            out.push(StreamItem::Text(line));
        }
    }
}

impl Default for KissDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(items: &[StreamItem]) -> Vec<KissFrame> {
        items
            .iter()
            .filter_map(|item| match item {
                StreamItem::Frame(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_escape_roundtrip_with_special_bytes() {
        let payload = vec![0x00, FEND, 0x01, FESC, FESC, FEND, TFEND, TFESC, 0xFF];
        let wire = encode_frame(0x12, &payload);

        // No raw delimiters inside the body
        assert!(!wire[1..wire.len() - 1].contains(&FEND));

        let mut decoder = KissDecoder::new();
        let items = decoder.decode(&wire);
        assert_eq!(items, vec![StreamItem::Frame(KissFrame::new(0x12, payload))]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_byte_at_a_time_matches_bulk() {
        let mut wire = encode_frame(0x10, b"abc\xC0def").to_vec();
        wire.extend_from_slice(&encode_frame(0x13, &[]));

        let mut bulk = KissDecoder::new();
        let expected = bulk.decode(&wire);
        assert_eq!(frames(&expected).len(), 2);

        let mut slow = KissDecoder::new();
        let mut collected = Vec::new();
        for b in &wire {
            collected.extend(slow.decode(std::slice::from_ref(b)));
        }
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_truncated_frame_then_valid_frame() {
        let mut wire = vec![FEND, 0x12, 0x00, 0x05, b'p', b'a'];
        let valid = encode_frame(0x13, &[]);
        wire.extend_from_slice(&valid);

        let mut decoder = KissDecoder::new();
        let items = decoder.decode(&wire);
        let got = frames(&items);
        assert_eq!(got.last(), Some(&KissFrame::new(0x13, Bytes::new())));
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let wire = encode_frame(0x12, b"0123456789");
        let mut decoder = KissDecoder::new();
        assert!(decoder.decode(&wire[..6]).is_empty());
        assert!(decoder.pending() > 0);
        let items = decoder.decode(&wire[6..]);
        assert_eq!(
            items,
            vec![StreamItem::Frame(KissFrame::new(0x12, &b"0123456789"[..]))]
        );
    }

    #[test]
    fn test_shared_delimiter_and_empty_frames() {
        let wire = [FEND, FEND, 0x15, 0x00, 0x01, FEND, 0x13, FEND, FEND];
        let mut decoder = KissDecoder::new();
        let got = frames(&decoder.decode(&wire));
        assert_eq!(
            got,
            vec![
                KissFrame::new(0x15, vec![0x00, 0x01]),
                KissFrame::new(0x13, Bytes::new())
            ]
        );
    }

    #[test]
    fn test_invalid_escape_resyncs() {
        let mut wire = vec![FEND, 0x12, FESC, 0x41, 0x42, FEND];
        wire.extend_from_slice(&encode_frame(0x14, &[0x00, 0x02]));

        let mut decoder = KissDecoder::new();
        let items = decoder.decode(&wire);
        assert_eq!(
            items[0],
            StreamItem::Error(FrameError::InvalidEscape(0x41))
        );
        assert_eq!(frames(&items), vec![KissFrame::new(0x14, vec![0x00, 0x02])]);
    }

    #[test]
    fn test_oversize_frame_is_reported_and_skipped() {
        let mut decoder = KissDecoder::with_max_frame_size(8);
        let mut wire = encode_frame(0x12, &[0x01; 32]).to_vec();
        wire.extend_from_slice(&encode_frame(0x15, &[0x00, 0x09]));

        let items = decoder.decode(&wire);
        assert_eq!(items[0], StreamItem::Error(FrameError::Oversize(8)));
        assert_eq!(frames(&items), vec![KissFrame::new(0x15, vec![0x00, 0x09])]);
    }

    #[test]
    fn test_text_lines_between_frames() {
        let mut wire = b"[boot] radio ready\r\n".to_vec();
        wire.extend_from_slice(&encode_frame(0x14, &[0x00, 0x03]));
        wire.extend_from_slice(b"tx done\n");

        let mut decoder = KissDecoder::new();
        let items = decoder.decode(&wire);
        assert_eq!(
            items,
            vec![
                StreamItem::Text("[boot] radio ready".into()),
                StreamItem::Frame(KissFrame::new(0x14, vec![0x00, 0x03])),
                StreamItem::Text("tx done".into()),
            ]
        );
        assert!(decoder.is_idle());
    }
}
