//! Control and file-transfer commands carried in serial frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::address::{Address, ADDRESS_SIZE};
use crate::fragment::{TransferId, TRANSFER_ID_SIZE};
use crate::kiss::KissFrame;
use crate::FrameError;

/// Chunk size used when streaming a received file back to the client
pub const FILE_DATA_CHUNK: usize = 250;

/// Command discriminators
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Client asks how many fragments a file will take
    FileInfo = 0x10,
    /// Client starts an upload
    FileStart = 0x11,
    /// Client sends a chunk of the upload
    FileChunk = 0x12,
    /// Client closes the upload
    FileEnd = 0x13,
    /// Device is ready, with the fragment count
    FileReady = 0x14,
    /// Device accepted a chunk
    ChunkAck = 0x15,
    /// Device received a file from the mesh
    FileReceived = 0x16,
    /// Chunk of a received file
    FileData = 0x17,
    /// Received file fully streamed
    FileComplete = 0x18,
}

impl Command {
    /// Name used in errors and logs
    pub fn name(self) -> &'static str {
        match self {
            Command::FileInfo => "FILE_INFO",
            Command::FileStart => "FILE_START",
            Command::FileChunk => "FILE_CHUNK",
            Command::FileEnd => "FILE_END",
            Command::FileReady => "FILE_READY",
            Command::ChunkAck => "CHUNK_ACK",
            Command::FileReceived => "FILE_RECEIVED",
            Command::FileData => "FILE_DATA",
            Command::FileComplete => "FILE_COMPLETE",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Command::FileInfo),
            0x11 => Ok(Command::FileStart),
            0x12 => Ok(Command::FileChunk),
            0x13 => Ok(Command::FileEnd),
            0x14 => Ok(Command::FileReady),
            0x15 => Ok(Command::ChunkAck),
            0x16 => Ok(Command::FileReceived),
            0x17 => Ok(Command::FileData),
            0x18 => Ok(Command::FileComplete),
            _ => Err(crate::WireError::Type(value)),
        }
    }
}

/// Destination, name and size of an outgoing file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    /// Recipient
    pub destination: Address,
    /// File name (at most 255 bytes of UTF-8)
    pub filename: String,
    /// Size in bytes
    pub size: u32,
}

/// Typed control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// `dest | name_len | name | size`
    FileInfo(FileOffer),
    /// Same layout as FILE_INFO
    FileStart(FileOffer),
    /// `seq | data`
    FileChunk {
        /// Client sequence number
        seq: u16,
        /// Chunk bytes
        data: Bytes,
    },
    /// Empty
    FileEnd,
    /// `fragment_count`
    FileReady {
        /// Fragments the transfer will use
        fragment_count: u16,
    },
    /// `seq`
    ChunkAck {
        /// Acknowledged sequence number
        seq: u16,
    },
    /// `transfer_id | sender | name_len | name | size`
    FileReceived {
        /// Transfer that delivered the file
        transfer_id: TransferId,
        /// Verified sender, or [`Address::UNKNOWN`]
        sender: Address,
        /// File name
        filename: String,
        /// Size in bytes
        size: u32,
    },
    /// `transfer_id | data`
    FileData {
        /// Owning transfer
        transfer_id: TransferId,
        /// Chunk bytes
        data: Bytes,
    },
    /// `transfer_id`
    FileComplete {
        /// Finished transfer
        transfer_id: TransferId,
    },
}

impl ControlMessage {
    /// Command byte for this message
    pub fn command(&self) -> Command {
        match self {
            ControlMessage::FileInfo(_) => Command::FileInfo,
            ControlMessage::FileStart(_) => Command::FileStart,
            ControlMessage::FileChunk { .. } => Command::FileChunk,
            ControlMessage::FileEnd => Command::FileEnd,
            ControlMessage::FileReady { .. } => Command::FileReady,
            ControlMessage::ChunkAck { .. } => Command::ChunkAck,
            ControlMessage::FileReceived { .. } => Command::FileReceived,
            ControlMessage::FileData { .. } => Command::FileData,
            ControlMessage::FileComplete { .. } => Command::FileComplete,
        }
    }

    /// Interpret a decoded frame
    pub fn parse(frame: &KissFrame) -> Result<Self, FrameError> {
        let command = Command::try_from(frame.command).map_err(|_| FrameError::UnknownCommand {
            command: frame.command,
            payload: frame.payload.to_vec(),
        })?;
        let bad = |reason| FrameError::BadPayload {
            command: command.name(),
            reason,
        };
        let mut p = frame.payload.clone();

        let msg = match command {
            Command::FileInfo | Command::FileStart => {
                let destination = take_address(&mut p).ok_or_else(|| bad("short address"))?;
                let filename = take_name(&mut p).ok_or_else(|| bad("bad filename"))?;
                if p.remaining() != 4 {
                    return Err(bad("bad size field"));
                }
                let offer = FileOffer {
                    destination,
                    filename,
                    size: p.get_u32(),
                };
                if command == Command::FileInfo {
                    ControlMessage::FileInfo(offer)
                } else {
                    ControlMessage::FileStart(offer)
                }
            }
            Command::FileChunk => {
                if p.remaining() < 2 {
                    return Err(bad("missing sequence"));
                }
                let seq = p.get_u16();
                ControlMessage::FileChunk { seq, data: p }
            }
            Command::FileEnd => ControlMessage::FileEnd,
            Command::FileReady => {
                if p.remaining() != 2 {
                    return Err(bad("expected u16"));
                }
                ControlMessage::FileReady {
                    fragment_count: p.get_u16(),
                }
            }
            Command::ChunkAck => {
                if p.remaining() != 2 {
                    return Err(bad("expected u16"));
                }
                ControlMessage::ChunkAck { seq: p.get_u16() }
            }
            Command::FileReceived => {
                let transfer_id = take_transfer_id(&mut p).ok_or_else(|| bad("short id"))?;
                let sender = take_address(&mut p).ok_or_else(|| bad("short address"))?;
                let filename = take_name(&mut p).ok_or_else(|| bad("bad filename"))?;
                if p.remaining() != 4 {
                    return Err(bad("bad size field"));
                }
                ControlMessage::FileReceived {
                    transfer_id,
                    sender,
                    filename,
                    size: p.get_u32(),
                }
            }
            Command::FileData => {
                let transfer_id = take_transfer_id(&mut p).ok_or_else(|| bad("short id"))?;
                ControlMessage::FileData { transfer_id, data: p }
            }
            Command::FileComplete => {
                let transfer_id = take_transfer_id(&mut p).ok_or_else(|| bad("short id"))?;
                ControlMessage::FileComplete { transfer_id }
            }
        };
        Ok(msg)
    }

    /// Build the frame for this message
    pub fn to_frame(&self) -> KissFrame {
        let mut buf = BytesMut::new();
        match self {
            ControlMessage::FileInfo(offer) | ControlMessage::FileStart(offer) => {
                buf.put_slice(offer.destination.as_bytes());
                put_name(&mut buf, &offer.filename);
                buf.put_u32(offer.size);
            }
            ControlMessage::FileChunk { seq, data } => {
                buf.put_u16(*seq);
                buf.put_slice(data);
            }
            ControlMessage::FileEnd => {}
            ControlMessage::FileReady { fragment_count } => buf.put_u16(*fragment_count),
            ControlMessage::ChunkAck { seq } => buf.put_u16(*seq),
            ControlMessage::FileReceived {
                transfer_id,
                sender,
                filename,
                size,
            } => {
                buf.put_slice(&transfer_id.0);
                buf.put_slice(sender.as_bytes());
                put_name(&mut buf, filename);
                buf.put_u32(*size);
            }
            ControlMessage::FileData { transfer_id, data } => {
                buf.put_slice(&transfer_id.0);
                buf.put_slice(data);
            }
            ControlMessage::FileComplete { transfer_id } => buf.put_slice(&transfer_id.0),
        }
        KissFrame::new(self.command() as u8, buf.freeze())
    }

    /// Encode straight to escaped wire bytes
    pub fn encode(&self) -> Bytes {
        self.to_frame().encode()
    }
}

fn take_address(p: &mut Bytes) -> Option<Address> {
    if p.remaining() < ADDRESS_SIZE {
        return None;
    }
    let mut bytes = [0u8; ADDRESS_SIZE];
    p.copy_to_slice(&mut bytes);
    Some(Address(bytes))
}

fn take_transfer_id(p: &mut Bytes) -> Option<TransferId> {
    if p.remaining() < TRANSFER_ID_SIZE {
        return None;
    }
    let mut bytes = [0u8; TRANSFER_ID_SIZE];
    p.copy_to_slice(&mut bytes);
    Some(TransferId(bytes))
}

fn take_name(p: &mut Bytes) -> Option<String> {
    if p.remaining() < 1 {
        return None;
    }
    let len = p.get_u8() as usize;
    if p.remaining() < len {
        return None;
    }
    let raw = p.split_to(len);
    String::from_utf8(raw.to_vec()).ok()
}

fn put_name(buf: &mut BytesMut, name: &str) {
    let mut end = name.len().min(u8::MAX as usize);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_u8(end as u8);
    buf.put_slice(&name.as_bytes()[..end]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kiss::{KissDecoder, StreamItem};

    #[test]
    fn test_file_start_layout() {
        let msg = ControlMessage::FileStart(FileOffer {
            destination: Address([0xAA; 16]),
            filename: "notes.txt".into(),
            size: 450,
        });
        let frame = msg.to_frame();
        assert_eq!(frame.command, 0x11);
        assert_eq!(frame.payload.len(), 16 + 1 + 9 + 4);
        assert_eq!(frame.payload[16], 9);
        assert_eq!(&frame.payload[26..], &[0, 0, 0x01, 0xC2]);
        assert_eq!(ControlMessage::parse(&frame).unwrap(), msg);
    }

    #[test]
    fn test_messages_survive_framing() {
        let id = TransferId([0xC0; 16]);
        let messages = vec![
            ControlMessage::FileChunk {
                seq: 0xC0DB,
                data: Bytes::from_static(&[0xC0, 0xDB, 0x00]),
            },
            ControlMessage::FileEnd,
            ControlMessage::FileReady { fragment_count: 3 },
            ControlMessage::ChunkAck { seq: 7 },
            ControlMessage::FileReceived {
                transfer_id: id,
                sender: Address::UNKNOWN,
                filename: "a.bin".into(),
                size: 12,
            },
            ControlMessage::FileData {
                transfer_id: id,
                data: Bytes::from_static(b"payload"),
            },
            ControlMessage::FileComplete { transfer_id: id },
        ];

        let mut wire = Vec::new();
        for msg in &messages {
            wire.extend_from_slice(&msg.encode());
        }

        let mut decoder = KissDecoder::new();
        let parsed: Vec<_> = decoder
            .decode(&wire)
            .into_iter()
            .map(|item| match item {
                StreamItem::Frame(frame) => ControlMessage::parse(&frame).unwrap(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(parsed, messages);
    }

    #[test]
    fn test_unknown_command_is_surfaced() {
        let frame = KissFrame::new(0x01, vec![1, 2, 3]);
        assert_eq!(
            ControlMessage::parse(&frame),
            Err(FrameError::UnknownCommand {
                command: 0x01,
                payload: vec![1, 2, 3]
            })
        );
    }

    #[test]
    fn test_bad_payloads() {
        assert!(matches!(
            ControlMessage::parse(&KissFrame::new(0x11, vec![0u8; 10])),
            Err(FrameError::BadPayload { command: "FILE_START", .. })
        ));
        assert!(ControlMessage::parse(&KissFrame::new(0x12, vec![0u8; 1])).is_err());
        assert!(ControlMessage::parse(&KissFrame::new(0x14, vec![0u8; 3])).is_err());
        assert!(ControlMessage::parse(&KissFrame::new(0x18, vec![0u8; 15])).is_err());
    }

    #[test]
    fn test_long_filename_is_clipped_on_char_boundary() {
        let name = "é".repeat(200);
        let msg = ControlMessage::FileInfo(FileOffer {
            destination: Address::UNKNOWN,
            filename: name,
            size: 1,
        });
        let frame = msg.to_frame();
        assert_eq!(frame.payload[16], 254);
        match ControlMessage::parse(&frame).unwrap() {
            ControlMessage::FileInfo(offer) => assert_eq!(offer.filename.chars().count(), 127),
            other => panic!("unexpected {other:?}"),
        }
    }
}
