//! Device side of the serial file protocol.
//!
//! A desktop client talks to the node over a byte stream carrying KISS
//! frames (see [`mesh_wire::kiss`]). Uploads follow
//! `FILE_INFO? FILE_START (FILE_CHUNK)* FILE_END`; every step is answered
//! so the client can pace itself. Files that arrive over the mesh are pushed
//! back as `FILE_RECEIVED (FILE_DATA)* FILE_COMPLETE`.

use bytes::Bytes;
use mesh_transfer::{FileMetadata, TransferError};
use mesh_wire::{
    Address, ControlMessage, FileOffer, KissDecoder, StreamItem, TransferId, FILE_DATA_CHUNK,
};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{Node, NodeError, NodeEvent};

#[derive(Debug)]
struct Upload {
    id: TransferId,
    offer: FileOffer,
    bytes: u64,
}

/// What one call to [`SerialBridge::receive`] produced
#[derive(Debug, Default)]
pub struct SerialOutput {
    /// Encoded bytes to write back to the client
    pub replies: Vec<Bytes>,
    /// Human-readable lines the client sent between frames
    pub lines: Vec<String>,
    /// Commands that were rejected
    pub errors: Vec<NodeError>,
}

impl SerialOutput {
    fn reply(&mut self, message: ControlMessage) {
        self.replies.push(message.encode());
    }

    fn text(&mut self, line: String) {
        let mut raw = line.into_bytes();
        raw.push(b'\n');
        self.replies.push(Bytes::from(raw));
    }
}

/// Serial protocol state for one client
#[derive(Debug, Default)]
pub struct SerialBridge {
    decoder: KissDecoder,
    upload: Option<Upload>,
}

impl SerialBridge {
    /// Bridge with default frame limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfer id of the upload in progress
    pub fn upload(&self) -> Option<TransferId> {
        self.upload.as_ref().map(|u| u.id)
    }

    /// Feed bytes read from the client
    pub fn receive(&mut self, node: &mut Node, data: &[u8], now: Instant) -> SerialOutput {
        let mut out = SerialOutput::default();
        for item in self.decoder.decode(data) {
            match item {
                StreamItem::Frame(frame) => match ControlMessage::parse(&frame) {
                    Ok(message) => {
                        if let Err(e) = self.handle(node, message, now, &mut out) {
                            warn!(error = %e, "Serial command rejected");
                            out.errors.push(e);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Unparseable serial frame");
                        out.errors.push(e.into());
                    }
                },
                StreamItem::Text(line) => {
                    debug!(%line, "Serial text");
                    out.lines.push(line);
                }
                StreamItem::Error(e) => {
                    warn!(error = %e, "Serial framing error");
                    out.errors.push(e.into());
                }
            }
        }
        out
    }

    fn handle(
        &mut self,
        node: &mut Node,
        message: ControlMessage,
        now: Instant,
        out: &mut SerialOutput,
    ) -> Result<(), NodeError> {
        match message {
            ControlMessage::FileInfo(offer) => {
                let metadata = FileMetadata::new(offer.filename.as_str(), u64::from(offer.size));
                let count = node.fragments_for_file(&metadata, offer.size as usize);
                out.reply(ControlMessage::FileReady {
                    fragment_count: clamp_count(count),
                });
            }
            ControlMessage::FileStart(offer) => {
                self.forget_finished_upload(node);
                if let Some(upload) = &self.upload {
                    return Err(TransferError::DuplicateTransferStart(upload.id).into());
                }
                let metadata = FileMetadata::new(offer.filename.as_str(), u64::from(offer.size));
                let count = node.fragments_for_file(&metadata, offer.size as usize);
                let id = node.open_stream(offer.destination, Some(&metadata), now)?;
                info!(
                    transfer = %id,
                    dest = %offer.destination.short(),
                    filename = %offer.filename,
                    size = offer.size,
                    "Serial upload started"
                );
                self.upload = Some(Upload {
                    id,
                    offer,
                    bytes: 0,
                });
                out.reply(ControlMessage::FileReady {
                    fragment_count: clamp_count(count),
                });
            }
            ControlMessage::FileChunk { seq, data } => {
                let upload = self
                    .upload
                    .as_mut()
                    .ok_or(NodeError::Protocol("FILE_CHUNK without FILE_START"))?;
                if let Err(e) = node.append_stream(&upload.id, &data, now) {
                    let id = upload.id;
                    self.upload = None;
                    node.cancel_transfer(&id);
                    return Err(e);
                }
                upload.bytes += data.len() as u64;
                out.reply(ControlMessage::ChunkAck { seq });
            }
            ControlMessage::FileEnd => {
                let upload = self
                    .upload
                    .take()
                    .ok_or(NodeError::Protocol("FILE_END without FILE_START"))?;
                let fragments = node.finish_stream(&upload.id, now)?;
                if upload.bytes != u64::from(upload.offer.size) {
                    warn!(
                        transfer = %upload.id,
                        announced = upload.offer.size,
                        sent = upload.bytes,
                        "Upload size differs from FILE_START"
                    );
                }
                info!(transfer = %upload.id, fragments, "Serial upload finished");
                out.text(sent_line(&upload));
            }
            ControlMessage::FileReady { .. }
            | ControlMessage::ChunkAck { .. }
            | ControlMessage::FileReceived { .. }
            | ControlMessage::FileData { .. }
            | ControlMessage::FileComplete { .. } => {
                return Err(NodeError::Protocol("device-to-client command from client"));
            }
        }
        Ok(())
    }

    /// Clear an upload whose stream the node already expired or failed
    fn forget_finished_upload(&mut self, node: &Node) {
        let Some(upload) = &self.upload else {
            return;
        };
        if node.transfers().outbound(&upload.id).is_none() {
            info!(transfer = %upload.id, "Serial upload no longer active, discarding");
            self.upload = None;
        }
    }

    /// Drop the upload in progress, cancelling its transfer
    pub fn abort(&mut self, node: &mut Node) -> Option<TransferId> {
        let upload = self.upload.take()?;
        node.cancel_transfer(&upload.id);
        info!(transfer = %upload.id, "Serial upload aborted");
        Some(upload.id)
    }

    /// Frames that push a received file to the client; empty for other events
    pub fn file_frames(event: &NodeEvent) -> Vec<Bytes> {
        let NodeEvent::FileReceived {
            transfer_id,
            source,
            metadata,
            data,
        } = event
        else {
            return Vec::new();
        };

        let filename = metadata
            .as_ref()
            .map(|m| m.filename.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("transfer-{}", &transfer_id.to_string()[..8]));

        let mut frames = Vec::with_capacity(2 + data.len().div_ceil(FILE_DATA_CHUNK));
        frames.push(
            ControlMessage::FileReceived {
                transfer_id: *transfer_id,
                sender: source.unwrap_or(Address::UNKNOWN),
                filename,
                size: u32::try_from(data.len()).unwrap_or(u32::MAX),
            }
            .encode(),
        );
        for chunk in data.chunks(FILE_DATA_CHUNK) {
            frames.push(
                ControlMessage::FileData {
                    transfer_id: *transfer_id,
                    data: data.slice_ref(chunk),
                }
                .encode(),
            );
        }
        frames.push(
            ControlMessage::FileComplete {
                transfer_id: *transfer_id,
            }
            .encode(),
        );
        frames
    }
}

fn clamp_count(count: usize) -> u16 {
    u16::try_from(count).unwrap_or(u16::MAX)
}

fn sent_line(upload: &Upload) -> String {
    let dest = upload.offer.destination.to_string();
    let id = upload.id.to_string();
    format!(
        "FILESENT:{}:{}:{}",
        &dest[..16],
        &id[..8],
        upload.offer.filename
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_node, TestCrypto};
    use crate::NodeConfig;
    use mesh_wire::{KissFrame, StreamItem};
    use std::time::Duration;

    fn decode_all(chunks: &[Bytes]) -> Vec<ControlMessage> {
        let mut decoder = KissDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            for item in decoder.decode(chunk) {
                if let StreamItem::Frame(frame) = item {
                    out.push(ControlMessage::parse(&frame).unwrap());
                }
            }
        }
        out
    }

    fn offer(size: u32) -> FileOffer {
        FileOffer {
            destination: TestCrypto::new(9).identity_address(),
            filename: "a".into(),
            size,
        }
    }

    #[test]
    fn test_file_info_counts_header() {
        let (mut node, _rx) = test_node(1, NodeConfig::default());
        let mut bridge = SerialBridge::new();
        let now = Instant::now();

        // 22 header bytes + 378 data bytes = two full fragments
        let out = bridge.receive(&mut node, &ControlMessage::FileInfo(offer(378)).encode(), now);
        assert_eq!(
            decode_all(&out.replies),
            vec![ControlMessage::FileReady { fragment_count: 2 }]
        );

        let out = bridge.receive(&mut node, &ControlMessage::FileInfo(offer(379)).encode(), now);
        assert_eq!(
            decode_all(&out.replies),
            vec![ControlMessage::FileReady { fragment_count: 3 }]
        );
        assert!(bridge.upload().is_none());
    }

    #[test]
    fn test_upload_sequence() {
        let (mut node, _rx) = test_node(1, NodeConfig::default());
        let mut bridge = SerialBridge::new();
        let now = Instant::now();

        let out = bridge.receive(&mut node, &ControlMessage::FileStart(offer(3)).encode(), now);
        assert!(out.errors.is_empty());
        assert_eq!(
            decode_all(&out.replies),
            vec![ControlMessage::FileReady { fragment_count: 1 }]
        );
        let id = bridge.upload().unwrap();
        assert!(node.transfers().outbound(&id).unwrap().is_streaming());

        let chunk = ControlMessage::FileChunk {
            seq: 7,
            data: Bytes::from_static(b"abc"),
        };
        let out = bridge.receive(&mut node, &chunk.encode(), now);
        assert_eq!(
            decode_all(&out.replies),
            vec![ControlMessage::ChunkAck { seq: 7 }]
        );

        let out = bridge.receive(&mut node, &ControlMessage::FileEnd.encode(), now);
        assert!(out.errors.is_empty());
        assert_eq!(out.replies.len(), 1);
        let line = std::str::from_utf8(&out.replies[0]).unwrap();
        let dest = offer(3).destination.to_string();
        assert!(line.starts_with(&format!("FILESENT:{}:", &dest[..16])));
        assert!(line.ends_with(":a\n"));
        assert!(bridge.upload().is_none());
        assert_eq!(node.transfers().outbound(&id).unwrap().total(), Some(1));
    }

    #[test]
    fn test_second_start_rejected() {
        let (mut node, _rx) = test_node(1, NodeConfig::default());
        let mut bridge = SerialBridge::new();
        let now = Instant::now();

        bridge.receive(&mut node, &ControlMessage::FileStart(offer(3)).encode(), now);
        let first = bridge.upload().unwrap();

        let out = bridge.receive(&mut node, &ControlMessage::FileStart(offer(3)).encode(), now);
        assert!(out.replies.is_empty());
        assert!(matches!(
            out.errors.as_slice(),
            [NodeError::Transfer(TransferError::DuplicateTransferStart(id))] if *id == first
        ));
        assert_eq!(bridge.upload(), Some(first));
        assert_eq!(node.transfers().outbound_len(), 1);
    }

    #[test]
    fn test_start_after_stream_expired() {
        let (mut node, _rx) = test_node(1, NodeConfig::default());
        let mut bridge = SerialBridge::new();
        let now = Instant::now();

        bridge.receive(&mut node, &ControlMessage::FileStart(offer(3)).encode(), now);
        let stale = bridge.upload().unwrap();

        let later = now + Duration::from_secs(3600);
        node.tick(later);
        assert_eq!(node.transfers().outbound_len(), 0);

        let out = bridge.receive(&mut node, &ControlMessage::FileStart(offer(3)).encode(), later);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(
            decode_all(&out.replies),
            vec![ControlMessage::FileReady { fragment_count: 1 }]
        );
        let fresh = bridge.upload().unwrap();
        assert_ne!(fresh, stale);
        assert!(node.transfers().outbound(&fresh).is_some());
    }

    #[test]
    fn test_chunk_without_start() {
        let (mut node, _rx) = test_node(1, NodeConfig::default());
        let mut bridge = SerialBridge::new();
        let chunk = ControlMessage::FileChunk {
            seq: 1,
            data: Bytes::from_static(b"x"),
        };
        let out = bridge.receive(&mut node, &chunk.encode(), Instant::now());
        assert!(matches!(out.errors.as_slice(), [NodeError::Protocol(_)]));
    }

    #[test]
    fn test_text_and_unknown_commands() {
        let (mut node, _rx) = test_node(1, NodeConfig::default());
        let mut bridge = SerialBridge::new();
        let mut input = b"hello node\n".to_vec();
        input.extend_from_slice(&KissFrame::new(0x1F, Bytes::from_static(b"?")).encode());
        input.extend_from_slice(&ControlMessage::ChunkAck { seq: 1 }.encode());

        let out = bridge.receive(&mut node, &input, Instant::now());
        assert_eq!(out.lines, vec!["hello node".to_string()]);
        assert_eq!(out.errors.len(), 2);
        assert!(matches!(out.errors[0], NodeError::Frame(_)));
        assert!(matches!(out.errors[1], NodeError::Protocol(_)));
    }

    #[test]
    fn test_abort_cancels_transfer() {
        let (mut node, _rx) = test_node(1, NodeConfig::default());
        let mut bridge = SerialBridge::new();
        bridge.receive(
            &mut node,
            &ControlMessage::FileStart(offer(3)).encode(),
            Instant::now(),
        );
        let id = bridge.abort(&mut node).unwrap();
        assert!(node.transfers().outbound(&id).is_none());
        assert!(bridge.abort(&mut node).is_none());
    }

    #[test]
    fn test_file_frames() {
        let id = TransferId([4; 16]);
        let event = NodeEvent::FileReceived {
            transfer_id: id,
            source: None,
            metadata: Some(FileMetadata::new("log.txt", 600)),
            data: Bytes::from(vec![1u8; 600]),
        };
        let messages = decode_all(&SerialBridge::file_frames(&event));
        assert_eq!(messages.len(), 5);
        assert_eq!(
            messages[0],
            ControlMessage::FileReceived {
                transfer_id: id,
                sender: Address::UNKNOWN,
                filename: "log.txt".into(),
                size: 600,
            }
        );
        let sizes: Vec<_> = messages[1..4]
            .iter()
            .map(|m| match m {
                ControlMessage::FileData { data, .. } => data.len(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![250, 250, 100]);
        assert_eq!(messages[4], ControlMessage::FileComplete { transfer_id: id });

        let other = NodeEvent::TransferCancelled { transfer_id: id };
        assert!(SerialBridge::file_frames(&other).is_empty());
    }
}
