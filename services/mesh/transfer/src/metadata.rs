//! File metadata header carried in front of file transfer data.
//!
//! ```text
//! +-------------+---------------------------------+------+
//! | len (u16BE) | "key=value\n" lines, UTF-8      | data |
//! +-------------+---------------------------------+------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Descriptive fields of a transferred file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Name the sender gave the file
    pub filename: String,
    /// Size of the file data in bytes
    pub size: u64,
    /// Content type, if known
    pub mime_type: Option<String>,
}

impl FileMetadata {
    /// Metadata for `filename` of `size` bytes
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
            mime_type: None,
        }
    }

    /// Set the content type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Encoded header length including the length prefix
    pub fn encoded_len(&self) -> usize {
        2 + self.lines().len()
    }

    fn lines(&self) -> String {
        let mut text = format!("filename={}\nsize={}\n", clean(&self.filename), self.size);
        if let Some(mime) = &self.mime_type {
            text.push_str(&format!("mime_type={}\n", clean(mime)));
        }
        text
    }

    /// Prepend this header to `data`
    pub fn wrap(&self, data: &[u8]) -> Result<Bytes, TransferError> {
        let lines = self.lines();
        let len = u16::try_from(lines.len())
            .map_err(|_| TransferError::Metadata("header too long"))?;
        let mut buf = BytesMut::with_capacity(2 + lines.len() + data.len());
        buf.put_u16(len);
        buf.put_slice(lines.as_bytes());
        buf.put_slice(data);
        Ok(buf.freeze())
    }

    /// Split reassembled transfer data into its header and file data
    pub fn parse(mut data: Bytes) -> Result<(FileMetadata, Bytes), TransferError> {
        if data.len() < 2 {
            return Err(TransferError::Metadata("missing length"));
        }
        let len = data.get_u16() as usize;
        if len == 0 || data.len() < len {
            return Err(TransferError::Metadata("length out of range"));
        }
        let header = data.split_to(len);
        let text =
            std::str::from_utf8(&header).map_err(|_| TransferError::Metadata("invalid UTF-8"))?;

        let mut meta = FileMetadata::default();
        for line in text.split('\n') {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "filename" => meta.filename = value.to_string(),
                "size" => {
                    meta.size = value
                        .parse()
                        .map_err(|_| TransferError::Metadata("invalid size"))?
                }
                "mime_type" => meta.mime_type = Some(value.to_string()),
                _ => {}
            }
        }
        Ok((meta, data))
    }
}

fn clean(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}
