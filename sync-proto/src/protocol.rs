//! Wire protocol between sync clients and the server.
//!
//! Every message travels in a length-prefixed frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)| payload (length bytes)    |
//! +----------------+---------------------------+
//! ```
//!
//! The first payload byte is the message tag:
//!
//! | Tag  | Direction | Payload |
//! |------|-----------|---------|
//! | 0x01 | C→S | optional UTF-8 version (empty = latest) |
//! | 0x02 | C→S | UTF-8 source path |
//! | 0x11 | S→C | manifest JSON, `{}` when none |
//! | 0x04 | S→C | `len: i64`, `name: u32-prefixed`, then an error message (`len == -1`) or `len` body bytes |
//!
//! File bodies follow their header as untagged frames; the receiver counts
//! bytes until `len` have arrived, however the sender chose to chunk them.

use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Message tags (first payload byte).
pub mod tag {
    pub const REQUEST_MANIFEST: u8 = 0x01;
    pub const REQUEST_FILE: u8 = 0x02;
    pub const FILE_REPLY: u8 = 0x04;
    pub const MANIFEST_REPLY: u8 = 0x11;
}

/// Largest frame either side accepts (16 MB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Body chunk size used when streaming files.
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// File length announcing an in-band error instead of a body.
pub const ERROR_LENGTH: i64 = -1;

pub const FILE_NOT_IN_LIST: &str = "File not found in list";
pub const FILE_NOT_ON_SERVER: &str = "File not found in server";
pub const MANIFEST_UNAVAILABLE: &str = "Failed to read manifest";

/// Length-prefix framing shared by both codecs.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `None` asks for the latest manifest.
    Manifest { version: Option<String> },
    File { source_path: String },
}

impl Request {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Request::Manifest { version } => {
                buf.put_u8(tag::REQUEST_MANIFEST);
                if let Some(version) = version {
                    buf.put_slice(version.as_bytes());
                }
            }
            Request::File { source_path } => {
                buf.put_u8(tag::REQUEST_FILE);
                buf.put_slice(source_path.as_bytes());
            }
        }
        buf.freeze()
    }

    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        match frame.get_u8() {
            tag::REQUEST_MANIFEST => {
                let version = utf8(frame, "manifest version")?;
                Ok(Request::Manifest {
                    version: (!version.is_empty()).then_some(version),
                })
            }
            tag::REQUEST_FILE => Ok(Request::File {
                source_path: utf8(frame, "source path")?,
            }),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// Server → client messages, as seen by the client decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Raw manifest JSON (`{}` when absent).
    Manifest(String),
    /// A file body of `length` bytes follows as [`Reply::FileChunk`]s.
    FileHeader { name: String, length: u64 },
    FileError { name: String, message: String },
    /// Part of the current file body; `remaining == 0` marks the last one.
    FileChunk { data: Bytes, remaining: u64 },
}

/// Payload of a manifest reply frame.
pub fn manifest_reply(body: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(tag::MANIFEST_REPLY);
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

/// Payload of a file reply header announcing `length` body bytes.
pub fn file_header(name: &str, length: u64) -> Result<Bytes> {
    let length = i64::try_from(length).map_err(|_| ProtocolError::FieldTooLarge(usize::MAX))?;
    let mut buf = BytesMut::with_capacity(1 + 8 + 4 + name.len());
    buf.put_u8(tag::FILE_REPLY);
    buf.put_i64(length);
    put_string(&mut buf, name)?;
    Ok(buf.freeze())
}

/// Payload of a file reply carrying an error instead of a body.
pub fn file_error(name: &str, message: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(1 + 8 + 8 + name.len() + message.len());
    buf.put_u8(tag::FILE_REPLY);
    buf.put_i64(ERROR_LENGTH);
    put_string(&mut buf, name)?;
    put_string(&mut buf, message)?;
    Ok(buf.freeze())
}

/// Client side: encodes [`Request`]s, decodes [`Reply`]s.
///
/// Tracks how much of the current file body is still expected, so body
/// frames are never mistaken for tagged messages.
pub struct ClientCodec {
    frames: LengthDelimitedCodec,
    body_remaining: u64,
    pending_chunk: Option<Bytes>,
}

impl ClientCodec {
    pub fn new() -> Self {
        Self {
            frames: frame_codec(),
            body_remaining: 0,
            pending_chunk: None,
        }
    }

    /// Bytes of the current file body not yet received.
    pub fn body_remaining(&self) -> u64 {
        self.body_remaining
    }

    fn consume_body(&mut self, received: usize) -> Result<u64> {
        let received = received as u64;
        if received > self.body_remaining {
            return Err(ProtocolError::BodyOverrun {
                received,
                remaining: self.body_remaining,
            });
        }
        self.body_remaining -= received;
        Ok(self.body_remaining)
    }

    fn decode_head(&mut self, mut frame: Bytes) -> Result<Reply> {
        if frame.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        match frame.get_u8() {
            tag::MANIFEST_REPLY => Ok(Reply::Manifest(utf8(frame, "manifest body")?)),
            tag::FILE_REPLY => {
                let length = get_i64(&mut frame, "file length")?;
                let name = get_string(&mut frame, "file name")?;

                if length == ERROR_LENGTH {
                    let message = get_string(&mut frame, "error message")?;
                    return Ok(Reply::FileError { name, message });
                }
                if length < 0 {
                    return Err(ProtocolError::InvalidLength(length));
                }

                self.body_remaining = length as u64;
                // Body bytes may share the header frame
                if !frame.is_empty() {
                    self.consume_body(frame.len())?;
                    self.pending_chunk = Some(frame);
                }
                Ok(Reply::FileHeader {
                    name,
                    length: length as u64,
                })
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ClientCodec {
    type Item = Reply;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Reply>> {
        if let Some(data) = self.pending_chunk.take() {
            return Ok(Some(Reply::FileChunk {
                data,
                remaining: self.body_remaining,
            }));
        }

        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        let frame = frame.freeze();

        if self.body_remaining > 0 {
            let remaining = self.consume_body(frame.len())?;
            return Ok(Some(Reply::FileChunk {
                data: frame,
                remaining,
            }));
        }

        self.decode_head(frame).map(Some)
    }
}

impl Encoder<Request> for ClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<()> {
        self.frames.encode(item.encode(), dst)?;
        Ok(())
    }
}

/// Server side: decodes [`Request`]s, frames outgoing payloads.
pub struct ServerCodec {
    frames: LengthDelimitedCodec,
}

impl ServerCodec {
    pub fn new() -> Self {
        Self {
            frames: frame_codec(),
        }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ServerCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>> {
        match self.frames.decode(src)? {
            Some(frame) => Request::decode(frame.freeze()).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Bytes> for ServerCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.frames.encode(item, dst)?;
        Ok(())
    }
}

fn utf8(bytes: Bytes, field: &'static str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLarge(value.len()))?;
    buf.put_u32(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_i64(buf: &mut Bytes, field: &'static str) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(ProtocolError::Truncated(field));
    }
    Ok(buf.get_i64())
}

fn get_string(buf: &mut Bytes, field: &'static str) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated(field));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated(field));
    }
    utf8(buf.split_to(len), field)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame `payload` the way the server writes it.
    fn server_frame(payload: Bytes, dst: &mut BytesMut) {
        ServerCodec::new().encode(payload, dst).unwrap();
    }

    #[test]
    fn test_request_file_round_trip() {
        let mut wire = BytesMut::new();
        ClientCodec::new()
            .encode(
                Request::File {
                    source_path: "mods/a.jar".to_string(),
                },
                &mut wire,
            )
            .unwrap();

        // 4-byte big-endian length, then tag + path
        assert_eq!(&wire[..4], &[0, 0, 0, 11]);
        assert_eq!(wire[4], tag::REQUEST_FILE);

        let decoded = ServerCodec::new().decode(&mut wire).unwrap();
        assert_eq!(
            decoded,
            Some(Request::File {
                source_path: "mods/a.jar".to_string()
            })
        );
        assert!(wire.is_empty());
    }

    #[test]
    fn test_manifest_request_empty_means_latest() {
        let frame = Request::Manifest { version: None }.encode();
        assert_eq!(frame.as_ref(), &[tag::REQUEST_MANIFEST]);
        assert_eq!(
            Request::decode(frame).unwrap(),
            Request::Manifest { version: None }
        );

        let named = Request::Manifest {
            version: Some("1.0".to_string()),
        };
        assert_eq!(Request::decode(named.encode()).unwrap(), named);
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut wire = BytesMut::new();
        ClientCodec::new()
            .encode(
                Request::File {
                    source_path: "config/x.toml".to_string(),
                },
                &mut wire,
            )
            .unwrap();

        let mut partial = wire.split_to(wire.len() - 3);
        let mut codec = ServerCodec::new();
        assert_eq!(codec.decode(&mut partial).unwrap(), None);

        partial.unsplit(wire);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_zero_byte_file_reply() {
        let header = file_header("empty.txt", 0).unwrap();
        // tag, then L = 0
        assert_eq!(&header[1..9], &0i64.to_be_bytes());

        let mut wire = BytesMut::new();
        server_frame(header, &mut wire);

        let mut codec = ClientCodec::new();
        assert_eq!(
            codec.decode(&mut wire).unwrap(),
            Some(Reply::FileHeader {
                name: "empty.txt".to_string(),
                length: 0
            })
        );
        assert_eq!(codec.decode(&mut wire).unwrap(), None);
        assert_eq!(codec.body_remaining(), 0);
    }

    #[test]
    fn test_body_split_across_frames() {
        let mut wire = BytesMut::new();
        server_frame(file_header("a.txt", 10).unwrap(), &mut wire);
        server_frame(Bytes::from_static(b"0123"), &mut wire);
        server_frame(Bytes::from_static(b"456789"), &mut wire);
        server_frame(manifest_reply("{}"), &mut wire);

        let mut codec = ClientCodec::new();
        assert!(matches!(
            codec.decode(&mut wire).unwrap(),
            Some(Reply::FileHeader { length: 10, .. })
        ));
        assert_eq!(
            codec.decode(&mut wire).unwrap(),
            Some(Reply::FileChunk {
                data: Bytes::from_static(b"0123"),
                remaining: 6
            })
        );
        assert_eq!(
            codec.decode(&mut wire).unwrap(),
            Some(Reply::FileChunk {
                data: Bytes::from_static(b"456789"),
                remaining: 0
            })
        );
        // Back to tagged messages once the body is complete
        assert_eq!(
            codec.decode(&mut wire).unwrap(),
            Some(Reply::Manifest("{}".to_string()))
        );
    }

    #[test]
    fn test_body_may_share_header_frame() {
        let mut payload = BytesMut::from(file_header("a.txt", 5).unwrap().as_ref());
        payload.put_slice(b"ab");

        let mut wire = BytesMut::new();
        server_frame(payload.freeze(), &mut wire);
        server_frame(Bytes::from_static(b"cde"), &mut wire);

        let mut codec = ClientCodec::new();
        assert!(matches!(
            codec.decode(&mut wire).unwrap(),
            Some(Reply::FileHeader { length: 5, .. })
        ));
        assert_eq!(
            codec.decode(&mut wire).unwrap(),
            Some(Reply::FileChunk {
                data: Bytes::from_static(b"ab"),
                remaining: 3
            })
        );
        assert_eq!(
            codec.decode(&mut wire).unwrap(),
            Some(Reply::FileChunk {
                data: Bytes::from_static(b"cde"),
                remaining: 0
            })
        );
    }

    #[test]
    fn test_body_overrun_is_rejected() {
        let mut wire = BytesMut::new();
        server_frame(file_header("a.txt", 2).unwrap(), &mut wire);
        server_frame(Bytes::from_static(b"abc"), &mut wire);

        let mut codec = ClientCodec::new();
        codec.decode(&mut wire).unwrap();
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::BodyOverrun { received: 3, remaining: 2 })
        ));
    }

    #[test]
    fn test_error_reply() {
        let mut wire = BytesMut::new();
        server_frame(file_error("x.jar", FILE_NOT_IN_LIST).unwrap(), &mut wire);

        assert_eq!(&wire[5..13], &ERROR_LENGTH.to_be_bytes());
        assert_eq!(
            ClientCodec::new().decode(&mut wire).unwrap(),
            Some(Reply::FileError {
                name: "x.jar".to_string(),
                message: FILE_NOT_IN_LIST.to_string()
            })
        );
    }

    #[test]
    fn test_invalid_messages() {
        let mut codec = ClientCodec::new();

        let mut wire = BytesMut::new();
        server_frame(Bytes::from_static(&[0x7f]), &mut wire);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::UnknownTag(0x7f))
        ));

        let mut wire = BytesMut::new();
        server_frame(Bytes::from_static(&[tag::FILE_REPLY, 0, 0]), &mut wire);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::Truncated("file length"))
        ));

        let mut negative = BytesMut::new();
        negative.put_u8(tag::FILE_REPLY);
        negative.put_i64(-5);
        negative.put_u32(0);
        let mut wire = BytesMut::new();
        server_frame(negative.freeze(), &mut wire);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::InvalidLength(-5))
        ));

        assert!(matches!(
            Request::decode(Bytes::new()),
            Err(ProtocolError::EmptyFrame)
        ));
        assert!(matches!(
            Request::decode(Bytes::from_static(&[tag::REQUEST_FILE, 0xff, 0xfe])),
            Err(ProtocolError::InvalidUtf8(_))
        ));
    }
}
