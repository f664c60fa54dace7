// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for the supervisor control socket.
//!
//! Each frame on the Unix socket has the following layout:
//! - 4 bytes: payload length (big-endian)
//! - 2 bytes: message type
//! - N bytes: JSON payload

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::pipe::PipeMessage;

/// Maximum frame size (1 MB). Control messages are tiny; anything larger
/// is a corrupted stream.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame header size (4 bytes length + 2 bytes type)
pub const HEADER_SIZE: usize = 6;

/// Message types for the control socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Manager → supervisor: state change or heartbeat
    StateReport = 1,
    /// Supervisor → manager: commanded stop mode
    Command = 2,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(MessageType::StateReport),
            2 => Ok(MessageType::Command),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A framed message with type and payload
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a state-report frame
    pub fn state_report(msg: &PipeMessage) -> Result<Self, FrameError> {
        Self::new(MessageType::StateReport, msg)
    }

    /// Create a command frame
    pub fn command(msg: &PipeMessage) -> Result<Self, FrameError> {
        Self::new(MessageType::Command, msg)
    }

    /// Create a new frame with the given type and payload value
    pub fn new<M: Serialize>(message_type: MessageType, msg: &M) -> Result<Self, FrameError> {
        let payload = serde_json::to_vec(msg)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type,
            payload: Bytes::from(payload),
        })
    }

    /// Decode the payload as JSON
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, FrameError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Encode the frame to bytes for wire transmission
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.message_type as u16);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decode a frame from bytes
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame header",
            )));
        }

        let length = bytes.get_u32() as usize;
        let message_type = MessageType::try_from(bytes.get_u16())?;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }

        if bytes.len() < length {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame payload",
            )));
        }

        let payload = bytes.split_to(length);
        Ok(Self {
            message_type,
            payload,
        })
    }
}

/// Write a frame to an async writer
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode();
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Read a frame from an async reader
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    // Read header
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let message_type = MessageType::try_from(u16::from_be_bytes([header[4], header[5]]))?;

    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    // Read payload
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        message_type,
        payload: Bytes::from(payload),
    })
}

/// Framed codec for encoding/decoding frames on a stream
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Read the next frame from the stream
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.stream).await
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    /// Write a frame to the stream
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        write_frame(&mut self.stream, frame).await
    }

    /// Encode and send a state report
    pub async fn send_report(&mut self, msg: &PipeMessage) -> Result<(), FrameError> {
        let frame = Frame::state_report(msg)?;
        self.write_frame(&frame).await
    }

    /// Encode and send a command
    pub async fn send_command(&mut self, msg: &PipeMessage) -> Result<(), FrameError> {
        let frame = Frame::command(msg)?;
        self.write_frame(&frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::ManagerState;

    fn sample_report() -> PipeMessage {
        PipeMessage::new(101, ManagerState::Running, "pool up")
    }

    #[test]
    fn test_message_type_round_trip() {
        for &mt in &[MessageType::StateReport, MessageType::Command] {
            let value = mt as u16;
            let decoded = MessageType::try_from(value).unwrap();
            assert_eq!(mt, decoded);
        }
    }

    #[test]
    fn test_frame_encode_decode() {
        let frame = Frame::state_report(&sample_report()).unwrap();
        let encoded = frame.encode();
        let decoded = Frame::decode_from_bytes(encoded).unwrap();

        assert_eq!(frame.message_type, decoded.message_type);
        assert_eq!(frame.payload, decoded.payload);
    }

    // ========== Constants Tests ==========

    #[test]
    fn test_header_size_constant() {
        // HEADER_SIZE is 6 bytes: 4 bytes length + 2 bytes type
        assert_eq!(HEADER_SIZE, 6);
    }

    // ========== MessageType Tests ==========

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::StateReport as u16, 1);
        assert_eq!(MessageType::Command as u16, 2);
    }

    #[test]
    fn test_message_type_invalid_conversion() {
        assert!(MessageType::try_from(0u16).is_err());
        assert!(MessageType::try_from(3u16).is_err());
        assert!(MessageType::try_from(u16::MAX).is_err());
    }

    // ========== FrameError Tests ==========

    #[test]
    fn test_frame_error_display_frame_too_large() {
        let err = FrameError::FrameTooLarge(100_000_000);
        let msg = format!("{}", err);
        assert!(msg.contains("frame too large"));
        assert!(msg.contains("100000000"));
        assert!(msg.contains(&MAX_FRAME_SIZE.to_string()));
    }

    #[test]
    fn test_frame_error_display_invalid_message_type() {
        let err = FrameError::InvalidMessageType(42);
        let msg = format!("{}", err);
        assert!(msg.contains("invalid message type"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_frame_error_display_connection_closed() {
        let err = FrameError::ConnectionClosed;
        let msg = format!("{}", err);
        assert!(msg.contains("connection closed"));
    }

    #[test]
    fn test_frame_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let frame_err: FrameError = io_err.into();
        match frame_err {
            FrameError::Io(_) => {}
            _ => panic!("Expected FrameError::Io"),
        }
    }

    // ========== Frame Creation Tests ==========

    #[test]
    fn test_frame_state_report_creation() {
        let frame = Frame::state_report(&sample_report()).unwrap();
        assert_eq!(frame.message_type, MessageType::StateReport);
    }

    #[test]
    fn test_frame_command_creation() {
        let cmd = PipeMessage::new(1, ManagerState::SupervisorStop, "shutting down");
        let frame = Frame::command(&cmd).unwrap();
        assert_eq!(frame.message_type, MessageType::Command);
    }

    #[test]
    fn test_frame_decode_payload() {
        let original = PipeMessage::new(77, ManagerState::ErrorStop, "backend corrupted");
        let frame = Frame::state_report(&original).unwrap();
        let decoded: PipeMessage = frame.decode().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_frame_decode_rejects_wrong_shape() {
        let frame = Frame::new(MessageType::Command, &serde_json::json!([1, 2, 3])).unwrap();
        let decoded: Result<PipeMessage, _> = frame.decode();
        assert!(matches!(decoded, Err(FrameError::Decode(_))));
    }

    // ========== Frame Encoding Tests ==========

    #[test]
    fn test_frame_encode_structure() {
        let frame = Frame::state_report(&sample_report()).unwrap();
        let encoded = frame.encode();

        // Check header: 4 bytes length + 2 bytes type
        assert!(encoded.len() >= HEADER_SIZE);

        // First 4 bytes should be the payload length (big-endian)
        let length = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(length, frame.payload.len());

        // Bytes 4-5 should be the message type
        let msg_type = u16::from_be_bytes([encoded[4], encoded[5]]);
        assert_eq!(msg_type, MessageType::StateReport as u16);

        // Total length should be header + payload
        assert_eq!(encoded.len(), HEADER_SIZE + frame.payload.len());
    }

    // ========== decode_from_bytes Tests ==========

    #[test]
    fn test_decode_from_bytes_incomplete_header() {
        let bytes = Bytes::from_static(&[0, 0, 0]); // Only 3 bytes, need 6
        let result = Frame::decode_from_bytes(bytes);
        assert!(result.is_err());
        match result.unwrap_err() {
            FrameError::Io(e) => {
                assert!(e.to_string().contains("incomplete frame header"));
            }
            _ => panic!("Expected Io error with incomplete header message"),
        }
    }

    #[test]
    fn test_decode_from_bytes_incomplete_payload() {
        // Header says 100 bytes payload, but we only have 10
        let mut bytes = BytesMut::new();
        bytes.put_u32(100); // length = 100
        bytes.put_u16(1); // type = StateReport
        bytes.put(&[0u8; 10][..]); // Only 10 bytes of payload

        let result = Frame::decode_from_bytes(bytes.freeze());
        assert!(result.is_err());
        match result.unwrap_err() {
            FrameError::Io(e) => {
                assert!(e.to_string().contains("incomplete frame payload"));
            }
            _ => panic!("Expected Io error with incomplete payload message"),
        }
    }

    #[test]
    fn test_decode_from_bytes_invalid_message_type() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(0); // length = 0
        bytes.put_u16(99); // invalid type

        let result = Frame::decode_from_bytes(bytes.freeze());
        assert!(result.is_err());
        match result.unwrap_err() {
            FrameError::InvalidMessageType(99) => {}
            _ => panic!("Expected InvalidMessageType error"),
        }
    }

    #[test]
    fn test_decode_from_bytes_frame_too_large() {
        let mut bytes = BytesMut::new();
        bytes.put_u32((MAX_FRAME_SIZE + 1) as u32); // Too large
        bytes.put_u16(1); // type = StateReport

        let result = Frame::decode_from_bytes(bytes.freeze());
        assert!(result.is_err());
        match result.unwrap_err() {
            FrameError::FrameTooLarge(size) => {
                assert_eq!(size, MAX_FRAME_SIZE + 1);
            }
            _ => panic!("Expected FrameTooLarge error"),
        }
    }

    #[test]
    fn test_decode_from_bytes_with_extra_data() {
        // Create a valid frame followed by extra data
        let mut bytes = BytesMut::new();
        bytes.put_u32(5); // length = 5
        bytes.put_u16(2); // type = Command
        bytes.put(&[1, 2, 3, 4, 5][..]); // 5 bytes payload
        bytes.put(&[99, 99, 99][..]); // Extra data (should be ignored)

        let result = Frame::decode_from_bytes(bytes.freeze());
        assert!(result.is_ok());
        let frame = result.unwrap();
        assert_eq!(frame.message_type, MessageType::Command);
        assert_eq!(&frame.payload[..], &[1, 2, 3, 4, 5]);
    }

    // ========== Async read/write frame tests ==========

    #[tokio::test]
    async fn test_read_write_frame() {
        use tokio::io::duplex;

        let frame = Frame::state_report(&sample_report()).unwrap();

        // Create a duplex stream (in-memory bidirectional)
        let (mut writer, mut reader) = duplex(1024);

        // Write frame
        write_frame(&mut writer, &frame).await.unwrap();

        // Read frame back
        let read_back = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.message_type, read_back.message_type);
        assert_eq!(frame.payload, read_back.payload);
    }

    #[tokio::test]
    async fn test_read_frame_connection_closed() {
        use tokio::io::duplex;

        let (_, mut reader) = duplex(1024);
        // Writer is dropped, reader will get EOF

        let result = read_frame(&mut reader).await;
        assert!(result.is_err());
        match result.unwrap_err() {
            FrameError::ConnectionClosed => {}
            e => panic!("Expected ConnectionClosed, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_write_read_multiple_frames() {
        use tokio::io::duplex;

        let (mut writer, mut reader) = duplex(4096);

        let report = Frame::state_report(&sample_report()).unwrap();
        let command = Frame::command(&PipeMessage::new(
            1,
            ManagerState::SupervisorStop,
            "stop all",
        ))
        .unwrap();

        write_frame(&mut writer, &report).await.unwrap();
        write_frame(&mut writer, &command).await.unwrap();
        drop(writer); // Signal EOF

        // Read back
        let read1 = read_frame(&mut reader).await.unwrap();
        let read2 = read_frame(&mut reader).await.unwrap();

        assert_eq!(read1.message_type, MessageType::StateReport);
        assert_eq!(read2.message_type, MessageType::Command);
    }

    // ========== FramedStream Tests ==========

    #[test]
    fn test_framed_stream_into_inner() {
        let data = "test data".to_string();
        let framed = FramedStream::new(data.clone());
        let inner = framed.into_inner();
        assert_eq!(inner, data);
    }

    #[tokio::test]
    async fn test_framed_stream_send_report() {
        use tokio::io::duplex;

        let (writer, reader) = duplex(1024);
        let mut writer_framed = FramedStream::new(writer);
        let mut reader_framed = FramedStream::new(reader);

        writer_framed.send_report(&sample_report()).await.unwrap();
        drop(writer_framed); // Drop to signal EOF on the writing end

        let frame = reader_framed.read_frame().await.unwrap();
        assert_eq!(frame.message_type, MessageType::StateReport);
        let msg: PipeMessage = frame.decode().unwrap();
        assert_eq!(msg, sample_report());
    }

    #[tokio::test]
    async fn test_framed_stream_send_command() {
        use tokio::io::duplex;

        let (writer, reader) = duplex(1024);
        let mut writer_framed = FramedStream::new(writer);
        let mut reader_framed = FramedStream::new(reader);

        let cmd = PipeMessage::new(9, ManagerState::UserRestart, "restart requested");
        writer_framed.send_command(&cmd).await.unwrap();

        let frame = reader_framed.read_frame().await.unwrap();
        assert_eq!(frame.message_type, MessageType::Command);
        let msg: PipeMessage = frame.decode().unwrap();
        assert_eq!(msg.state, ManagerState::UserRestart);
    }
}
