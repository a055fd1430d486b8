//! RPC wire protocol
//!
//! Every request and response is one frame, bincode payload plus CRC32:
//!
//! ```text
//! [message_type:1][length:4][payload:N][crc32:4]
//! ```

use crate::{Error, Result};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted from the wire
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame overhead: type(1) + length(4) + crc(4)
const FRAME_OVERHEAD: usize = 9;

/// Status code for an applied `AppendEntry`
pub const APPEND_OK: i32 = 0;

/// RPC message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMessageType {
    /// Append request
    AppendEntry = 0x01,
    /// Append response
    AppendResult = 0x02,
    /// Last contiguous id request
    GetLastContiguousId = 0x10,
    /// Last contiguous id response
    LastContiguousId = 0x11,
    /// Health check request
    Heartbeat = 0x20,
    /// Health check response
    HeartbeatStatus = 0x21,
    /// Error response
    Error = 0xFF,
}

impl TryFrom<u8> for RpcMessageType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::AppendEntry),
            0x02 => Ok(Self::AppendResult),
            0x10 => Ok(Self::GetLastContiguousId),
            0x11 => Ok(Self::LastContiguousId),
            0x20 => Ok(Self::Heartbeat),
            0x21 => Ok(Self::HeartbeatStatus),
            0xFF => Ok(Self::Error),
            _ => Err(Error::protocol(format!("Unknown message type: {}", value))),
        }
    }
}

/// Serving state reported by a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServingStatus {
    /// Service is up and applying entries
    Serving,
    /// Service is up but not accepting work
    NotServing,
}

/// RPC messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcMessage {
    /// Apply an entry (idempotent)
    AppendEntry { id: u64, text: String },

    /// Result of an append, 0 on success
    AppendResult { result: i32 },

    /// Ask for the highest contiguous id
    GetLastContiguousId,

    /// Highest contiguous id held by the responder
    LastContiguousId { id: u64 },

    /// Liveness probe
    Heartbeat { service_name: String },

    /// Liveness probe answer
    HeartbeatStatus { status: ServingStatus },

    /// Error answer
    Error { code: u32, message: String },
}

impl RpcMessage {
    /// Get message type
    pub fn message_type(&self) -> RpcMessageType {
        match self {
            Self::AppendEntry { .. } => RpcMessageType::AppendEntry,
            Self::AppendResult { .. } => RpcMessageType::AppendResult,
            Self::GetLastContiguousId => RpcMessageType::GetLastContiguousId,
            Self::LastContiguousId { .. } => RpcMessageType::LastContiguousId,
            Self::Heartbeat { .. } => RpcMessageType::Heartbeat,
            Self::HeartbeatStatus { .. } => RpcMessageType::HeartbeatStatus,
            Self::Error { .. } => RpcMessageType::Error,
        }
    }

    /// Encode message to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| Error::protocol(format!("Serialization failed: {}", e)))?;
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(Error::protocol(format!(
                "Payload of {} bytes exceeds frame limit",
                payload.len()
            )));
        }

        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
        buf.push(self.message_type() as u8);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);

        // CRC32 of type + length + payload
        let mut hasher = Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        Ok(buf)
    }

    /// Decode message from a complete frame
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_OVERHEAD {
            return Err(Error::protocol("Message too short"));
        }

        let crc_offset = buf.len() - 4;
        let stored_crc = read_u32(&buf[crc_offset..]);

        let mut hasher = Hasher::new();
        hasher.update(&buf[..crc_offset]);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(Error::protocol(format!(
                "CRC mismatch: expected {:x}, got {:x}",
                stored_crc, computed_crc
            )));
        }

        let length = read_u32(&buf[1..5]) as usize;
        if buf.len() != 5 + length + 4 {
            return Err(Error::protocol("Frame length does not match header"));
        }

        let msg_type = RpcMessageType::try_from(buf[0])?;
        let message: RpcMessage = bincode::deserialize(&buf[5..5 + length])
            .map_err(|e| Error::protocol(format!("Deserialization failed: {}", e)))?;

        if message.message_type() != msg_type {
            return Err(Error::protocol("Header type does not match payload"));
        }
        Ok(message)
    }

    /// Write message to async stream
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read message from async stream
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        // Read header: type(1) + length(4)
        let mut header = [0u8; 5];
        reader.read_exact(&mut header).await?;

        let length = read_u32(&header[1..5]) as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(Error::protocol(format!(
                "Frame of {} bytes exceeds limit",
                length
            )));
        }

        // Read payload + CRC
        let mut full_buf = vec![0u8; 5 + length + 4];
        full_buf[..5].copy_from_slice(&header);
        reader.read_exact(&mut full_buf[5..]).await?;

        Self::decode(&full_buf)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_entry_frame() {
        let msg = RpcMessage::AppendEntry {
            id: 42,
            text: "hello".into(),
        };

        let encoded = msg.encode().unwrap();
        assert_eq!(encoded[0], RpcMessageType::AppendEntry as u8);
        assert_eq!(RpcMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_crc_validation() {
        let msg = RpcMessage::LastContiguousId { id: 123 };
        let mut encoded = msg.encode().unwrap();

        // Corrupt the payload
        encoded[5] ^= 0xFF;

        let result = RpcMessage::decode(&encoded);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("CRC"));
    }

    #[test]
    fn test_short_and_truncated_frames() {
        assert!(RpcMessage::decode(&[0x01, 0, 0]).is_err());

        let encoded = RpcMessage::GetLastContiguousId.encode().unwrap();
        assert!(RpcMessage::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(RpcMessageType::try_from(0x42).is_err());
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let request = RpcMessage::Heartbeat {
            service_name: "replog".into(),
        };
        request.write_to(&mut client).await.unwrap();
        RpcMessage::HeartbeatStatus {
            status: ServingStatus::Serving,
        }
        .write_to(&mut client)
        .await
        .unwrap();

        assert_eq!(RpcMessage::read_from(&mut server).await.unwrap(), request);
        assert_eq!(
            RpcMessage::read_from(&mut server).await.unwrap(),
            RpcMessage::HeartbeatStatus {
                status: ServingStatus::Serving
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = vec![RpcMessageType::AppendEntry as u8];
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        client.write_all(&header).await.unwrap();

        let err = RpcMessage::read_from(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }
}
