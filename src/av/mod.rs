use bytes::Bytes;

/// Kind of elementary stream exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Audio,
    Visual,
    Text,
    Scene,
    Ocr,
    Unknown,
    /// Protected stream; the payload type once decrypted.
    Encrypted(BaseStreamType),
}

/// Stream types a protected stream can decrypt to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseStreamType {
    Audio,
    Visual,
    Text,
    Scene,
    Ocr,
    Unknown,
}

impl StreamType {
    /// Wraps this stream type as the original type of a protected stream.
    pub fn encrypted(self) -> StreamType {
        let base = match self {
            StreamType::Audio => BaseStreamType::Audio,
            StreamType::Visual => BaseStreamType::Visual,
            StreamType::Text => BaseStreamType::Text,
            StreamType::Scene => BaseStreamType::Scene,
            StreamType::Ocr => BaseStreamType::Ocr,
            StreamType::Unknown => BaseStreamType::Unknown,
            StreamType::Encrypted(base) => base,
        };
        StreamType::Encrypted(base)
    }
}

/// Identifier of an output stream, allocated by the host.
pub type StreamId = usize;

/// Stream-level description emitted when a channel is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDeclaration {
    pub track_id: u32,
    /// Image item ID for still-image channels, 0 otherwise.
    pub item_id: u32,
    pub stream_type: StreamType,
    pub timescale: u32,
    /// Media duration in `timescale` units.
    pub duration: u64,
}

/// Stream-level metadata updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamProperty {
    StreamType(StreamType),
    ProtectionSchemeType(u32),
    ProtectionSchemeVersion(u32),
    ProtectionSchemeUri(String),
    ProtectionKmsUri(String),
    /// Serialized protection-system init data (see `format::isom::crypt`).
    CencPssh(Bytes),
}

/// Output side of the host: stream declarations and packet delivery.
pub trait PacketSink {
    /// Creates an output stream and returns its identifier.
    fn declare_stream(&mut self, declaration: StreamDeclaration) -> StreamId;

    fn set_property(&mut self, stream: StreamId, property: StreamProperty);

    /// Returns true while the stream cannot accept more packets.
    fn would_block(&self, stream: StreamId) -> bool;

    fn send_packet(&mut self, stream: StreamId, packet: Packet);

    fn set_eos(&mut self, stream: StreamId);
}

/// Input side of the host: the byte source the container is read from.
pub trait ByteSource {
    /// Drops the next pending input packet. Returns false when none is pending.
    fn drop_packet(&mut self) -> bool;

    /// Returns true once the source delivered its last byte.
    fn is_eos(&self) -> bool;

    /// Asks the source to restart delivery at `offset`.
    fn seek(&mut self, offset: u64);
}

/// A host implementing both sides of the pipeline.
pub trait FilterHost: PacketSink + ByteSource {}

impl<T: PacketSink + ByteSource> FilterHost for T {}

mod packet;
pub use packet::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_stream_type_keeps_original() {
        assert_eq!(
            StreamType::Visual.encrypted(),
            StreamType::Encrypted(BaseStreamType::Visual)
        );
        assert_eq!(
            StreamType::Audio.encrypted().encrypted(),
            StreamType::Encrypted(BaseStreamType::Audio)
        );
    }

    #[test]
    fn test_packet_builder() {
        let packet = Packet::new(Bytes::from_static(b"au"))
            .with_dts(10)
            .with_pts(12)
            .with_stream_index(3)
            .with_key_flag(true)
            .with_duration(2);
        assert_eq!(packet.dts, Some(10));
        assert_eq!(packet.pts, Some(12));
        assert_eq!(packet.stream_index, 3);
        assert!(packet.is_key);
        assert!(!packet.is_encrypted());
    }
}
