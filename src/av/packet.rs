use bytes::Bytes;

/// IV signalling of an encrypted packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IvInfo {
    /// Every sample uses the same IV, carried here.
    Constant(Bytes),
    /// Per-sample IVs of this size live in the auxiliary info buffer.
    PerSample { iv_size: u8 },
}

/// Common-encryption parameters attached to a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEncryption {
    /// Number of 16-byte blocks left in the clear in each pattern cycle.
    pub skip_byte_block: u8,
    /// Number of 16-byte blocks encrypted in each pattern cycle.
    pub crypt_byte_block: u8,
    pub iv: IvInfo,
    /// Sample auxiliary information (IVs and subsample map).
    pub sai: Bytes,
}

/// One access unit of an elementary stream, timestamped in the stream's
/// media timescale.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub stream_index: usize,
    pub is_key: bool,
    /// Duration in media timescale units.
    pub duration: Option<u32>,
    /// Decode-only sample preceding the requested seek position.
    pub seek_flag: bool,
    pub encryption: Option<PacketEncryption>,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            stream_index: 0,
            is_key: false,
            duration: None,
            seek_flag: false,
            encryption: None,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_duration(mut self, duration: u32) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_seek_flag(mut self, seek_flag: bool) -> Self {
        self.seek_flag = seek_flag;
        self
    }

    pub fn with_encryption(mut self, encryption: PacketEncryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }
}
