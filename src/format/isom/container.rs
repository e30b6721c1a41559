//! Contract of the ISOBMFF container parsing library.
//!
//! The reader never parses boxes itself. It drives a [`ContainerLibrary`] that
//! opens containers progressively and a [`Container`] handle that resolves
//! samples, tracks, references and protection info. Track numbers are 1-based
//! indices in the open container; 0 means "no track".

use crate::error::ContainerError;
use bytes::Bytes;

pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// Byte range of the source to read, `end == 0` meaning "up to the end".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub const FULL: ByteRange = ByteRange { start: 0, end: 0 };

    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

/// Classification of a locator against the currently open container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeProbe {
    /// Not an ISOBMFF resource the reader can switch to.
    Unsupported,
    /// A movie of the same type that needs a restart.
    NewMovieMinor,
    /// A genuinely new initialization segment.
    NewMovieMajor,
    /// A media segment continuing the open movie.
    Fragment,
}

/// Media handler type of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Visual,
    Text,
    Scene,
    Ocr,
    Other(u32),
}

/// Track reference kinds the reader follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// `sbas`: scalable base track.
    Base,
    /// `scal`: scalable layer dependency.
    Scalable,
}

/// Layering of a visual track's codec configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecLayering {
    AvcOnly,
    AvcScalable,
    HevcOnly,
    HevcLayered,
    Other,
}

impl CodecLayering {
    pub fn is_hevc_family(&self) -> bool {
        matches!(self, CodecLayering::HevcOnly | CodecLayering::HevcLayered)
    }
}

/// Sample search mode for movie-time lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Closest sample at or before the time.
    Backward,
    /// Closest sync sample at or before the time.
    SyncBackward,
}

/// NAL unit rewrite mode applied by the library when extracting samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NaluExtractMode(u32);

impl NaluExtractMode {
    pub const NONE: NaluExtractMode = NaluExtractMode(0);
    /// Insert parameter sets in-band in the samples.
    pub const INBAND_PS: NaluExtractMode = NaluExtractMode(1);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// Flags for opening a media segment into an open movie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentFlags {
    pub no_order_check: bool,
}

/// Per-sample encryption parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleEncryption {
    pub is_encrypted: bool,
    pub skip_byte_block: u8,
    pub crypt_byte_block: u8,
    /// 0 when the track uses a constant IV.
    pub iv_size: u8,
    pub constant_iv: Bytes,
    /// Sample auxiliary information.
    pub sai: Bytes,
}

/// A sample resolved by the library. Timestamps are in media timescale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub data: Bytes,
    pub dts: u64,
    /// Composition offset relative to `dts`.
    pub cts_offset: i32,
    pub is_rap: bool,
    pub encryption: Option<SampleEncryption>,
}

impl Sample {
    pub fn cts(&self) -> i64 {
        self.dts as i64 + self.cts_offset as i64
    }
}

/// Result of a movie-time lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLocation {
    pub sample_number: u32,
    pub description_index: u32,
    pub data_offset: u64,
}

/// Protection scheme parameters of a protected sample description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionInfo {
    pub scheme_type: u32,
    pub scheme_version: u32,
    pub scheme_uri: Option<String>,
    pub kms_uri: Option<String>,
}

/// One protection-system-specific header declared in the movie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PsshInfo {
    pub system_id: [u8; 16],
    pub key_ids: Vec<[u8; 16]>,
    pub private_data: Bytes,
}

/// Opens containers and classifies locators.
pub trait ContainerLibrary {
    type Container: Container;

    /// Opens `url` progressively over `range`.
    ///
    /// Returns `ContainerError::Incomplete` when the initial metadata is not
    /// fully available yet.
    fn open_progressive(&mut self, url: &str, range: ByteRange)
        -> ContainerResult<Self::Container>;

    fn probe_file_range(&self, url: &str, range: ByteRange) -> RangeProbe;
}

/// An open container. Dropping the handle closes it.
pub trait Container {
    fn is_fragmented(&self) -> bool;
    fn is_smooth_streaming(&self) -> bool;
    fn timescale(&self) -> u32;

    fn track_count(&self) -> u32;
    /// Track ID of a track number, 0 if the track does not exist.
    fn track_id(&self, track: u32) -> u32;
    /// Track number of a track ID.
    fn track_by_id(&self, track_id: u32) -> Option<u32>;
    fn media_type(&self, track: u32) -> MediaType;
    fn media_timescale(&self, track: u32) -> u32;
    fn media_duration(&self, track: u32) -> u64;
    fn sample_count(&self, track: u32) -> u32;
    fn sample_duration(&self, track: u32, sample_number: u32) -> u32;
    fn has_edit_list(&self, track: u32) -> bool;
    /// True when the track carries a sync sample table (not every sample is a RAP).
    fn has_sync_points(&self, track: u32) -> bool;
    fn codec_layering(&self, track: u32) -> CodecLayering;

    /// Image items declared in the file.
    fn image_items(&self) -> Vec<u32>;

    fn reference_count(&self, track: u32, kind: ReferenceKind) -> ContainerResult<u32>;
    /// 1-based reference index; returns the referenced track number.
    fn reference(&self, track: u32, kind: ReferenceKind, index: u32) -> Option<u32>;
    /// Index of `ref_track_id` in the reference list of `track`, 0 if absent.
    fn has_track_reference(&self, track: u32, kind: ReferenceKind, ref_track_id: u32) -> u32;
    fn needs_layer_reconstruction(&self) -> bool;
    fn set_nalu_extract_mode(&mut self, track: u32, mode: NaluExtractMode) -> ContainerResult<()>;

    fn is_track_encrypted(&self, track: u32) -> bool;
    fn ismacryp_info(&self, track: u32, description_index: u32) -> Option<ProtectionInfo>;
    fn omadrm_info(&self, track: u32, description_index: u32) -> Option<ProtectionInfo>;
    fn cenc_info(&self, track: u32, description_index: u32) -> Option<ProtectionInfo>;
    fn pssh_count(&self) -> u32;
    /// 1-based PSSH index, in declaration order.
    fn pssh(&self, index: u32) -> Option<PsshInfo>;

    /// Decode time of the last fragment seen on `track`.
    fn current_tfdt(&self, track: u32) -> u64;
    fn open_segment(&mut self, url: &str, range: ByteRange, flags: SegmentFlags)
        -> ContainerResult<()>;
    fn release_segment(&mut self, reset_tables: bool);
    fn reset_fragment_info(&mut self, keep_sample_count: bool);
    /// Parses newly available fragment bytes. Returns the number of bytes still missing.
    fn refresh_fragmented(&mut self) -> ContainerResult<u64>;
    fn reset_sequence_numbers(&mut self);
    fn set_byte_offset(&mut self, offset: u64);

    fn sample(&mut self, track: u32, sample_number: u32) -> ContainerResult<Sample>;
    fn item_sample(&mut self, item_id: u32) -> ContainerResult<Sample>;
    fn sample_for_movie_time(&mut self, track: u32, time: u64, mode: SearchMode)
        -> ContainerResult<SampleLocation>;
}
