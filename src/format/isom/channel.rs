use super::container::{
    CodecLayering, Container, MediaType, NaluExtractMode, ReferenceKind, Sample, SearchMode,
};
use super::crypt::{collect_pssh, encode_pssh, probe_protection, ProtectionScheme};
use crate::av::{
    IvInfo, Packet, PacketEncryption, PacketSink, StreamDeclaration, StreamId, StreamProperty,
    StreamType,
};
use crate::error::{ContainerError, DemuxError};
use bytes::Bytes;
use log::{debug, error, warn};

/// Timescale of still-image item channels.
const ITEM_TIMESCALE: u32 = 1000;

/// Playback state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    /// End of stream was signaled downstream.
    EosSignaled,
}

/// Outcome of the last sample fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    EndOfStream,
    /// More bytes are needed before the next sample can be read.
    Incomplete,
    Error(ContainerError),
}

/// Extraction state of one elementary stream of the open container.
#[derive(Debug)]
pub struct Channel {
    stream: StreamId,
    stream_type: StreamType,
    track: u32,
    track_id: u32,
    /// Scalable base track, 0 when the track is not layered.
    base_track: u32,
    /// Pending layer switch, 0 when none.
    next_track: u32,
    item_id: u32,
    timescale: u32,
    duration: u64,
    /// Number of the last sample read, 0 before the first one.
    sample_number: u32,
    start: u64,
    end: u64,
    speed: f64,
    play_state: PlayState,
    to_init: bool,
    has_edit_list: bool,
    has_rap: bool,
    seek_disabled: bool,
    /// Set when the track could not be resolved after a movie switch.
    suspended: bool,
    nalu_extract_mode: NaluExtractMode,
    is_encrypted: bool,
    is_cenc: bool,
    scheme: Option<ProtectionScheme>,
    scheme_type: u32,
    scheme_version: u32,
    kms_uri: Option<String>,
    constant_iv: Bytes,
    iv_size: u8,
    sai_buffer: Bytes,
    seek_flag: bool,
    last_state: FetchStatus,
}

impl Channel {
    /// Creates the channel of `track` (or image `item_id`) and declares its stream.
    pub(crate) fn create<C, S>(container: &mut C, sink: &mut S, track: u32, item_id: u32) -> Self
    where
        C: Container + ?Sized,
        S: PacketSink + ?Sized,
    {
        let media_type = if item_id != 0 {
            MediaType::Visual
        } else {
            container.media_type(track)
        };

        let mut base_track = 0;
        let mut nalu_extract_mode = NaluExtractMode::NONE;
        if media_type == MediaType::Visual && track != 0 {
            base_track = container.reference(track, ReferenceKind::Base, 1).unwrap_or(0);
            // AVC base with an HEVC enhancement is not reassembled through the base
            if base_track != 0
                && container.codec_layering(base_track) == CodecLayering::AvcOnly
                && container.codec_layering(track).is_hevc_family()
            {
                base_track = 0;
            }
            nalu_extract_mode = NaluExtractMode::INBAND_PS;
        }

        let is_encrypted = track != 0 && container.is_track_encrypted(track);
        let mut stream_type = stream_type_of(media_type);
        if is_encrypted {
            stream_type = stream_type.encrypted();
        }

        let (timescale, duration) = if track != 0 {
            (container.media_timescale(track), container.media_duration(track))
        } else {
            (ITEM_TIMESCALE, 0)
        };

        let stream = sink.declare_stream(StreamDeclaration {
            track_id: container.track_id(track),
            item_id,
            stream_type,
            timescale,
            duration,
        });

        let mut channel = Channel {
            stream,
            stream_type,
            track,
            track_id: container.track_id(track),
            base_track,
            next_track: 0,
            item_id,
            timescale,
            duration,
            sample_number: 0,
            start: 0,
            end: 0,
            speed: 1.0,
            play_state: PlayState::Stopped,
            to_init: true,
            has_edit_list: track != 0 && container.has_edit_list(track),
            has_rap: track != 0 && container.has_sync_points(track),
            seek_disabled: false,
            suspended: false,
            nalu_extract_mode,
            is_encrypted,
            is_cenc: false,
            scheme: None,
            scheme_type: 0,
            scheme_version: 0,
            kms_uri: None,
            constant_iv: Bytes::new(),
            iv_size: 0,
            sai_buffer: Bytes::new(),
            seek_flag: false,
            last_state: FetchStatus::Ok,
        };

        if is_encrypted {
            channel.set_crypt_config(container, sink);
        }
        channel.apply_extract_mode(container, channel.track);
        channel
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    pub fn track(&self) -> u32 {
        self.track
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn base_track(&self) -> u32 {
        self.base_track
    }

    pub fn next_track(&self) -> u32 {
        self.next_track
    }

    pub fn item_id(&self) -> u32 {
        self.item_id
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn sample_number(&self) -> u32 {
        self.sample_number
    }

    /// Playback window in media timescale units.
    pub fn window(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn last_state(&self) -> &FetchStatus {
        &self.last_state
    }

    pub fn has_edit_list(&self) -> bool {
        self.has_edit_list
    }

    pub fn has_random_access_points(&self) -> bool {
        self.has_rap
    }

    pub fn seek_disabled(&self) -> bool {
        self.seek_disabled
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted
    }

    pub fn is_cenc(&self) -> bool {
        self.is_cenc
    }

    pub fn protection_scheme(&self) -> Option<ProtectionScheme> {
        self.scheme
    }

    /// Scheme type and version forwarded for the protected stream.
    pub fn scheme(&self) -> (u32, u32) {
        (self.scheme_type, self.scheme_version)
    }

    pub fn kms_uri(&self) -> Option<&str> {
        self.kms_uri.as_deref()
    }

    /// Auxiliary info of the last encrypted sample.
    pub fn sai_buffer(&self) -> &Bytes {
        &self.sai_buffer
    }

    pub fn nalu_extract_mode(&self) -> NaluExtractMode {
        self.nalu_extract_mode
    }

    pub fn set_seek_disabled(&mut self, disabled: bool) {
        self.seek_disabled = disabled;
    }

    /// Search mode used to position the cursor on a start time.
    pub fn search_mode(&self) -> SearchMode {
        if self.seek_disabled {
            SearchMode::Backward
        } else {
            SearchMode::SyncBackward
        }
    }

    pub(crate) fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    pub(crate) fn set_next_track(&mut self, next_track: u32) {
        self.next_track = next_track;
    }

    pub(crate) fn set_play_state(&mut self, state: PlayState) {
        self.play_state = state;
    }

    pub(crate) fn set_last_state(&mut self, state: FetchStatus) {
        self.last_state = state;
    }

    pub(crate) fn reset_cursor(&mut self) {
        self.sample_number = 0;
    }

    /// Drops all extraction progress; the next fetch starts from the playback window.
    pub(crate) fn reset(&mut self) {
        self.sample_number = 0;
        self.to_init = true;
        self.seek_flag = false;
        self.last_state = FetchStatus::Ok;
        self.play_state = PlayState::Stopped;
        self.sai_buffer = Bytes::new();
    }

    /// Sets the playback window from a play request expressed in seconds.
    pub(crate) fn play(&mut self, start_range: f64, end_range: f64, speed: f64) {
        self.reset();
        self.speed = speed;
        self.start = 0;
        self.end = 0;
        let timescale = self.timescale as f64;
        if speed > 0.0 {
            if start_range >= 0.0 {
                self.start = (start_range * timescale) as u64;
            }
            if end_range >= start_range {
                self.end = (end_range * timescale) as u64;
            }
        } else if speed < 0.0 {
            let end = if end_range == -1.0 { 0.0 } else { end_range };
            self.start = (start_range * timescale) as i64 as u64;
            if end <= start_range {
                self.end = (end * timescale) as i64 as u64;
            }
        }
        self.play_state = PlayState::Playing;
        debug!(
            "[IsoMedia] Starting channel playback {} to {} ({} to {})",
            self.start, self.end, start_range, end_range
        );
    }

    /// Re-binds the channel to `track` of a freshly opened container.
    pub(crate) fn rebind(&mut self, track: u32, track_id: u32) {
        self.track = track;
        self.track_id = track_id;
        self.suspended = track == 0 && self.item_id == 0;
    }

    /// Re-resolves the scalable base after a switch; only track IDs are updated.
    pub(crate) fn resolve_base<C: Container + ?Sized>(&mut self, container: &C) {
        self.track = self.base_track;
        self.track_id = container.track_id(self.base_track);
        if self.next_track > container.track_count() {
            self.next_track = 0;
        }
    }

    /// Applies the NAL rewrite mode on `track`, unless the stream is encrypted.
    pub(crate) fn apply_extract_mode<C: Container + ?Sized>(&self, container: &mut C, track: u32) {
        if self.nalu_extract_mode.is_none() || track == 0 {
            return;
        }
        if self.is_encrypted {
            warn!(
                "[IsoMedia] {}",
                DemuxError::UnsupportedProtection(format!(
                    "sample NAL rewrite on encrypted track {} skipped",
                    self.track_id
                ))
            );
            return;
        }
        if let Err(e) = container.set_nalu_extract_mode(track, self.nalu_extract_mode) {
            error!("[IsoMedia] Failed to set NAL extract mode on track {}: {}", track, e);
        }
    }

    /// Forwards the protection scheme of the track as stream metadata.
    pub(crate) fn set_crypt_config<C, S>(&mut self, container: &C, sink: &mut S)
    where
        C: Container + ?Sized,
        S: PacketSink + ?Sized,
    {
        if !self.is_encrypted {
            return;
        }

        let (scheme, info) = match probe_protection(container, self.track) {
            Some((scheme, info)) => (Some(scheme), info),
            None => (None, Default::default()),
        };
        self.scheme = scheme;
        self.is_cenc = scheme == Some(ProtectionScheme::Cenc);
        self.scheme_type = info.scheme_type;
        self.scheme_version = info.scheme_version;
        self.kms_uri = info.kms_uri.clone();

        sink.set_property(self.stream, StreamProperty::ProtectionSchemeType(info.scheme_type));
        sink.set_property(
            self.stream,
            StreamProperty::ProtectionSchemeVersion(info.scheme_version),
        );
        if let Some(uri) = info.scheme_uri {
            sink.set_property(self.stream, StreamProperty::ProtectionSchemeUri(uri));
        }
        if let Some(uri) = info.kms_uri {
            sink.set_property(self.stream, StreamProperty::ProtectionKmsUri(uri));
        }

        if self.is_cenc {
            let pssh = encode_pssh(&collect_pssh(container));
            sink.set_property(self.stream, StreamProperty::CencPssh(pssh));
        }
    }

    /// Reads the next sample of the channel, recording the outcome in `last_state`.
    pub(crate) fn fetch_sample<C: Container + ?Sized>(
        &mut self,
        container: &mut C,
        input_loaded: bool,
    ) -> Option<Sample> {
        if self.suspended {
            self.last_state = FetchStatus::Error(ContainerError::BadParam(format!(
                "track ID {} unresolved",
                self.track_id
            )));
            return None;
        }

        if self.item_id != 0 {
            return self.fetch_item(container);
        }

        if self.next_track != 0 && self.next_track != self.track {
            let next = self.next_track;
            debug!(
                "[IsoMedia] Switching channel from track {} to track {}",
                self.track, next
            );
            self.track = next;
            self.track_id = container.track_id(next);
            self.next_track = 0;
            self.apply_extract_mode(container, next);
        }

        if self.to_init {
            if !self.init_cursor(container) {
                return None;
            }
        }

        let reverse = self.speed < 0.0;
        let next = if reverse {
            if self.sample_number <= 1 {
                self.last_state = FetchStatus::EndOfStream;
                return None;
            }
            self.sample_number - 1
        } else {
            self.sample_number + 1
        };

        match container.sample(self.track, next) {
            Ok(sample) => {
                let past_end = if reverse {
                    sample.dts < self.end
                } else {
                    self.end > 0 && sample.dts > self.end
                };
                if past_end {
                    self.last_state = FetchStatus::EndOfStream;
                    return None;
                }
                self.sample_number = next;
                self.seek_flag = !reverse && sample.dts < self.start;
                self.last_state = FetchStatus::Ok;
                Some(sample)
            }
            Err(e) => {
                self.record_error(e, container.is_fragmented() && !input_loaded);
                None
            }
        }
    }

    // Positions the cursor before the first sample to read. Returns false when
    // the lookup must be retried later.
    fn init_cursor<C: Container + ?Sized>(&mut self, container: &mut C) -> bool {
        let reverse = self.speed < 0.0;
        if self.start == 0 && !reverse {
            self.sample_number = 0;
            self.to_init = false;
            return true;
        }

        match container.sample_for_movie_time(self.track, self.start, self.search_mode()) {
            Ok(location) => {
                self.sample_number = if reverse {
                    location.sample_number + 1
                } else {
                    location.sample_number.saturating_sub(1)
                };
                self.to_init = false;
                true
            }
            Err(e) if e.is_incomplete() => {
                self.last_state = FetchStatus::Incomplete;
                false
            }
            Err(ContainerError::EndOfStream) => {
                self.last_state = FetchStatus::EndOfStream;
                false
            }
            Err(e) => {
                warn!(
                    "[IsoMedia] Cannot locate time {} on track {}: {} - starting from first sample",
                    self.start, self.track, e
                );
                self.sample_number = 0;
                self.to_init = false;
                true
            }
        }
    }

    fn fetch_item<C: Container + ?Sized>(&mut self, container: &mut C) -> Option<Sample> {
        if self.sample_number > 0 {
            self.last_state = FetchStatus::EndOfStream;
            return None;
        }
        match container.item_sample(self.item_id) {
            Ok(sample) => {
                self.sample_number = 1;
                self.to_init = false;
                self.seek_flag = false;
                self.last_state = FetchStatus::Ok;
                Some(sample)
            }
            Err(e) => {
                self.record_error(e, false);
                None
            }
        }
    }

    fn record_error(&mut self, e: ContainerError, downloading_fragments: bool) {
        self.last_state = match e {
            ContainerError::EndOfStream if downloading_fragments => FetchStatus::Incomplete,
            ContainerError::EndOfStream => FetchStatus::EndOfStream,
            e if e.is_incomplete() => FetchStatus::Incomplete,
            e => {
                error!(
                    "[IsoMedia] Failed to fetch sample {} of track {}: {}",
                    self.sample_number + 1,
                    self.track,
                    e
                );
                FetchStatus::Error(e)
            }
        };
    }

    /// Turns the sample just fetched into an output packet.
    pub(crate) fn to_packet<C: Container + ?Sized>(&mut self, sample: Sample, container: &C) -> Packet {
        let duration = if self.track != 0 {
            container.sample_duration(self.track, self.sample_number)
        } else {
            0
        };

        let cts = sample.cts();
        let mut packet = Packet::new(sample.data)
            .with_dts(sample.dts as i64)
            .with_pts(cts)
            .with_stream_index(self.stream)
            .with_key_flag(sample.is_rap || !self.has_rap)
            .with_duration(duration)
            .with_seek_flag(self.seek_flag);

        if let Some(encryption) = sample.encryption.filter(|enc| enc.is_encrypted) {
            self.constant_iv = encryption.constant_iv;
            self.iv_size = encryption.iv_size;
            self.sai_buffer = encryption.sai;
            let iv = if self.iv_size == 0 {
                IvInfo::Constant(self.constant_iv.clone())
            } else {
                IvInfo::PerSample {
                    iv_size: self.iv_size,
                }
            };
            packet = packet.with_encryption(PacketEncryption {
                skip_byte_block: encryption.skip_byte_block,
                crypt_byte_block: encryption.crypt_byte_block,
                iv,
                sai: self.sai_buffer.clone(),
            });
        }
        packet
    }
}

fn stream_type_of(media_type: MediaType) -> StreamType {
    match media_type {
        MediaType::Audio => StreamType::Audio,
        MediaType::Visual => StreamType::Visual,
        MediaType::Text => StreamType::Text,
        MediaType::Scene => StreamType::Scene,
        MediaType::Ocr => StreamType::Ocr,
        MediaType::Other(_) => StreamType::Unknown,
    }
}
