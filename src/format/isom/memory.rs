//! In-memory container library and host.
//!
//! [`MemoryLibrary`] serves movies and media segments described as plain
//! values and records every call made by the reader. [`MemoryHost`] collects
//! declarations, properties, packets and seek requests. Both are cheap
//! cloneable handles over shared state so a caller can keep inspecting them
//! while a reader owns another handle.

use super::container::{
    ByteRange, CodecLayering, Container, ContainerLibrary, ContainerResult, MediaType,
    NaluExtractMode, ProtectionInfo, PsshInfo, RangeProbe, ReferenceKind, Sample,
    SampleLocation, SearchMode, SegmentFlags,
};
use super::crypt::ProtectionScheme;
use crate::av::{ByteSource, Packet, PacketSink, StreamDeclaration, StreamId, StreamProperty};
use crate::error::ContainerError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A sample with the bookkeeping the library keeps next to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySample {
    pub sample: Sample,
    pub duration: u32,
    pub data_offset: u64,
}

impl MemorySample {
    pub fn new(data: &'static [u8], dts: u64, duration: u32, is_rap: bool) -> Self {
        Self {
            sample: Sample {
                data: bytes::Bytes::from_static(data),
                dts,
                cts_offset: 0,
                is_rap,
                encryption: None,
            },
            duration,
            data_offset: 0,
        }
    }

    pub fn at_offset(mut self, data_offset: u64) -> Self {
        self.data_offset = data_offset;
        self
    }

    pub fn with_cts_offset(mut self, cts_offset: i32) -> Self {
        self.sample.cts_offset = cts_offset;
        self
    }

    pub fn with_encryption(mut self, encryption: super::container::SampleEncryption) -> Self {
        self.sample.encryption = Some(encryption);
        self
    }
}

/// A track of an in-memory movie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTrack {
    pub track_id: u32,
    pub media_type: MediaType,
    pub timescale: u32,
    pub duration: u64,
    pub layering: CodecLayering,
    pub samples: Vec<MemorySample>,
    /// Track ID of the scalable base.
    pub base_reference: Option<u32>,
    /// Track IDs of the scalable references, in declaration order.
    pub scalable_references: Vec<u32>,
    pub has_sync_points: bool,
    pub has_edit_list: bool,
    pub protection: Option<(ProtectionScheme, ProtectionInfo)>,
    pub tfdt: u64,
}

impl MemoryTrack {
    pub fn new(track_id: u32, media_type: MediaType, timescale: u32) -> Self {
        Self {
            track_id,
            media_type,
            timescale,
            duration: 0,
            layering: CodecLayering::Other,
            samples: Vec::new(),
            base_reference: None,
            scalable_references: Vec::new(),
            has_sync_points: false,
            has_edit_list: false,
            protection: None,
            tfdt: 0,
        }
    }

    pub fn with_samples(mut self, samples: Vec<MemorySample>) -> Self {
        self.duration = samples
            .last()
            .map(|s| s.sample.dts + s.duration as u64)
            .unwrap_or(0);
        self.samples = samples;
        self
    }

    pub fn with_layering(mut self, layering: CodecLayering) -> Self {
        self.layering = layering;
        self
    }

    pub fn with_base(mut self, base_track_id: u32) -> Self {
        self.base_reference = Some(base_track_id);
        self
    }

    pub fn with_scalable_references(mut self, track_ids: Vec<u32>) -> Self {
        self.scalable_references = track_ids;
        self
    }

    pub fn with_sync_points(mut self) -> Self {
        self.has_sync_points = true;
        self
    }

    pub fn with_protection(mut self, scheme: ProtectionScheme, info: ProtectionInfo) -> Self {
        self.protection = Some((scheme, info));
        self
    }

    pub fn with_tfdt(mut self, tfdt: u64) -> Self {
        self.tfdt = tfdt;
        self
    }
}

/// An in-memory movie (initialization segment plus any samples it carries).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMovie {
    pub fragmented: bool,
    pub smooth_streaming: bool,
    pub timescale: u32,
    pub tracks: Vec<MemoryTrack>,
    pub items: Vec<(u32, Sample)>,
    pub pssh: Vec<PsshInfo>,
    pub layer_reconstruction: bool,
}

impl MemoryMovie {
    pub fn new(timescale: u32) -> Self {
        Self {
            timescale,
            ..Default::default()
        }
    }

    pub fn fragmented(mut self) -> Self {
        self.fragmented = true;
        self
    }

    pub fn smooth_streaming(mut self) -> Self {
        self.smooth_streaming = true;
        self
    }

    pub fn with_track(mut self, track: MemoryTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn with_item(mut self, item_id: u32, sample: Sample) -> Self {
        self.items.push((item_id, sample));
        self
    }

    pub fn with_pssh(mut self, pssh: PsshInfo) -> Self {
        self.pssh.push(pssh);
        self
    }

    pub fn with_layer_reconstruction(mut self) -> Self {
        self.layer_reconstruction = true;
        self
    }
}

/// A media segment: samples per track ID.
///
/// `pending` samples only become visible after a fragment refresh; while any
/// are pending, opening the segment reports it incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySegment {
    pub samples: Vec<(u32, Vec<MemorySample>)>,
    pub pending: Vec<(u32, Vec<MemorySample>)>,
    /// Fails the open with a parse error.
    pub corrupted: bool,
}

/// A call made by the reader on the library or on one of its containers.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerCall {
    OpenProgressive { url: String, range: ByteRange },
    Probe { url: String, range: ByteRange },
    Close,
    OpenSegment { url: String, range: ByteRange, flags: SegmentFlags },
    ReleaseSegment { reset_tables: bool },
    ResetFragmentInfo { keep_sample_count: bool },
    Refresh,
    ResetSequenceNumbers,
    SetByteOffset(u64),
    SetNaluExtractMode { track: u32, mode: NaluExtractMode },
    SampleForMovieTime { track: u32, time: u64, mode: SearchMode },
}

#[derive(Debug, Default)]
struct LibraryState {
    movies: HashMap<String, MemoryMovie>,
    segments: HashMap<String, MemorySegment>,
    probes: HashMap<String, RangeProbe>,
    incomplete_opens: HashMap<String, (u32, u64)>,
    calls: Vec<ContainerCall>,
}

/// In-memory container library.
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    state: Arc<Mutex<LibraryState>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a movie, classified as a new movie when switched to.
    pub fn add_movie(&self, url: &str, movie: MemoryMovie) {
        let mut state = self.state.lock();
        state.movies.insert(url.to_string(), movie);
        state
            .probes
            .entry(url.to_string())
            .or_insert(RangeProbe::NewMovieMajor);
    }

    /// Registers a media segment, classified as a fragment when switched to.
    pub fn add_segment(&self, url: &str, segment: MemorySegment) {
        let mut state = self.state.lock();
        state.segments.insert(url.to_string(), segment);
        state.probes.insert(url.to_string(), RangeProbe::Fragment);
    }

    pub fn set_probe(&self, url: &str, probe: RangeProbe) {
        self.state.lock().probes.insert(url.to_string(), probe);
    }

    /// Makes the next `times` opens of `url` report `missing` bytes missing.
    pub fn set_incomplete_opens(&self, url: &str, times: u32, missing: u64) {
        self.state
            .lock()
            .incomplete_opens
            .insert(url.to_string(), (times, missing));
    }

    pub fn calls(&self) -> Vec<ContainerCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, call: ContainerCall) {
        self.state.lock().calls.push(call);
    }
}

impl ContainerLibrary for MemoryLibrary {
    type Container = MemoryContainer;

    fn open_progressive(&mut self, url: &str, range: ByteRange) -> ContainerResult<MemoryContainer> {
        let mut state = self.state.lock();
        state.calls.push(ContainerCall::OpenProgressive {
            url: url.to_string(),
            range,
        });

        if let Some((times, missing)) = state.incomplete_opens.get_mut(url) {
            if *times > 0 {
                *times -= 1;
                return Err(ContainerError::Incomplete { missing: *missing });
            }
        }

        let movie = state
            .movies
            .get(url)
            .cloned()
            .ok_or_else(|| ContainerError::Parse(format!("{} is not an ISO media file", url)))?;
        let tracks = movie
            .tracks
            .iter()
            .map(|track| TrackState {
                sample_base: 0,
                samples: track.samples.clone(),
            })
            .collect();

        Ok(MemoryContainer {
            movie,
            tracks,
            pending: Vec::new(),
            nalu_modes: HashMap::new(),
            byte_offset: 0,
            library: self.clone(),
        })
    }

    fn probe_file_range(&self, url: &str, range: ByteRange) -> RangeProbe {
        let mut state = self.state.lock();
        state.calls.push(ContainerCall::Probe {
            url: url.to_string(),
            range,
        });
        state
            .probes
            .get(url)
            .copied()
            .unwrap_or(RangeProbe::Unsupported)
    }
}

#[derive(Debug, Clone)]
struct TrackState {
    /// Samples numbered at or below this were released.
    sample_base: u32,
    samples: Vec<MemorySample>,
}

/// An open in-memory container.
#[derive(Debug)]
pub struct MemoryContainer {
    movie: MemoryMovie,
    tracks: Vec<TrackState>,
    pending: Vec<(u32, Vec<MemorySample>)>,
    nalu_modes: HashMap<u32, NaluExtractMode>,
    byte_offset: u64,
    library: MemoryLibrary,
}

impl MemoryContainer {
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    pub fn nalu_extract_mode(&self, track: u32) -> NaluExtractMode {
        self.nalu_modes.get(&track).copied().unwrap_or_default()
    }

    fn track(&self, track: u32) -> Option<&MemoryTrack> {
        track
            .checked_sub(1)
            .and_then(|index| self.movie.tracks.get(index as usize))
    }

    fn state(&self, track: u32) -> Option<&TrackState> {
        track
            .checked_sub(1)
            .and_then(|index| self.tracks.get(index as usize))
    }

    fn number_of(&self, track_id: u32) -> Option<u32> {
        self.movie
            .tracks
            .iter()
            .position(|t| t.track_id == track_id)
            .map(|index| index as u32 + 1)
    }

    fn sample_entry(&self, track: u32, sample_number: u32) -> ContainerResult<&MemorySample> {
        let state = self
            .state(track)
            .ok_or_else(|| ContainerError::BadParam(format!("no track {}", track)))?;
        if sample_number <= state.sample_base {
            return Err(ContainerError::BadParam(format!(
                "sample {} of track {} was released",
                sample_number, track
            )));
        }
        state
            .samples
            .get((sample_number - state.sample_base - 1) as usize)
            .ok_or(ContainerError::EndOfStream)
    }

    fn append(&mut self, samples: Vec<(u32, Vec<MemorySample>)>) {
        for (track_id, mut new_samples) in samples {
            if let Some(track) = self.number_of(track_id) {
                self.tracks[(track - 1) as usize].samples.append(&mut new_samples);
            }
        }
    }

    fn protection(&self, track: u32, scheme: ProtectionScheme) -> Option<ProtectionInfo> {
        match &self.track(track)?.protection {
            Some((s, info)) if *s == scheme => Some(info.clone()),
            _ => None,
        }
    }
}

impl Drop for MemoryContainer {
    fn drop(&mut self) {
        self.library.record(ContainerCall::Close);
    }
}

impl Container for MemoryContainer {
    fn is_fragmented(&self) -> bool {
        self.movie.fragmented
    }

    fn is_smooth_streaming(&self) -> bool {
        self.movie.smooth_streaming
    }

    fn timescale(&self) -> u32 {
        self.movie.timescale
    }

    fn track_count(&self) -> u32 {
        self.movie.tracks.len() as u32
    }

    fn track_id(&self, track: u32) -> u32 {
        self.track(track).map(|t| t.track_id).unwrap_or(0)
    }

    fn track_by_id(&self, track_id: u32) -> Option<u32> {
        self.number_of(track_id)
    }

    fn media_type(&self, track: u32) -> MediaType {
        self.track(track)
            .map(|t| t.media_type)
            .unwrap_or(MediaType::Other(0))
    }

    fn media_timescale(&self, track: u32) -> u32 {
        self.track(track).map(|t| t.timescale).unwrap_or(0)
    }

    fn media_duration(&self, track: u32) -> u64 {
        self.track(track).map(|t| t.duration).unwrap_or(0)
    }

    fn sample_count(&self, track: u32) -> u32 {
        self.state(track)
            .map(|s| s.sample_base + s.samples.len() as u32)
            .unwrap_or(0)
    }

    fn sample_duration(&self, track: u32, sample_number: u32) -> u32 {
        self.sample_entry(track, sample_number)
            .map(|s| s.duration)
            .unwrap_or(0)
    }

    fn has_edit_list(&self, track: u32) -> bool {
        self.track(track).map(|t| t.has_edit_list).unwrap_or(false)
    }

    fn has_sync_points(&self, track: u32) -> bool {
        self.track(track).map(|t| t.has_sync_points).unwrap_or(false)
    }

    fn codec_layering(&self, track: u32) -> CodecLayering {
        self.track(track)
            .map(|t| t.layering)
            .unwrap_or(CodecLayering::Other)
    }

    fn image_items(&self) -> Vec<u32> {
        self.movie.items.iter().map(|(id, _)| *id).collect()
    }

    fn reference_count(&self, track: u32, kind: ReferenceKind) -> ContainerResult<u32> {
        let t = self
            .track(track)
            .ok_or_else(|| ContainerError::BadParam(format!("no track {}", track)))?;
        Ok(match kind {
            ReferenceKind::Base => t.base_reference.is_some() as u32,
            ReferenceKind::Scalable => t.scalable_references.len() as u32,
        })
    }

    fn reference(&self, track: u32, kind: ReferenceKind, index: u32) -> Option<u32> {
        let t = self.track(track)?;
        let track_id = match kind {
            ReferenceKind::Base if index == 1 => t.base_reference?,
            ReferenceKind::Base => return None,
            ReferenceKind::Scalable => *t.scalable_references.get(index.checked_sub(1)? as usize)?,
        };
        self.number_of(track_id)
    }

    fn has_track_reference(&self, track: u32, kind: ReferenceKind, ref_track_id: u32) -> u32 {
        let Some(t) = self.track(track) else {
            return 0;
        };
        match kind {
            ReferenceKind::Base => (t.base_reference == Some(ref_track_id)) as u32,
            ReferenceKind::Scalable => t
                .scalable_references
                .iter()
                .position(|id| *id == ref_track_id)
                .map(|index| index as u32 + 1)
                .unwrap_or(0),
        }
    }

    fn needs_layer_reconstruction(&self) -> bool {
        self.movie.layer_reconstruction
    }

    fn set_nalu_extract_mode(&mut self, track: u32, mode: NaluExtractMode) -> ContainerResult<()> {
        if self.track(track).is_none() {
            return Err(ContainerError::BadParam(format!("no track {}", track)));
        }
        self.library
            .record(ContainerCall::SetNaluExtractMode { track, mode });
        self.nalu_modes.insert(track, mode);
        Ok(())
    }

    fn is_track_encrypted(&self, track: u32) -> bool {
        self.track(track)
            .map(|t| t.protection.is_some())
            .unwrap_or(false)
    }

    fn ismacryp_info(&self, track: u32, _description_index: u32) -> Option<ProtectionInfo> {
        self.protection(track, ProtectionScheme::Isma)
    }

    fn omadrm_info(&self, track: u32, _description_index: u32) -> Option<ProtectionInfo> {
        self.protection(track, ProtectionScheme::OmaDrm)
    }

    fn cenc_info(&self, track: u32, _description_index: u32) -> Option<ProtectionInfo> {
        self.protection(track, ProtectionScheme::Cenc)
    }

    fn pssh_count(&self) -> u32 {
        self.movie.pssh.len() as u32
    }

    fn pssh(&self, index: u32) -> Option<PsshInfo> {
        self.movie
            .pssh
            .get(index.checked_sub(1)? as usize)
            .cloned()
    }

    fn current_tfdt(&self, track: u32) -> u64 {
        self.track(track).map(|t| t.tfdt).unwrap_or(0)
    }

    fn open_segment(&mut self, url: &str, range: ByteRange, flags: SegmentFlags) -> ContainerResult<()> {
        self.library.record(ContainerCall::OpenSegment {
            url: url.to_string(),
            range,
            flags,
        });
        let segment = self
            .library
            .state
            .lock()
            .segments
            .get(url)
            .cloned()
            .ok_or_else(|| ContainerError::Parse(format!("unknown segment {}", url)))?;
        if segment.corrupted {
            return Err(ContainerError::Parse(format!("corrupted segment {}", url)));
        }

        self.append(segment.samples);
        if segment.pending.is_empty() {
            return Ok(());
        }
        let missing = segment
            .pending
            .iter()
            .flat_map(|(_, samples)| samples.iter())
            .map(|s| s.sample.data.len() as u64)
            .sum();
        self.pending = segment.pending;
        Err(ContainerError::Incomplete { missing })
    }

    fn release_segment(&mut self, reset_tables: bool) {
        self.library
            .record(ContainerCall::ReleaseSegment { reset_tables });
        if reset_tables {
            for state in self.tracks.iter_mut() {
                state.sample_base += state.samples.len() as u32;
                state.samples.clear();
            }
        }
    }

    fn reset_fragment_info(&mut self, keep_sample_count: bool) {
        self.library
            .record(ContainerCall::ResetFragmentInfo { keep_sample_count });
        self.pending.clear();
        if !keep_sample_count {
            for state in self.tracks.iter_mut() {
                state.sample_base = 0;
                state.samples.clear();
            }
        }
    }

    fn refresh_fragmented(&mut self) -> ContainerResult<u64> {
        self.library.record(ContainerCall::Refresh);
        let pending = std::mem::take(&mut self.pending);
        self.append(pending);
        Ok(0)
    }

    fn reset_sequence_numbers(&mut self) {
        self.library.record(ContainerCall::ResetSequenceNumbers);
    }

    fn set_byte_offset(&mut self, offset: u64) {
        self.library.record(ContainerCall::SetByteOffset(offset));
        self.byte_offset = offset;
    }

    fn sample(&mut self, track: u32, sample_number: u32) -> ContainerResult<Sample> {
        self.sample_entry(track, sample_number)
            .map(|s| s.sample.clone())
    }

    fn item_sample(&mut self, item_id: u32) -> ContainerResult<Sample> {
        self.movie
            .items
            .iter()
            .find(|(id, _)| *id == item_id)
            .map(|(_, sample)| sample.clone())
            .ok_or_else(|| ContainerError::BadParam(format!("no item {}", item_id)))
    }

    fn sample_for_movie_time(&mut self, track: u32, time: u64, mode: SearchMode) -> ContainerResult<SampleLocation> {
        self.library
            .record(ContainerCall::SampleForMovieTime { track, time, mode });
        let state = self
            .state(track)
            .ok_or_else(|| ContainerError::BadParam(format!("no track {}", track)))?;
        if state.samples.is_empty() {
            return Err(ContainerError::EndOfStream);
        }
        let has_sync_points = self.has_sync_points(track);

        let mut found = 0;
        for (index, entry) in state.samples.iter().enumerate() {
            if entry.sample.dts > time {
                break;
            }
            let sync = entry.sample.is_rap || !has_sync_points;
            if mode == SearchMode::Backward || sync {
                found = index;
            }
        }
        let entry = &state.samples[found];
        Ok(SampleLocation {
            sample_number: state.sample_base + found as u32 + 1,
            description_index: 1,
            data_offset: entry.data_offset,
        })
    }
}

#[derive(Debug, Default)]
struct HostState {
    declarations: Vec<StreamDeclaration>,
    properties: Vec<(StreamId, StreamProperty)>,
    packets: Vec<(StreamId, Packet)>,
    queued: HashMap<StreamId, usize>,
    eos: Vec<StreamId>,
    seeks: Vec<u64>,
    input_packets: VecDeque<u64>,
    input_eos: bool,
    capacity: Option<usize>,
}

/// In-memory host recording everything the reader emits.
///
/// With a capacity set, a stream blocks once that many packets are queued
/// until [`drain`](MemoryHost::drain) is called.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let host = Self::default();
        host.state.lock().capacity = Some(capacity);
        host
    }

    /// Queues input packets; `offset` is informational.
    pub fn push_input(&self, offset: u64) {
        self.state.lock().input_packets.push_back(offset);
    }

    pub fn set_input_eos(&self, eos: bool) {
        self.state.lock().input_eos = eos;
    }

    pub fn declarations(&self) -> Vec<StreamDeclaration> {
        self.state.lock().declarations.clone()
    }

    pub fn properties(&self, stream: StreamId) -> Vec<StreamProperty> {
        self.state
            .lock()
            .properties
            .iter()
            .filter(|(id, _)| *id == stream)
            .map(|(_, property)| property.clone())
            .collect()
    }

    pub fn packets(&self, stream: StreamId) -> Vec<Packet> {
        self.state
            .lock()
            .packets
            .iter()
            .filter(|(id, _)| *id == stream)
            .map(|(_, packet)| packet.clone())
            .collect()
    }

    pub fn eos(&self) -> Vec<StreamId> {
        self.state.lock().eos.clone()
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.state.lock().seeks.clone()
    }

    pub fn pending_input(&self) -> usize {
        self.state.lock().input_packets.len()
    }

    /// Releases backpressure on every stream.
    pub fn drain(&self) {
        self.state.lock().queued.clear();
    }
}

impl PacketSink for MemoryHost {
    fn declare_stream(&mut self, declaration: StreamDeclaration) -> StreamId {
        let mut state = self.state.lock();
        state.declarations.push(declaration);
        state.declarations.len() - 1
    }

    fn set_property(&mut self, stream: StreamId, property: StreamProperty) {
        self.state.lock().properties.push((stream, property));
    }

    fn would_block(&self, stream: StreamId) -> bool {
        let state = self.state.lock();
        match state.capacity {
            Some(capacity) => state.queued.get(&stream).copied().unwrap_or(0) >= capacity,
            None => false,
        }
    }

    fn send_packet(&mut self, stream: StreamId, packet: Packet) {
        let mut state = self.state.lock();
        *state.queued.entry(stream).or_insert(0) += 1;
        state.packets.push((stream, packet));
    }

    fn set_eos(&mut self, stream: StreamId) {
        self.state.lock().eos.push(stream);
    }
}

impl ByteSource for MemoryHost {
    fn drop_packet(&mut self) -> bool {
        self.state.lock().input_packets.pop_front().is_some()
    }

    fn is_eos(&self) -> bool {
        let state = self.state.lock();
        state.input_eos && state.input_packets.is_empty()
    }

    fn seek(&mut self, offset: u64) {
        let mut state = self.state.lock();
        state.seeks.push(offset);
        // data buffered before the seek belongs to the old position
        state.input_packets.clear();
        state.input_eos = false;
    }
}
