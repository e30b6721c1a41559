use super::channel::{Channel, PlayState};
use super::container::{ByteRange, Container, ContainerLibrary, MediaType};
use super::locator::{is_local, parse_locator, IdentityChange, SourceIdentity, TrackSelection};
use super::quality::{switch_quality, SwitchDirection};
use crate::av::{FilterHost, StreamId};
use crate::config::ReaderOptions;
use crate::error::{ContainerError, DemuxError, Result};
use log::{debug, error};

/// Properties of the input pid the reader is connected to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidProperties {
    /// Local path of the data, possibly a cache file.
    pub file_path: Option<String>,
    /// Original locator of the data, used as a fallback for selectors.
    pub url: Option<String>,
    pub file_range: Option<ByteRange>,
    /// The whole resource is available locally.
    pub file_cached: bool,
}

impl PidProperties {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.file_range = Some(ByteRange::new(start, end));
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.file_cached = cached;
        self
    }

    fn range(&self) -> ByteRange {
        self.file_range.unwrap_or_default()
    }
}

/// Events delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReaderEvent {
    /// Start playback of a stream between two times in seconds.
    Play {
        stream: StreamId,
        start_range: f64,
        end_range: f64,
        speed: f64,
    },
    Stop {
        stream: StreamId,
    },
    SetSpeed {
        stream: StreamId,
        speed: f64,
    },
    /// Switch every scalable channel one layer up or down.
    QualitySwitch {
        direction: SwitchDirection,
    },
}

/// Lifecycle of the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Uninitialized,
    /// Waiting for the initial metadata to be complete.
    OpenPending,
    Steady,
    Switching,
    /// The last switch failed; cursors were reset and the next switch may recover.
    ErrorReset,
    /// The initial open failed for good.
    Failed,
}

/// Kind of switch performed by a reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    /// New segment appended to the open movie.
    Fragment,
    /// New initialization segment, the container was reopened.
    Movie,
}

/// Result of a pid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Configured {
    /// Same locator and byte range, nothing done.
    Unchanged,
    /// First configuration, the source is opened (or pending).
    Setup,
    Switched(SwitchKind),
    /// The switch waits for more bytes of the new initialization segment.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingOpen {
    Initial,
    MovieSwitch { url: String },
}

/// Demultiplexer of a progressively downloaded or segmented ISOBMFF source.
///
/// The reader owns the open container and one [`Channel`] per declared
/// stream. The host drives it through [`configure_pid`](Self::configure_pid),
/// [`handle_event`](Self::handle_event) and one [`process`](Self::process)
/// call per tick.
pub struct IsoReader<L: ContainerLibrary, H: FilterHost> {
    pub(crate) library: L,
    pub(crate) host: H,
    pub(crate) options: ReaderOptions,
    pub(crate) mov: Option<L::Container>,
    pub(crate) state: ReaderState,
    pub(crate) pid: Option<PidProperties>,
    pub(crate) identity: SourceIdentity,
    pub(crate) selection: TrackSelection,
    pub(crate) fragmented: bool,
    pub(crate) timescale: u32,
    pub(crate) channels: Vec<Channel>,
    pub(crate) active_channel_count: u32,
    pub(crate) missing_bytes: u64,
    pub(crate) pending_open: Option<PendingOpen>,
    pub(crate) needs_fragment_refresh: bool,
    pub(crate) awaiting_seek_reply: bool,
    pub(crate) drop_next_segment: bool,
    pub(crate) input_fully_loaded: bool,
    pub(crate) partial_download_mode: bool,
    pub(crate) disconnected: bool,
}

impl<L: ContainerLibrary, H: FilterHost> IsoReader<L, H> {
    pub fn new(library: L, host: H, options: ReaderOptions) -> Self {
        Self {
            library,
            host,
            options,
            mov: None,
            state: ReaderState::Uninitialized,
            pid: None,
            identity: SourceIdentity::default(),
            selection: TrackSelection::All,
            fragmented: false,
            timescale: 0,
            channels: Vec::new(),
            active_channel_count: 0,
            missing_bytes: 0,
            pending_open: None,
            needs_fragment_refresh: false,
            awaiting_seek_reply: false,
            drop_next_segment: false,
            input_fully_loaded: false,
            partial_download_mode: false,
            disconnected: false,
        }
    }

    /// Opens the explicit `src` option, if any.
    pub fn initialize(&mut self) -> Result<()> {
        if self.options.src.is_some() {
            self.input_fully_loaded = true;
            return self.setup();
        }
        Ok(())
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    pub fn pid(&self) -> Option<&PidProperties> {
        self.pid.as_ref()
    }

    pub fn container(&self) -> Option<&L::Container> {
        self.mov.as_ref()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, stream: StreamId) -> Option<&Channel> {
        self.channels.iter().find(|ch| ch.stream() == stream)
    }

    pub fn selection(&self) -> TrackSelection {
        self.selection
    }

    pub fn identity(&self) -> SourceIdentity {
        self.identity
    }

    /// Movie timescale of the open container.
    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragmented
    }

    pub fn active_channel_count(&self) -> u32 {
        self.active_channel_count
    }

    pub fn missing_bytes(&self) -> u64 {
        self.missing_bytes
    }

    pub fn awaiting_moov(&self) -> bool {
        self.pending_open.is_some()
    }

    /// Fails with [`DemuxError::SourceIncomplete`] while an open waits for more bytes.
    pub fn ensure_open(&self) -> Result<()> {
        if self.pending_open.is_some() {
            return Err(DemuxError::SourceIncomplete {
                missing: self.missing_bytes,
            });
        }
        Ok(())
    }

    pub fn needs_fragment_refresh(&self) -> bool {
        self.needs_fragment_refresh
    }

    pub fn awaiting_seek_reply(&self) -> bool {
        self.awaiting_seek_reply
    }

    pub fn drop_next_segment(&self) -> bool {
        self.drop_next_segment
    }

    pub fn input_fully_loaded(&self) -> bool {
        self.input_fully_loaded
    }

    pub fn partial_download_mode(&self) -> bool {
        self.partial_download_mode
    }

    /// Connects or reconfigures the input pid.
    ///
    /// Repeating the same file path and byte range is a no-op.
    pub fn configure_pid(&mut self, props: PidProperties) -> Result<Configured> {
        let next_url = match props.file_path.as_deref() {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => {
                return Err(DemuxError::ConfigurationRejected(
                    "input pid has no file path".into(),
                ))
            }
        };
        if self.state == ReaderState::Failed {
            return Err(DemuxError::ConfigurationRejected(
                "reader failed to open its source".into(),
            ));
        }

        if self.pid.is_some() {
            let previous = self.identity;
            if self.identity.update(&next_url, props.range()) == IdentityChange::Unchanged {
                return Ok(Configured::Unchanged);
            }
            if self.pending_open == Some(PendingOpen::Initial) {
                debug!("[IsoMedia] source changed before its first open completed, reopening");
                self.pending_open = None;
                if props.file_cached {
                    self.input_fully_loaded = true;
                }
                self.pid = Some(props);
                self.setup()?;
                return Ok(Configured::Setup);
            }
            let cached = props.file_cached;
            let previous_pid = self.pid.replace(props);
            return match self.reconfigure(&next_url, cached) {
                Err(DemuxError::NotSupported(reason)) => {
                    self.identity = previous;
                    self.pid = previous_pid;
                    Err(DemuxError::NotSupported(reason))
                }
                result => result,
            };
        }

        if props.file_cached {
            self.input_fully_loaded = true;
        }
        self.pid = Some(props);
        self.disconnected = false;
        self.setup()?;
        Ok(Configured::Setup)
    }

    /// Disconnects the input pid: tears down every channel and closes the container.
    pub fn remove_pid(&mut self) {
        self.disconnected = true;
        self.channels.clear();
        self.mov = None;
        self.pid = None;
        self.pending_open = None;
        self.active_channel_count = 0;
        self.state = ReaderState::Uninitialized;
    }

    /// Opens the source and declares its streams.
    pub(crate) fn setup(&mut self) -> Result<()> {
        let (src, display_url, range) = match &self.pid {
            Some(pid) => (pid.file_path.clone(), pid.url.clone(), pid.range()),
            None => (self.options.src.clone(), None, ByteRange::FULL),
        };
        let src = src.ok_or_else(|| DemuxError::ConfigurationRejected("no source".into()))?;

        self.identity = SourceIdentity::new(&src, range);
        let parsed = parse_locator(&src, display_url.as_deref());
        self.selection = parsed.selection;

        if !self.options.allow_remote && !is_local(&parsed.open_url) {
            self.state = ReaderState::Failed;
            return Err(DemuxError::ConfigurationRejected(format!(
                "{} is not a local resource",
                parsed.open_url
            )));
        }

        let mov = match self.library.open_progressive(&parsed.open_url, range) {
            Ok(mov) => mov,
            Err(ContainerError::Incomplete { missing }) => {
                debug!(
                    "[IsoMedia] {} incomplete, {} bytes missing - waiting for more data",
                    parsed.open_url, missing
                );
                self.missing_bytes = missing;
                self.pending_open = Some(PendingOpen::Initial);
                self.state = ReaderState::OpenPending;
                return Ok(());
            }
            Err(e) => {
                error!("[IsoMedia] error while opening {}, error={}", parsed.open_url, e);
                self.state = ReaderState::Failed;
                return Err(DemuxError::FatalOpen {
                    url: parsed.open_url,
                    source: e,
                });
            }
        };

        self.missing_bytes = 0;
        self.fragmented = mov.is_fragmented();
        self.timescale = mov.timescale();
        self.mov = Some(mov);
        self.state = ReaderState::Steady;
        self.declare_objects();
        Ok(())
    }

    /// Creates one channel per selected track, then one per image item.
    fn declare_objects(&mut self) {
        let Some(mov) = self.mov.as_mut() else {
            return;
        };

        let mut declared_types: Vec<MediaType> = Vec::new();
        for track in 1..=mov.track_count() {
            let media_type = mov.media_type(track);
            if let MediaType::Other(handler) = media_type {
                debug!("[IsoMedia] Skipping track {} with handler {:#x}", track, handler);
                continue;
            }
            match self.selection {
                TrackSelection::TrackId(id) if mov.track_id(track) != id => continue,
                TrackSelection::FirstOfType(wanted)
                    if wanted != media_type || declared_types.contains(&media_type) =>
                {
                    continue
                }
                _ => {}
            }
            declared_types.push(media_type);
            let channel = Channel::create(mov, &mut self.host, track, 0);
            self.channels.push(channel);
        }

        if self.selection == TrackSelection::All {
            for item_id in mov.image_items() {
                let channel = Channel::create(mov, &mut self.host, 0, item_id);
                self.channels.push(channel);
            }
        }
        debug!("[IsoMedia] Declared {} streams", self.channels.len());
    }

    /// Handles a host event. Returns true when the event is consumed and must
    /// not travel further upstream.
    pub fn handle_event(&mut self, event: ReaderEvent) -> bool {
        if self.disconnected {
            return false;
        }
        match event {
            ReaderEvent::QualitySwitch { direction } => self.on_quality_switch(direction),
            ReaderEvent::Play {
                stream,
                start_range,
                end_range,
                speed,
            } => self.on_play(stream, start_range, end_range, speed),
            ReaderEvent::Stop { stream } => self.on_stop(stream),
            ReaderEvent::SetSpeed { stream, speed } => self.on_set_speed(stream, speed),
        }
    }

    fn channel_index(&self, stream: StreamId) -> Option<usize> {
        self.channels.iter().position(|ch| ch.stream() == stream)
    }

    fn on_quality_switch(&mut self, direction: SwitchDirection) -> bool {
        let Some(mov) = self.mov.as_mut() else {
            return true;
        };
        for ch in self.channels.iter_mut() {
            if ch.base_track() != 0 && mov.needs_layer_reconstruction() {
                let next = switch_quality(ch, mov, direction);
                ch.set_next_track(next);
            }
        }
        true
    }

    fn on_play(&mut self, stream: StreamId, start_range: f64, end_range: f64, speed: f64) -> bool {
        let Some(index) = self.channel_index(stream) else {
            return false;
        };
        self.channels[index].play(start_range, end_range, speed);

        if self.active_channel_count == 0 {
            if let Some(mov) = self.mov.as_mut() {
                mov.reset_sequence_numbers();
            }
        }
        if self.partial_download_mode {
            self.input_fully_loaded = false;
        }
        if self.active_channel_count == 0 && self.pid.is_some() && !self.input_fully_loaded {
            self.request_byte_seek(start_range);
        }

        self.active_channel_count += 1;
        true
    }

    // Repositions the byte source on the smallest data offset needed to start
    // every channel at `start_range`.
    fn request_byte_seek(&mut self, start_range: f64) {
        let Some(mov) = self.mov.as_mut() else {
            return;
        };

        let mut min_offset: Option<u64> = None;
        for ch in self.channels.iter().filter(|ch| ch.track() != 0) {
            let mut time = (start_range * ch.timescale() as f64) as u64;
            // seeking past the end of a complete track lands on its last sample
            if !self.fragmented && ch.duration() < time {
                time = ch.duration();
            }
            if let Ok(location) = mov.sample_for_movie_time(ch.track(), time, ch.search_mode()) {
                min_offset = Some(match min_offset {
                    Some(offset) => offset.min(location.data_offset),
                    None => location.data_offset,
                });
            }
        }

        if let Some(offset) = min_offset {
            if start_range != 0.0 || self.partial_download_mode {
                debug!("[IsoMedia] Requesting source seek to byte {}", offset);
                self.partial_download_mode = true;
                self.awaiting_seek_reply = true;
                self.host.seek(offset);
                mov.set_byte_offset(offset);
            }
        }
    }

    fn on_stop(&mut self, stream: StreamId) -> bool {
        let Some(index) = self.channel_index(stream) else {
            return false;
        };
        self.active_channel_count = self.active_channel_count.saturating_sub(1);
        self.channels[index].reset();
        false
    }

    fn on_set_speed(&mut self, stream: StreamId, speed: f64) -> bool {
        let Some(index) = self.channel_index(stream) else {
            return false;
        };
        self.channels[index].set_speed(speed);
        true
    }

    pub(crate) fn playing_channels(&self) -> usize {
        self.channels
            .iter()
            .filter(|ch| ch.play_state() == PlayState::Playing)
            .count()
    }
}
