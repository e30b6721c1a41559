use super::channel::{FetchStatus, PlayState};
use super::container::{ByteRange, Container, ContainerLibrary, RangeProbe, SegmentFlags};
use super::reader::{Configured, IsoReader, PendingOpen, ReaderState, SwitchKind};
use crate::av::FilterHost;
use crate::error::{ContainerError, DemuxError, Result};
use log::{debug, error, warn};

const TFDT_TOKEN: &str = "tfdt=";

impl<L: ContainerLibrary, H: FilterHost> IsoReader<L, H> {
    /// Switches the reader to `next_url`, classified against the open movie.
    pub(crate) fn reconfigure(&mut self, next_url: &str, cached: bool) -> Result<Configured> {
        let range = self.identity.range();
        debug!("[IsoMedia] reconfigure triggered, URL {}", next_url);

        let kind = match self.library.probe_file_range(next_url, range) {
            RangeProbe::Fragment => SwitchKind::Fragment,
            RangeProbe::NewMovieMinor | RangeProbe::NewMovieMajor => SwitchKind::Movie,
            RangeProbe::Unsupported => {
                return Err(DemuxError::NotSupported(format!(
                    "{} is not a segment or movie the reader can switch to",
                    next_url
                )))
            }
        };

        if cached {
            self.input_fully_loaded = true;
        }
        self.needs_fragment_refresh = false;
        // a newer locator supersedes any switch still waiting for bytes
        self.pending_open = None;
        self.state = ReaderState::Switching;

        let result = match kind {
            SwitchKind::Fragment if self.mov.is_some() => self.switch_fragment(next_url, range),
            SwitchKind::Fragment => Err(ContainerError::BadParam(
                "no open movie to append the segment to".into(),
            )),
            SwitchKind::Movie => self.switch_movie(next_url, range),
        };

        match result {
            Ok(()) => {
                if self.input_fully_loaded {
                    debug!("[IsoMedia] Opening current segment in non-progressive mode (completely downloaded)");
                } else {
                    debug!("[IsoMedia] Opening current segment in progressive mode (download in progress)");
                }
                self.reconcile_channels(kind == SwitchKind::Movie);
                self.drop_next_segment = false;
                self.state = ReaderState::Steady;
                Ok(Configured::Switched(kind))
            }
            Err(ContainerError::Incomplete { missing }) if kind == SwitchKind::Movie => {
                debug!(
                    "[IsoMedia] Init segment {} incomplete, {} bytes missing",
                    next_url, missing
                );
                self.state = ReaderState::OpenPending;
                Ok(Configured::Deferred)
            }
            Err(e) => {
                self.fail_switch();
                Err(DemuxError::ReconfigurationFailed {
                    url: next_url.to_string(),
                    source: e,
                })
            }
        }
    }

    fn switch_fragment(&mut self, url: &str, range: ByteRange) -> std::result::Result<(), ContainerError> {
        let Some(mov) = self.mov.as_mut() else {
            return Err(ContainerError::BadParam("no open movie".into()));
        };
        mov.release_segment(true);
        mov.reset_fragment_info(true);

        let flags = SegmentFlags {
            no_order_check: self.options.no_order_check,
        };
        match mov.open_segment(url, range, flags) {
            Ok(()) => {
                if range.end != 0 {
                    debug!(
                        "[IsoMedia] Playing new range in {}: {}-{}",
                        url, range.start, range.end
                    );
                } else {
                    debug!("[IsoMedia] playing new segment {}", url);
                }
                Ok(())
            }
            Err(ContainerError::Incomplete { missing }) if !self.input_fully_loaded => {
                debug!(
                    "[IsoMedia] Segment {} partially available, {} bytes missing - refresh pending",
                    url, missing
                );
                self.needs_fragment_refresh = true;
                Ok(())
            }
            Err(e) => {
                error!("[IsoMedia] Error opening new segment {}: {}", url, e);
                Err(e)
            }
        }
    }

    fn switch_movie(&mut self, url: &str, range: ByteRange) -> std::result::Result<(), ContainerError> {
        let mut url = url.to_string();
        if let Some(mov) = self.mov.as_ref() {
            let tfdt = mov.current_tfdt(1);
            debug!(
                "[IsoMedia] Switching between files - opening new init segment {} (time offset={}) - range {}-{}",
                url, tfdt, range.start, range.end
            );
            if mov.is_smooth_streaming() {
                match rewrite_tfdt(&url, tfdt) {
                    Some(rewritten) => url = rewritten,
                    None => warn!("[IsoMedia] Error finding init time for init segment {}", url),
                }
            }
        }

        // the outgoing container is closed before the new one is opened
        self.mov = None;
        match self.library.open_progressive(&url, range) {
            Ok(mov) => {
                self.install_movie(mov);
                Ok(())
            }
            Err(ContainerError::Incomplete { missing }) => {
                self.missing_bytes = missing;
                self.pending_open = Some(PendingOpen::MovieSwitch { url });
                Err(ContainerError::Incomplete { missing })
            }
            Err(e) => {
                error!("[IsoMedia] Error opening init segment {}: {}", url, e);
                Err(e)
            }
        }
    }

    pub(crate) fn install_movie(&mut self, mov: L::Container) {
        self.missing_bytes = 0;
        self.fragmented = mov.is_fragmented();
        self.timescale = mov.timescale();
        self.mov = Some(mov);
    }

    /// Retries a movie switch that was waiting for more bytes.
    pub(crate) fn retry_movie_switch(&mut self, url: String) -> Result<()> {
        let range = self.identity.range();
        match self.library.open_progressive(&url, range) {
            Ok(mov) => {
                self.install_movie(mov);
                self.reconcile_channels(true);
                self.drop_next_segment = false;
                self.state = ReaderState::Steady;
                Ok(())
            }
            Err(ContainerError::Incomplete { missing }) => {
                self.missing_bytes = missing;
                self.pending_open = Some(PendingOpen::MovieSwitch { url });
                Ok(())
            }
            Err(e) => {
                error!("[IsoMedia] Error opening init segment {}: {}", url, e);
                self.fail_switch();
                Err(DemuxError::ReconfigurationFailed { url, source: e })
            }
        }
    }

    /// Resets fragment state and every cursor after a failed switch.
    fn fail_switch(&mut self) {
        if let Some(mov) = self.mov.as_mut() {
            mov.release_segment(true);
            mov.reset_fragment_info(false);
        }
        self.drop_next_segment = true;
        self.needs_fragment_refresh = false;
        for ch in self.channels.iter_mut() {
            ch.reset_cursor();
        }
        self.state = ReaderState::ErrorReset;
    }

    /// Re-anchors every channel on the container after a successful switch.
    pub(crate) fn reconcile_channels(&mut self, is_new_mov: bool) {
        let Some(mov) = self.mov.as_mut() else {
            return;
        };

        for ch in self.channels.iter_mut() {
            ch.set_last_state(FetchStatus::Ok);
            if ch.play_state() != PlayState::Stopped {
                ch.set_play_state(PlayState::Playing);
            }

            if ch.base_track() != 0 {
                ch.resolve_base(mov);
            }

            debug!(
                "[IsoMedia] Track {} - cur sample {} - new sample count {}",
                ch.track(),
                ch.sample_number(),
                mov.sample_count(ch.track())
            );

            if is_new_mov {
                if ch.item_id() == 0 {
                    match mov.track_by_id(ch.track_id()) {
                        Some(track) => ch.rebind(track, ch.track_id()),
                        None if mov.track_count() == 1 => {
                            debug!("[IsoMedia] Mismatch between track IDs of different representations");
                            ch.rebind(1, mov.track_id(1));
                        }
                        None => {
                            error!(
                                "[IsoMedia] {}",
                                DemuxError::TrackResolutionMismatch {
                                    track_id: ch.track_id()
                                }
                            );
                            ch.rebind(0, ch.track_id());
                        }
                    }
                }
                // sample numbers of the old movie mean nothing in the new one
                ch.reset_cursor();
            }

            ch.apply_extract_mode(mov, ch.track());
            if ch.is_encrypted() {
                ch.set_crypt_config(mov, &mut self.host);
            }
        }
    }
}

/// Replaces the decode time placeholder following `tfdt=` in a smooth
/// streaming locator.
pub fn rewrite_tfdt(url: &str, tfdt: u64) -> Option<String> {
    let value_start = url.find(TFDT_TOKEN)? + TFDT_TOKEN.len();
    let value_len = url[value_start..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(url.len() - value_start);
    Some(format!(
        "{}{}{}",
        &url[..value_start],
        tfdt,
        &url[value_start + value_len..]
    ))
}
