use super::channel::{FetchStatus, PlayState};
use super::container::{Container, ContainerLibrary};
use super::reader::{IsoReader, PendingOpen};
use crate::av::FilterHost;
use crate::error::{ContainerError, Result};
use log::{debug, error, log_enabled, Level};

/// Outcome of one processing tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Channels are playing or the reader waits for its source.
    Active,
    /// Nothing is playing anymore.
    EndOfStream,
}

impl<L: ContainerLibrary, H: FilterHost> IsoReader<L, H> {
    /// Runs one processing tick: consumes source notifications, retries pending
    /// opens, refreshes the open fragment and drains every playing channel.
    pub fn process(&mut self) -> Result<ProcessStatus> {
        let mut in_is_eos = false;
        if self.pid.is_some() {
            loop {
                if !self.host.drop_packet() {
                    // after a seek request, nothing can be trusted until the
                    // source delivers from the new position
                    if self.awaiting_seek_reply {
                        if self.host.is_eos() {
                            return Ok(ProcessStatus::EndOfStream);
                        }
                        return Ok(ProcessStatus::Active);
                    }
                    break;
                }
                self.awaiting_seek_reply = false;
            }
            if self.host.is_eos() {
                in_is_eos = true;
                self.input_fully_loaded = true;
            }
        } else if self.input_fully_loaded {
            in_is_eos = true;
        }

        if let Some(pending) = self.pending_open.take() {
            match pending {
                PendingOpen::Initial => self.setup()?,
                PendingOpen::MovieSwitch { url } => self.retry_movie_switch(url)?,
            }
            return Ok(ProcessStatus::Active);
        }

        if self.needs_fragment_refresh {
            self.refresh_fragment();
        }

        let Some(mov) = self.mov.as_mut() else {
            return Ok(if self.playing_channels() > 0 {
                ProcessStatus::Active
            } else {
                ProcessStatus::EndOfStream
            });
        };

        let mut is_active = false;
        for ch in self.channels.iter_mut() {
            if ch.play_state() != PlayState::Playing {
                continue;
            }
            is_active = true;

            while !self.host.would_block(ch.stream()) {
                match ch.fetch_sample(mov, self.input_fully_loaded) {
                    Some(sample) => {
                        let packet = ch.to_packet(sample, mov);
                        self.host.send_packet(ch.stream(), packet);
                    }
                    None if *ch.last_state() == FetchStatus::EndOfStream => {
                        if in_is_eos {
                            ch.set_play_state(PlayState::EosSignaled);
                            self.host.set_eos(ch.stream());
                        }
                        break;
                    }
                    None => break,
                }
            }
        }

        Ok(if is_active {
            ProcessStatus::Active
        } else {
            ProcessStatus::EndOfStream
        })
    }

    /// Parses newly downloaded bytes of the open fragment. Sample cursors are
    /// left untouched.
    fn refresh_fragment(&mut self) {
        let Some(mov) = self.mov.as_mut() else {
            return;
        };

        match mov.refresh_fragmented() {
            Ok(missing) => {
                debug!(
                    "[IsoMedia] Refreshing current segment - {} bytes still missing",
                    missing
                );
                if missing == 0 && self.input_fully_loaded {
                    self.needs_fragment_refresh = false;
                }
            }
            Err(ContainerError::Incomplete { missing }) => {
                debug!(
                    "[IsoMedia] Refreshing current segment - {} bytes still missing",
                    missing
                );
            }
            Err(e) => error!("[IsoMedia] Failed to refresh current segment: {}", e),
        }

        if log_enabled!(Level::Debug) {
            for ch in &self.channels {
                debug!(
                    "[IsoMedia] refresh track {} fragment - cur sample {} - new sample count {}",
                    ch.track(),
                    ch.sample_number(),
                    mov.sample_count(ch.track())
                );
            }
        }
    }
}
