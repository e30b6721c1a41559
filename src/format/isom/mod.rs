//! # ISOBMFF segmented reader
//!
//! Demultiplexes ISO base media files that arrive progressively or as a
//! sequence of segments. Parsing is delegated to a [`ContainerLibrary`]; the
//! reader tracks which locator and byte range it is bound to, decides how to
//! switch when the host points it at a new segment, and pulls samples out of
//! every playing [`Channel`] once per [`process`](IsoReader::process) tick.
//!
//! ```rust
//! use isodemux::config::ReaderOptions;
//! use isodemux::format::isom::memory::{MemoryHost, MemoryLibrary, MemoryMovie, MemorySample, MemoryTrack};
//! use isodemux::format::isom::{IsoReader, MediaType, PidProperties, ReaderEvent, ReaderState};
//!
//! # fn main() -> isodemux::Result<()> {
//! let library = MemoryLibrary::new();
//! library.add_movie(
//!     "movie.mp4",
//!     MemoryMovie::new(1000).with_track(
//!         MemoryTrack::new(1, MediaType::Audio, 48000)
//!             .with_samples(vec![MemorySample::new(b"frame", 0, 1024, true)]),
//!     ),
//! );
//! let host = MemoryHost::new();
//!
//! let mut reader = IsoReader::new(library, host.clone(), ReaderOptions::default());
//! reader.configure_pid(PidProperties::new("movie.mp4").with_cached(true))?;
//! assert_eq!(reader.state(), ReaderState::Steady);
//!
//! reader.handle_event(ReaderEvent::Play { stream: 0, start_range: 0.0, end_range: -1.0, speed: 1.0 });
//! reader.process()?;
//! assert_eq!(host.packets(0).len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod container;
pub mod crypt;
pub mod locator;
pub mod memory;
pub mod process;
pub mod quality;
pub mod reader;
pub mod reconfigure;

pub use channel::{Channel, FetchStatus, PlayState};
pub use container::{
    ByteRange, CodecLayering, Container, ContainerLibrary, ContainerResult, MediaType,
    NaluExtractMode, ProtectionInfo, PsshInfo, RangeProbe, ReferenceKind, Sample,
    SampleEncryption, SampleLocation, SearchMode, SegmentFlags,
};
pub use crypt::{decode_pssh, encode_pssh, ProtectionScheme};
pub use locator::{parse_locator, IdentityChange, ParsedLocator, SourceIdentity, TrackSelection};
pub use process::ProcessStatus;
pub use quality::{switch_quality, SwitchDirection};
pub use reader::{Configured, IsoReader, PidProperties, ReaderEvent, ReaderState, SwitchKind};
pub use reconfigure::rewrite_tfdt;
