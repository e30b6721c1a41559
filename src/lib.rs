#![doc(html_root_url = "https://docs.rs/isodemux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # isodemux - segmented ISOBMFF demultiplexer
//!
//! `isodemux` is the demux core of a media pipeline reading ISO base media
//! files (MP4, fragmented MP4, CMAF, smooth streaming fragments). It is built
//! for adaptive streaming, where the input keeps changing underneath the
//! reader: bytes arrive progressively, a new media segment replaces the
//! previous one, or a new initialization segment switches representations.
//!
//! ## Features
//!
//! - Progressive open with retry while the movie header is incomplete
//! - Segment switching that keeps sample cursors, movie switching that
//!   re-binds channels by track ID
//! - Scalable (SVC/L-HEVC) layer switching
//! - Track selectors on the locator (`#video`, `#trackID=2`, ...)
//! - ISMA, OMA DRM and Common Encryption metadata forwarding
//! - Byte-range seeks on partially downloaded sources
//!
//! ## Module Overview
//!
//! - `av`: packets, stream declarations and the host traits the reader talks to
//! - `format`: the ISOBMFF reader and its in-memory container backend
//! - `config`: reader options from the environment or a config file
//! - `error`: error types and the crate `Result` alias
//! - `utils`: CRC32 used for locator fingerprints
//!
//! The parsing library itself sits behind
//! [`ContainerLibrary`](format::isom::ContainerLibrary); see
//! [`format::isom`] for a complete example.

/// Audio/Video base types and host interfaces
pub mod av;

/// Error types and utilities
pub mod error;

/// Media format implementations
pub mod format;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{ContainerError, DemuxError, Result};
