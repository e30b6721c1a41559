//! # Utility Functions and Types
//!
//! ## CRC Calculation
//!
//! The crc module provides MPEG-2 CRC32 calculation, used to fingerprint
//! source locators:
//!
//! ```rust
//! use isodemux::utils::Crc32Mpeg2;
//!
//! let crc = Crc32Mpeg2::checksum(b"segment-1.m4s");
//! println!("CRC32: {:08x}", crc);
//! ```

/// CRC calculation implementations
pub mod crc;

pub use crc::Crc32Mpeg2;
