//! Media container readers.

/// ISO base media file format (MP4, fragmented MP4, CMAF segments)
pub mod isom;
