//! Protection scheme detection and protection-system init data serialization.
//!
//! Serialized PSSH buffer layout (big-endian, no padding):
//!   u32       entry count
//!   per entry:
//!     [16]    system ID
//!     u32     key ID count
//!     [16]*n  key IDs
//!     u32     private data size
//!     [..]    private data

use super::container::{Container, ProtectionInfo, PsshInfo};
use crate::error::{DemuxError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Protection schemes, in the order they are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionScheme {
    /// ISMA / legacy sample encryption.
    Isma,
    /// OMA DRM rights-managed encryption.
    OmaDrm,
    /// ISO common encryption.
    Cenc,
}

/// Finds the protection scheme of the first sample description of `track`.
pub fn probe_protection<C: Container + ?Sized>(
    container: &C,
    track: u32,
) -> Option<(ProtectionScheme, ProtectionInfo)> {
    if let Some(info) = container.ismacryp_info(track, 1) {
        return Some((ProtectionScheme::Isma, info));
    }
    if let Some(info) = container.omadrm_info(track, 1) {
        return Some((ProtectionScheme::OmaDrm, info));
    }
    container
        .cenc_info(track, 1)
        .map(|info| (ProtectionScheme::Cenc, info))
}

/// Collects every PSSH of the movie, in declaration order.
pub fn collect_pssh<C: Container + ?Sized>(container: &C) -> Vec<PsshInfo> {
    (1..=container.pssh_count())
        .filter_map(|index| container.pssh(index))
        .collect()
}

pub fn encoded_len(entries: &[PsshInfo]) -> usize {
    4 + entries
        .iter()
        .map(|entry| 16 + 4 + entry.key_ids.len() * 16 + 4 + entry.private_data.len())
        .sum::<usize>()
}

/// Serializes PSSH entries into one opaque buffer.
pub fn encode_pssh(entries: &[PsshInfo]) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(entries));
    buf.put_u32(entries.len() as u32);
    for entry in entries {
        buf.put_slice(&entry.system_id);
        buf.put_u32(entry.key_ids.len() as u32);
        for kid in &entry.key_ids {
            buf.put_slice(kid);
        }
        buf.put_u32(entry.private_data.len() as u32);
        buf.put_slice(&entry.private_data);
    }
    buf.freeze()
}

/// Parses a buffer produced by [`encode_pssh`].
pub fn decode_pssh(mut buf: Bytes) -> Result<Vec<PsshInfo>> {
    let count = read_u32(&mut buf, "entry count")?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let system_id = read_id(&mut buf, "system ID")?;
        let kid_count = read_u32(&mut buf, "key ID count")? as usize;
        check_remaining(&buf, kid_count.saturating_mul(16), "key IDs")?;
        let mut key_ids = Vec::with_capacity(kid_count);
        for _ in 0..kid_count {
            key_ids.push(read_id(&mut buf, "key ID")?);
        }
        let size = read_u32(&mut buf, "private data size")? as usize;
        check_remaining(&buf, size, "private data")?;
        let private_data = buf.split_to(size);
        entries.push(PsshInfo {
            system_id,
            key_ids,
            private_data,
        });
    }
    if buf.has_remaining() {
        return Err(DemuxError::InvalidData(format!(
            "{} trailing bytes after PSSH entries",
            buf.remaining()
        )));
    }
    Ok(entries)
}

fn check_remaining(buf: &Bytes, needed: usize, field: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(DemuxError::InvalidData(format!(
            "PSSH buffer too short for {}: need {}, have {}",
            field,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_u32(buf: &mut Bytes, field: &str) -> Result<u32> {
    check_remaining(buf, 4, field)?;
    Ok(buf.get_u32())
}

fn read_id(buf: &mut Bytes, field: &str) -> Result<[u8; 16]> {
    check_remaining(buf, 16, field)?;
    let mut id = [0u8; 16];
    buf.copy_to_slice(&mut id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    const WIDEVINE: [u8; 16] = [
        0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21,
        0xed,
    ];

    #[test]
    fn test_encode_layout() {
        let entries = vec![PsshInfo {
            system_id: WIDEVINE,
            key_ids: vec![[0x11; 16]],
            private_data: Bytes::from_static(&[1, 2, 3]),
        }];
        let buf = encode_pssh(&entries);
        assert_eq!(buf.len(), encoded_len(&entries));
        assert_eq!(&buf[..4], &[0, 0, 0, 1]);
        assert_eq!(&buf[4..20], &WIDEVINE);
        assert_eq!(&buf[20..24], &[0, 0, 0, 1]);
        assert_eq!(&buf[24..40], &[0x11; 16]);
        assert_eq!(&buf[40..44], &[0, 0, 0, 3]);
        assert_eq!(&buf[44..], &[1, 2, 3]);
    }

    #[test]
    fn test_empty_list() {
        let buf = encode_pssh(&[]);
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
        assert!(decode_pssh(buf).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_buffer() {
        let entries = vec![PsshInfo {
            system_id: WIDEVINE,
            key_ids: vec![],
            private_data: Bytes::from_static(b"data"),
        }];
        let buf = encode_pssh(&entries);
        let truncated = buf.slice(..buf.len() - 1);
        assert!(matches!(decode_pssh(truncated), Err(DemuxError::InvalidData(_))));
    }

    #[test]
    fn test_huge_kid_count_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_slice(&WIDEVINE);
        buf.put_u32(u32::MAX);
        assert!(decode_pssh(buf.freeze()).is_err());
    }

    #[derive(Debug, Clone)]
    struct Entries(Vec<PsshInfo>);

    impl Arbitrary for Entries {
        fn arbitrary(g: &mut Gen) -> Self {
            let count = usize::arbitrary(g) % 4;
            let entries = (0..count)
                .map(|_| {
                    let kid_count = usize::arbitrary(g) % 3;
                    PsshInfo {
                        system_id: id(g),
                        key_ids: (0..kid_count).map(|_| id(g)).collect(),
                        private_data: Bytes::from(Vec::<u8>::arbitrary(g)),
                    }
                })
                .collect();
            Entries(entries)
        }
    }

    fn id(g: &mut Gen) -> [u8; 16] {
        let mut id = [0u8; 16];
        for byte in id.iter_mut() {
            *byte = u8::arbitrary(g);
        }
        id
    }

    #[quickcheck]
    fn prop_pssh_round_trip(entries: Entries) -> bool {
        decode_pssh(encode_pssh(&entries.0)).map(|decoded| decoded == entries.0).unwrap_or(false)
    }
}
