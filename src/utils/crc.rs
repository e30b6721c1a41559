/// CRC32 with the MPEG-2 parameters (ITU-T H.222.0 / ISO/IEC 13818-1).
/// Polynomial: x32 + x26 + x23 + x22 + x16 + x12 + x11 + x10 + x8 + x7 + x5 + x4 + x2 + x + 1
/// Initial value: 0xFFFFFFFF, no reflection, no final xor.
const CRC32_MPEG2: u32 = 0x04C11DB7;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if (crc & 0x80000000) != 0 {
                (crc << 1) ^ CRC32_MPEG2
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Order-sensitive 32-bit checksum, used to fingerprint source locators.
///
/// # Examples
///
/// ```
/// use isodemux::utils::Crc32Mpeg2;
///
/// assert_eq!(Crc32Mpeg2::checksum(&[0x01, 0x01]), 0xD66FB816);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Crc32Mpeg2 {
    crc: u32,
}

impl Crc32Mpeg2 {
    pub fn new() -> Self {
        Self { crc: 0xFFFFFFFF }
    }

    /// Feeds more bytes into the running checksum.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.crc >> 24) ^ (byte as u32)) & 0xFF;
            self.crc = (self.crc << 8) ^ TABLE[index as usize];
        }
    }

    pub fn finish(&self) -> u32 {
        self.crc
    }

    /// One-shot checksum of `data`.
    pub fn checksum(data: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.update(data);
        crc.finish()
    }
}

impl Default for Crc32Mpeg2 {
    fn default() -> Self {
        Self::new()
    }
}
