//! Payload fingerprints
//!
//! The runtime compares fingerprints of compiled payloads to decide whether a
//! target needs a host reload at all.

/// Compute CRC32 (IEEE 802.3 polynomial).
pub fn crc32(data: &[u8]) -> u32 {
    static CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut j = 0;
            while j < 8 {
                c = if c & 1 != 0 {
                    0xedb88320 ^ (c >> 1)
                } else {
                    c >> 1
                };
                j += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    let mut crc = 0xffffffff_u32;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
    }
    crc ^ 0xffffffff
}

/// Fingerprint of a serialized payload.
#[inline]
pub fn fingerprint(payload: &str) -> u32 {
    crc32(payload.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xcbf43926);
    }

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn fingerprint_detects_payload_changes() {
        let a = r#"[{"trigger":{"url-filter":"a"},"action":{"type":"block"}}]"#;
        let b = r#"[{"trigger":{"url-filter":"b"},"action":{"type":"block"}}]"#;
        assert_eq!(fingerprint(a), fingerprint(a));
        assert_ne!(fingerprint(a), fingerprint(b));
    }
}
