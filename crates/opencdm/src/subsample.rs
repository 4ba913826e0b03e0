//! CENC subsample descriptor parsing.
//!
//! A descriptor stream is `n` big-endian records of `u16 clear_bytes`
//! followed by `u32 cipher_bytes`, six bytes per record.

use widevine_cdm_api::SubsampleEntry;

use crate::error::{Error, Result};

const RECORD_LEN: usize = 6;

pub(crate) fn parse_subsamples(data: &[u8], count: u32) -> Result<Vec<SubsampleEntry>> {
    if count < 1 {
        return Err(Error::EmptySubsamples);
    }
    let expected = count as usize * RECORD_LEN;
    if data.len() < expected {
        return Err(Error::TruncatedSubsamples {
            expected,
            actual: data.len(),
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    for record in data[..expected].chunks_exact(RECORD_LEN) {
        let clear = u16::from_be_bytes([record[0], record[1]]);
        let cipher = u32::from_be_bytes([record[2], record[3], record[4], record[5]]);
        entries.push(SubsampleEntry {
            clear_bytes: u32::from(clear),
            cipher_bytes: cipher,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(entries: &[(u16, u32)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(entries.len() * RECORD_LEN);
        for (clear, cipher) in entries {
            out.extend_from_slice(&clear.to_be_bytes());
            out.extend_from_slice(&cipher.to_be_bytes());
        }
        out
    }

    #[test]
    fn parses_encoded_records_back() {
        let records = [(2u16, 4u32), (1, 3), (0, 0x0102_0304)];
        let data = encode(&records);
        let entries = parse_subsamples(&data, records.len() as u32).expect("parse");
        assert_eq!(entries.len(), records.len());
        for (entry, (clear, cipher)) in entries.iter().zip(records) {
            assert_eq!(entry.clear_bytes, u32::from(clear));
            assert_eq!(entry.cipher_bytes, cipher);
        }
    }

    #[test]
    fn ignores_trailing_bytes_past_declared_count() {
        let mut data = encode(&[(7, 9)]);
        data.extend_from_slice(&[0xAA; 4]);
        let entries = parse_subsamples(&data, 1).expect("parse");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].clear_bytes, 7);
        assert_eq!(entries[0].cipher_bytes, 9);
    }

    #[test]
    fn fails_on_truncated_stream() {
        let data = encode(&[(2, 4)]);
        let err = parse_subsamples(&data[..5], 1).expect_err("truncated");
        assert!(matches!(err, Error::TruncatedSubsamples { expected: 6, actual: 5 }));

        let err = parse_subsamples(&data, 2).expect_err("short for two records");
        assert!(matches!(err, Error::TruncatedSubsamples { expected: 12, actual: 6 }));
    }

    #[test]
    fn fails_on_zero_count() {
        assert!(matches!(
            parse_subsamples(&[], 0),
            Err(Error::EmptySubsamples)
        ));
    }
}
