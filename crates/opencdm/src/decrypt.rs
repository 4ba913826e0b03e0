//! Routing of encrypted sample buffers through the CDM's `Decrypt` call.
//!
//! With no subsample descriptors the whole sample is one ciphertext span.
//! With descriptors, each `{clear, cipher}` pair scopes its own `Decrypt`
//! call to the cipher slice and the cleartext is copied back in place, so
//! the total buffer length never changes.

use tracing::warn;
use widevine_cdm_api::{EncryptionScheme, InputBuffer2, Pattern, Status};

use crate::buffer::OwnedDecryptedBlock;
use crate::error::{Error, Result};
use crate::instance::CdmInstance;
use crate::subsample::parse_subsamples;

pub(crate) fn decrypt_buffer(
    cdm: &CdmInstance,
    buffer: &mut [u8],
    subsamples: &[u8],
    subsample_count: u32,
    iv: &[u8],
    key_id: &[u8],
) -> Result<()> {
    if subsample_count < 1 {
        return decrypt_span(cdm, buffer, iv, key_id);
    }

    let entries = parse_subsamples(subsamples, subsample_count)?;
    let sample_len = buffer.len();
    let mut position = 0usize;
    for entry in entries {
        let clear = entry.clear_bytes as usize;
        let cipher = entry.cipher_bytes as usize;
        let span_len = clear + cipher;
        let span = buffer
            .get_mut(position..position + span_len)
            .ok_or(Error::SubsampleOutOfBounds {
                offset: position,
                len: span_len,
                sample_len,
            })?;
        if cipher > 0 {
            decrypt_span(cdm, &mut span[clear..], iv, key_id)?;
        }
        position += span_len;
    }
    Ok(())
}

/// Run one ciphertext span through `Decrypt` and copy the cleartext back
/// over it.
fn decrypt_span(cdm: &CdmInstance, span: &mut [u8], iv: &[u8], key_id: &[u8]) -> Result<()> {
    let input = InputBuffer2 {
        data: span.as_ptr(),
        data_size: span.len() as u32,
        encryption_scheme: EncryptionScheme::Cenc,
        key_id: key_id.as_ptr(),
        key_id_size: key_id.len() as u32,
        iv: iv.as_ptr(),
        iv_size: iv.len() as u32,
        subsamples: std::ptr::null(),
        num_subsamples: 0,
        pattern: Pattern {
            crypt_byte_block: 0,
            skip_byte_block: 0,
        },
        timestamp: 0,
    };

    let mut block = OwnedDecryptedBlock::new();
    let status = cdm.decrypt(&input, block.as_raw());
    match status {
        Status::SUCCESS => {
            let cleartext = block.payload();
            if cleartext.len() != span.len() {
                warn!(
                    target: "opencdm::decrypt",
                    ciphertext = span.len(),
                    cleartext = cleartext.len(),
                    "cdm returned a different cleartext length"
                );
            }
            let n = cleartext.len().min(span.len());
            span[..n].copy_from_slice(&cleartext[..n]);
            Ok(())
        },
        Status::NEED_MORE_DATA => Err(Error::NeedMoreData),
        Status::NO_KEY => Err(Error::NoKey),
        other => Err(Error::DecryptFailed(other.0)),
    }
}
