//! Session-level adapter entry points.

use core::ffi::c_char;
use std::sync::Arc;

use opencdm::OpenCDMError;
use opencdm::guard::guard_with_default;

use crate::{KeyStatus, OpenCDMSession, code_of, key_status_from_cdm, session_ref, slice_from};

/// Release the caller's session reference. The session object stays alive
/// while the owning system still maps it.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_destruct_session(session: *mut OpenCDMSession) -> OpenCDMError {
    guard_with_default("opencdm_destruct_session", OpenCDMError::None, || {
        if !session.is_null() {
            // SAFETY: ownership came from `opencdm_construct_session`;
            // released exactly once here.
            drop(unsafe { Arc::from_raw(session as *const OpenCDMSession) });
        }
        OpenCDMError::None
    })
}

/// The CDM-generated session id as a NUL-terminated string, valid for the
/// session's lifetime.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_session_id(session: *const OpenCDMSession) -> *const c_char {
    guard_with_default("opencdm_session_id", std::ptr::null(), || {
        match session_ref(session) {
            Some(session) => session.id_cstr().as_ptr(),
            None => std::ptr::null(),
        }
    })
}

/// Latest delivered status for `key_id`; pending when the CDM has not
/// reported the key yet.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_session_status(
    session: *const OpenCDMSession,
    key_id: *const u8,
    length: u8,
) -> KeyStatus {
    guard_with_default("opencdm_session_status", KeyStatus::InternalError, || {
        match session_ref(session) {
            Some(session) => {
                let key_id = slice_from(key_id, length as usize);
                key_status_from_cdm(session.key_status(key_id))
            },
            None => KeyStatus::InternalError,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn opencdm_session_has_key_id(
    session: *mut OpenCDMSession,
    length: u8,
    key_id: *const u8,
) -> u32 {
    guard_with_default("opencdm_session_has_key_id", 0, || {
        match session_ref(session) {
            Some(session) => session.has_key(slice_from(key_id, length as usize)) as u32,
            None => 0,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn opencdm_session_load(session: *mut OpenCDMSession) -> OpenCDMError {
    guard_with_default("opencdm_session_load", OpenCDMError::Fail, || {
        match session_ref(session) {
            Some(session) => code_of("session_load", session.load()),
            None => OpenCDMError::InvalidSession,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn opencdm_session_update(
    session: *mut OpenCDMSession,
    key_message: *const u8,
    key_length: u16,
) -> OpenCDMError {
    guard_with_default("opencdm_session_update", OpenCDMError::Fail, || {
        match session_ref(session) {
            Some(session) => {
                let message = slice_from(key_message, key_length as usize);
                code_of("session_update", session.update(message))
            },
            None => OpenCDMError::InvalidSession,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn opencdm_session_remove(session: *mut OpenCDMSession) -> OpenCDMError {
    guard_with_default("opencdm_session_remove", OpenCDMError::Fail, || {
        match session_ref(session) {
            Some(session) => code_of("session_remove", session.remove()),
            None => OpenCDMError::InvalidSession,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn opencdm_session_close(session: *mut OpenCDMSession) -> OpenCDMError {
    guard_with_default("opencdm_session_close", OpenCDMError::Fail, || {
        match session_ref(session) {
            Some(session) => code_of("session_close", session.close()),
            None => OpenCDMError::InvalidSession,
        }
    })
}

/// Decrypt a CENC sample in place. The buffer, descriptor, IV and key-id
/// pointers are the caller's mapped views; `init_with_last_15` is accepted
/// for API compatibility and ignored.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn opencdm_gstreamer_session_decrypt(
    session: *mut OpenCDMSession,
    buffer: *mut u8,
    buffer_length: u32,
    subsample_data: *const u8,
    subsample_data_length: u32,
    subsample_count: u32,
    iv: *const u8,
    iv_length: u32,
    key_id: *const u8,
    key_id_length: u32,
    _init_with_last_15: u32,
) -> OpenCDMError {
    guard_with_default("opencdm_gstreamer_session_decrypt", OpenCDMError::Fail, || {
        let Some(session) = session_ref(session) else {
            return OpenCDMError::InvalidSession;
        };
        if buffer.is_null() {
            return OpenCDMError::InvalidArg;
        }
        // SAFETY: the caller maps `buffer` writable for `buffer_length`
        // bytes for the duration of the call.
        let sample = unsafe { std::slice::from_raw_parts_mut(buffer, buffer_length as usize) };
        let subsamples = slice_from(subsample_data, subsample_data_length as usize);
        let iv = slice_from(iv, iv_length as usize);
        let key_id = slice_from(key_id, key_id_length as usize);
        code_of(
            "session_decrypt",
            session.decrypt(sample, subsamples, subsample_count, iv, key_id),
        )
    })
}
