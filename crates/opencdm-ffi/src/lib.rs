//! C adapter surface over the `opencdm` crate.
//!
//! External applications consume these `opencdm_*` entry points with the
//! opaque handle types [`OpenCDMSystem`] and [`OpenCDMSession`]. Handle
//! contracts:
//!
//! - `opencdm_create_system` transfers ownership; release with
//!   `opencdm_destruct_system`.
//! - `opencdm_construct_session` hands out an owned session reference;
//!   release with `opencdm_destruct_session`. The session object itself
//!   stays alive while the system still maps it.
//! - `opencdm_get_system_session` returns a borrowed pointer, valid while
//!   the session remains in the system's map. It must not be destructed.
//!
//! Sample memory for decryption crosses this boundary as raw
//! pointer/length pairs; they are the mapped views of whatever media-buffer
//! type the caller uses.

mod session;
mod system;

use core::ffi::{c_char, c_void};
use std::ffi::CString;

use opencdm::{Session, SessionSink};
use tracing::warn;

pub use opencdm::{LicenseType, OpenCDMError};
pub use session::*;
pub use system::*;

/// Opaque system handle of the adapter API.
pub struct OpenCDMSystem {
    pub(crate) system: opencdm::System,
}

/// Opaque session handle of the adapter API.
pub type OpenCDMSession = Session;

/// Per-key state as surfaced by `opencdm_session_status`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Usable = 0,
    InternalError = 1,
    Expired = 2,
    OutputRestricted = 3,
    OutputDownscaled = 4,
    StatusPending = 5,
    Released = 6,
}

pub(crate) fn key_status_from_cdm(status: widevine_cdm_api::KeyStatus) -> KeyStatus {
    match status {
        widevine_cdm_api::KeyStatus::USABLE => KeyStatus::Usable,
        widevine_cdm_api::KeyStatus::EXPIRED => KeyStatus::Expired,
        widevine_cdm_api::KeyStatus::OUTPUT_RESTRICTED => KeyStatus::OutputRestricted,
        widevine_cdm_api::KeyStatus::OUTPUT_DOWNSCALED => KeyStatus::OutputDownscaled,
        widevine_cdm_api::KeyStatus::STATUS_PENDING => KeyStatus::StatusPending,
        widevine_cdm_api::KeyStatus::RELEASED => KeyStatus::Released,
        _ => KeyStatus::InternalError,
    }
}

/// Notification callbacks a caller attaches to a session. Any member may be
/// null. Callbacks are invoked from CDM threads.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCDMSessionCallbacks {
    pub process_challenge_callback: Option<
        extern "C" fn(
            session: *mut OpenCDMSession,
            user_data: *mut c_void,
            url: *const c_char,
            challenge: *const u8,
            challenge_length: u32,
        ),
    >,
    pub key_update_callback: Option<
        extern "C" fn(
            session: *mut OpenCDMSession,
            user_data: *mut c_void,
            key_id: *const u8,
            length: u8,
        ),
    >,
    pub keys_updated_callback:
        Option<extern "C" fn(session: *const OpenCDMSession, user_data: *mut c_void)>,
    pub error_message_callback: Option<
        extern "C" fn(session: *mut OpenCDMSession, user_data: *mut c_void, message: *const c_char),
    >,
    /// Reserved for output-path change notifications; never invoked by this
    /// adapter.
    pub output_type_changed_callback:
        Option<extern "C" fn(session: *mut OpenCDMSession, user_data: *mut c_void)>,
}

/// Adapts the caller's function-pointer struct to the core notification
/// trait.
pub(crate) struct CallbackSink {
    callbacks: OpenCDMSessionCallbacks,
    user_data: *mut c_void,
}

// SAFETY: the adapter contract requires caller callbacks and their user
// data to tolerate invocation from any CDM thread.
unsafe impl Send for CallbackSink {}
unsafe impl Sync for CallbackSink {}

impl CallbackSink {
    pub(crate) fn new(callbacks: OpenCDMSessionCallbacks, user_data: *mut c_void) -> Self {
        Self {
            callbacks,
            user_data,
        }
    }
}

pub(crate) fn session_handle(session: &Session) -> *mut OpenCDMSession {
    session as *const Session as *mut OpenCDMSession
}

impl SessionSink for CallbackSink {
    fn challenge(&self, session: &Session, payload: &[u8]) {
        if let Some(callback) = self.callbacks.process_challenge_callback {
            callback(
                session_handle(session),
                self.user_data,
                std::ptr::null(),
                payload.as_ptr(),
                payload.len() as u32,
            );
        }
    }

    fn key_updated(&self, session: &Session, key_id: &[u8]) {
        if let Some(callback) = self.callbacks.key_update_callback {
            callback(
                session_handle(session),
                self.user_data,
                key_id.as_ptr(),
                key_id.len() as u8,
            );
        }
    }

    fn keys_updated(&self, session: &Session) {
        if let Some(callback) = self.callbacks.keys_updated_callback {
            callback(session_handle(session), self.user_data);
        }
    }

    fn error(&self, session: &Session, message: &str) {
        if let Some(callback) = self.callbacks.error_message_callback {
            let Ok(message) = CString::new(message) else {
                warn!(target: "opencdm::ffi", "error message contains NUL, dropped");
                return;
            };
            callback(session_handle(session), self.user_data, message.as_ptr());
        }
    }
}

/// Map an adapter result to its C error code, logging failures.
pub(crate) fn code_of<T>(operation: &'static str, result: opencdm::Result<T>) -> OpenCDMError {
    match result {
        Ok(_) => OpenCDMError::None,
        Err(e) => {
            warn!(target: "opencdm::ffi", "{operation} failed: {e}");
            e.open_cdm_error()
        },
    }
}

/// Copy a NUL-terminated C string; `None` for null pointers.
pub(crate) fn copy_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the caller passes a valid NUL-terminated string.
    Some(unsafe { core::ffi::CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Borrow a `(ptr, len)` pair as a slice; empty for null pointers.
pub(crate) fn slice_from<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        return &[];
    }
    // SAFETY: the caller passes a valid buffer of `len` bytes.
    unsafe { std::slice::from_raw_parts(ptr, len) }
}

pub(crate) fn session_ref<'a>(session: *const OpenCDMSession) -> Option<&'a Session> {
    if session.is_null() {
        return None;
    }
    // SAFETY: the handle came from this adapter and is still owned by the
    // caller or the system map.
    Some(unsafe { &*session })
}
