//! System-level adapter entry points.

use core::ffi::{c_char, c_void};
use std::sync::Arc;

use opencdm::guard::guard_with_default;
use opencdm::{LicenseType, OpenCDMError, System};
use tracing::warn;

use crate::{
    CallbackSink, OpenCDMSession, OpenCDMSessionCallbacks, OpenCDMSystem, code_of, copy_c_str,
    session_handle, slice_from,
};

fn system_ref<'a>(system: *const OpenCDMSystem) -> Option<&'a OpenCDMSystem> {
    if system.is_null() {
        return None;
    }
    // SAFETY: the handle came from `opencdm_create_system` and has not been
    // destructed.
    Some(unsafe { &*system })
}

/// Whether the key system (by name or UUID) is supported; the MIME type is
/// not inspected.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_is_type_supported(
    key_system: *const c_char,
    mime_type: *const c_char,
) -> OpenCDMError {
    guard_with_default("opencdm_is_type_supported", OpenCDMError::Fail, || {
        let Some(key_system) = copy_c_str(key_system) else {
            return OpenCDMError::KeySystemNotSupported;
        };
        let mime_type = copy_c_str(mime_type).unwrap_or_default();
        code_of(
            "is_type_supported",
            opencdm::is_type_supported(&key_system, &mime_type),
        )
    })
}

/// Locate, load and initialize the CDM module. Idempotent.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_init() -> OpenCDMError {
    guard_with_default("opencdm_init", OpenCDMError::Fail, || {
        code_of("init", opencdm::init())
    })
}

/// Create a system bound to a fresh CDM instance; null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_create_system(key_system: *const c_char) -> *mut OpenCDMSystem {
    guard_with_default("opencdm_create_system", std::ptr::null_mut(), || {
        let Some(key_system) = copy_c_str(key_system) else {
            return std::ptr::null_mut();
        };
        match System::create(&key_system) {
            Ok(system) => Box::into_raw(Box::new(OpenCDMSystem { system })),
            Err(e) => {
                warn!(target: "opencdm::ffi", "create_system failed: {e}");
                std::ptr::null_mut()
            },
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn opencdm_destruct_system(system: *mut OpenCDMSystem) -> OpenCDMError {
    guard_with_default("opencdm_destruct_system", OpenCDMError::None, || {
        if !system.is_null() {
            // SAFETY: ownership came from `opencdm_create_system`; released
            // exactly once here.
            drop(unsafe { Box::from_raw(system) });
        }
        OpenCDMError::None
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn opencdm_system_supports_server_certificate(
    system: *mut OpenCDMSystem,
) -> bool {
    guard_with_default("opencdm_system_supports_server_certificate", false, || {
        system_ref(system)
            .map(|handle| handle.system.supports_server_certificate())
            .unwrap_or(false)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn opencdm_system_set_server_certificate(
    system: *mut OpenCDMSystem,
    server_certificate: *const u8,
    server_certificate_length: u16,
) -> OpenCDMError {
    guard_with_default(
        "opencdm_system_set_server_certificate",
        OpenCDMError::Fail,
        || {
            let Some(handle) = system_ref(system) else {
                return OpenCDMError::InvalidArg;
            };
            let certificate =
                slice_from(server_certificate, server_certificate_length as usize);
            code_of(
                "set_server_certificate",
                handle.system.set_server_certificate(certificate),
            )
        },
    )
}

/// Borrowed handle to the first session holding `key_id`; `wait_time` is
/// accepted for API compatibility and ignored.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_get_system_session(
    system: *mut OpenCDMSystem,
    key_id: *const u8,
    key_id_length: u8,
    _wait_time: u32,
) -> *mut OpenCDMSession {
    guard_with_default("opencdm_get_system_session", std::ptr::null_mut(), || {
        let Some(handle) = system_ref(system) else {
            return std::ptr::null_mut();
        };
        let key_id = slice_from(key_id, key_id_length as usize);
        match handle.system.session_for_key(key_id) {
            Some(session) => session_handle(&session),
            None => std::ptr::null_mut(),
        }
    })
}

/// Establish a license session. `cdm_data` is accepted for API
/// compatibility and ignored. On success `*session` receives an owned
/// handle.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_construct_session(
    system: *mut OpenCDMSystem,
    license_type: LicenseType,
    init_data_type: *const c_char,
    init_data: *const u8,
    init_data_length: u16,
    _cdm_data: *const u8,
    _cdm_data_length: u16,
    callbacks: *mut OpenCDMSessionCallbacks,
    user_data: *mut c_void,
    session: *mut *mut OpenCDMSession,
) -> OpenCDMError {
    guard_with_default("opencdm_construct_session", OpenCDMError::Fail, || {
        let Some(handle) = system_ref(system) else {
            return OpenCDMError::InvalidArg;
        };
        if session.is_null() {
            return OpenCDMError::InvalidArg;
        }
        let Some(init_data_type) = copy_c_str(init_data_type) else {
            return OpenCDMError::InvalidArg;
        };
        let callbacks = if callbacks.is_null() {
            OpenCDMSessionCallbacks::default()
        } else {
            // SAFETY: the caller passes a valid callbacks struct; it is
            // copied, not retained.
            unsafe { *callbacks }
        };
        let init_data = slice_from(init_data, init_data_length as usize);
        let sink = Box::new(CallbackSink::new(callbacks, user_data));

        match handle
            .system
            .construct_session(license_type, &init_data_type, init_data, sink)
        {
            Ok(new_session) => {
                // SAFETY: `session` is a valid out pointer per the contract.
                unsafe {
                    *session = Arc::into_raw(new_session) as *mut OpenCDMSession;
                }
                OpenCDMError::None
            },
            Err(e) => {
                warn!(target: "opencdm::ffi", "construct_session failed: {e}");
                e.open_cdm_error()
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn type_support_filter_over_c_strings() {
        let widevine = CString::new("com.widevine.alpha").unwrap();
        let uuid = CString::new("edef8ba9-79d6-4ace-a3c8-27dcd51d21ed").unwrap();
        let clearkey = CString::new("org.w3.clearkey").unwrap();
        let mime = CString::new("video/mp4").unwrap();

        assert_eq!(
            opencdm_is_type_supported(widevine.as_ptr(), mime.as_ptr()),
            OpenCDMError::None
        );
        assert_eq!(
            opencdm_is_type_supported(uuid.as_ptr(), std::ptr::null()),
            OpenCDMError::None
        );
        assert_eq!(
            opencdm_is_type_supported(clearkey.as_ptr(), mime.as_ptr()),
            OpenCDMError::KeySystemNotSupported
        );
        assert_eq!(
            opencdm_is_type_supported(std::ptr::null(), std::ptr::null()),
            OpenCDMError::KeySystemNotSupported
        );
    }

    #[test]
    fn destructing_a_null_system_is_ok() {
        assert_eq!(
            opencdm_destruct_system(std::ptr::null_mut()),
            OpenCDMError::None
        );
    }

    #[test]
    fn null_system_handles_fail_cleanly() {
        assert!(!opencdm_system_supports_server_certificate(std::ptr::null_mut()));
        assert_eq!(
            opencdm_system_set_server_certificate(std::ptr::null_mut(), std::ptr::null(), 0),
            OpenCDMError::InvalidArg
        );
        assert!(
            opencdm_get_system_session(std::ptr::null_mut(), std::ptr::null(), 0, 0).is_null()
        );
    }
}
