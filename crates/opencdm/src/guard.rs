//! Panic guards for the FFI boundary.
//!
//! Every `extern "C"` function the CDM or an external caller can enter must
//! not unwind. These helpers centralise the `catch_unwind` boilerplate so
//! callback trampolines and adapter exports stay one-liners.

use tracing::error;

/// Extract a human-readable message from a panic payload.
pub fn panic_message(payload: Box<dyn core::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Catch panics in FFI entries that return nothing.
pub fn guard_void(op: &'static str, f: impl FnOnce()) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        let msg = panic_message(payload);
        error!(target: "opencdm::ffi", "panic in `{op}`: {msg}");
    }
}

/// Catch panics in FFI entries that return a value with a known safe
/// default.
pub fn guard_with_default<T>(op: &'static str, default: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            let msg = panic_message(payload);
            error!(target: "opencdm::ffi", "panic in `{op}`: {msg}");
            default
        },
    }
}
