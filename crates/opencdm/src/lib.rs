//! OpenCDM-compatible host adapter around the Widevine CDM shared library.
//!
//! The adapter loads the vendor CDM dynamically, implements the host
//! callback surface the library requires, and bridges the CDM's
//! asynchronous promise protocol to synchronous adapter calls: every
//! operation parks a promise keyed by id, dispatches to the CDM, and blocks
//! until the CDM resolves or rejects it from one of its own threads.
//!
//! [`System`] is the entry point (one per key system), [`Session`] a live
//! license exchange, [`SessionSink`] the caller's notification surface. The
//! C-shaped surface over these types lives in the `opencdm-ffi` crate.

mod buffer;
mod decrypt;
mod error;
pub mod guard;
mod host;
mod instance;
mod loader;
pub mod locate;
mod promise;
mod session;
mod subsample;
mod system;
mod timer;

#[cfg(test)]
mod tests;

pub use error::{Error, OpenCDMError, Result};
pub use promise::RejectedPromise;
pub use session::{KeyInfo, Session, SessionSink};
pub use system::{
    LicenseType, System, WIDEVINE_KEY_SYSTEM, WIDEVINE_UUID, init, is_type_supported,
};
pub use widevine_cdm_api::{KeyStatus, SessionType, Time};
