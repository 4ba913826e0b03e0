//! Adapter-level license sessions.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::{Mutex, Weak};

use tracing::debug;
use widevine_cdm_api::{KeyStatus, SessionType, Time};

use crate::error::Result;
use crate::system::SystemShared;

/// Latest key-status record delivered for one key id.
#[derive(Debug, Clone)]
pub struct KeyInfo {
    pub key_id: Vec<u8>,
    pub status: KeyStatus,
    pub system_code: u32,
}

/// Notification sink a caller attaches to a session. Invoked from CDM
/// threads; implementations must be thread-safe and must not block on
/// adapter operations of the same session.
pub trait SessionSink: Send + Sync {
    /// A license request (challenge) to forward to the license server.
    fn challenge(&self, session: &Session, payload: &[u8]);

    /// The status of `key_id` changed; query the session for the new value.
    fn key_updated(&self, session: &Session, key_id: &[u8]);

    /// Trailing notification after a batch of `key_updated` calls.
    fn keys_updated(&self, session: &Session);

    /// A CDM-side failure report for an operation on this session.
    fn error(&self, session: &Session, message: &str);
}

pub struct Session {
    id: String,
    // Stable NUL-terminated copy handed across the adapter boundary.
    id_c: CString,
    session_type: SessionType,
    expiration: Mutex<Time>,
    system: Weak<SystemShared>,
    sink: Box<dyn SessionSink>,
    keys: Mutex<HashMap<Vec<u8>, KeyInfo>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("session_type", &self.session_type)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: String,
        session_type: SessionType,
        system: Weak<SystemShared>,
        sink: Box<dyn SessionSink>,
    ) -> Self {
        let id_c = CString::new(id.as_bytes()).unwrap_or_default();
        Self {
            id,
            id_c,
            session_type,
            expiration: Mutex::new(0.0),
            system,
            sink,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// The CDM-generated session id, stable for the session's lifetime.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_cstr(&self) -> &CStr {
        &self.id_c
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    /// License expiration in wall-clock seconds; 0 until the CDM reports
    /// one.
    pub fn expiration(&self) -> Time {
        *self.expiration.lock().expect("expiration poisoned")
    }

    pub(crate) fn set_expiration(&self, expiration: Time) {
        *self.expiration.lock().expect("expiration poisoned") = expiration;
    }

    /// Latest delivered status for `key_id`; a key the CDM has not reported
    /// yet is pending.
    pub fn key_status(&self, key_id: &[u8]) -> KeyStatus {
        self.key_info(key_id)
            .map(|info| info.status)
            .unwrap_or(KeyStatus::STATUS_PENDING)
    }

    pub fn key_info(&self, key_id: &[u8]) -> Option<KeyInfo> {
        self.keys
            .lock()
            .expect("key table poisoned")
            .get(key_id)
            .cloned()
    }

    pub fn has_key(&self, key_id: &[u8]) -> bool {
        self.keys
            .lock()
            .expect("key table poisoned")
            .contains_key(key_id)
    }

    /// Merge an `OnSessionKeysChange` delivery into the key table, then
    /// notify: one `key_updated` per key, one trailing `keys_updated`.
    pub(crate) fn on_key_update(&self, keys: Vec<KeyInfo>) {
        {
            let mut table = self.keys.lock().expect("key table poisoned");
            for key in &keys {
                table.insert(key.key_id.clone(), key.clone());
            }
        }
        for key in &keys {
            self.sink.key_updated(self, &key.key_id);
        }
        self.sink.keys_updated(self);
    }

    pub(crate) fn error_message(&self, message: &str) {
        self.sink.error(self, message);
    }

    pub(crate) fn license_request(&self, payload: &[u8]) {
        self.sink.challenge(self, payload);
    }

    pub(crate) fn license_renewal(&self, payload: &[u8]) {
        debug!(target: "opencdm::session", id = %self.id, bytes = payload.len(), "license renewal message");
    }

    pub(crate) fn license_release(&self, payload: &[u8]) {
        debug!(target: "opencdm::session", id = %self.id, bytes = payload.len(), "license release message");
    }

    pub(crate) fn individualization_request(&self, payload: &[u8]) {
        debug!(target: "opencdm::session", id = %self.id, bytes = payload.len(), "individualization request");
    }

    fn system(&self) -> Result<std::sync::Arc<SystemShared>> {
        self.system.upgrade().ok_or(crate::Error::SystemGone)
    }

    /// Load a persisted session state into the CDM.
    pub fn load(&self) -> Result<()> {
        self.system()?.load_session(self)
    }

    /// Feed a license-server response into the CDM.
    pub fn update(&self, response: &[u8]) -> Result<()> {
        self.system()?.update_session(self, response)
    }

    /// Remove the session's persisted state.
    pub fn remove(&self) -> Result<()> {
        self.system()?.remove_session(self)
    }

    /// Close the session with the CDM and drop it from the session map.
    pub fn close(&self) -> Result<()> {
        self.system()?.close_session(self)
    }

    /// Decrypt a CENC sample in place. See [`crate::System::decrypt`].
    pub fn decrypt(
        &self,
        buffer: &mut [u8],
        subsamples: &[u8],
        subsample_count: u32,
        iv: &[u8],
        key_id: &[u8],
    ) -> Result<()> {
        self.system()?
            .decrypt(buffer, subsamples, subsample_count, iv, key_id)
    }
}
