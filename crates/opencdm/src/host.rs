//! The `Host_10` implementation the CDM calls back into.
//!
//! [`RawHost`] is the heap-pinned ABI object handed to the CDM (leading
//! vtable pointer, then the shared Rust state). The CDM may enter any
//! trampoline from any of its threads, so every entry is panic-guarded and
//! all dispatch state lives behind locks in [`HostState`].

use core::ffi::{c_char, c_void};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};
use widevine_cdm_api::{
    Buffer, Exception, Host10, Host10VTable, KeyInformation, KeyStatus, MessageType, QueryResult,
    Status, StreamType, Time,
};

use crate::buffer::allocate_buffer;
use crate::guard::{guard_void, guard_with_default};
use crate::instance::CdmSlot;
use crate::promise::{PendingPromise, PromiseRegistry, RejectedPromise};
use crate::session::{KeyInfo, Session};
use crate::timer::Timers;

/// Placeholder storage identifier returned to the CDM; a stable per-install
/// id would also satisfy the contract.
const STORAGE_ID: &[u8] = b"test";

/// One-shot latch for the CDM's `OnInitialized` notification. Multiple
/// callers may wait; the outcome is set once and retained.
#[derive(Default)]
pub(crate) struct InitLatch {
    started: AtomicBool,
    outcome: Mutex<Option<bool>>,
    cond: Condvar,
}

impl InitLatch {
    /// True for exactly one caller, which then owns issuing
    /// `cdm->Initialize`.
    pub(crate) fn begin(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set(&self, success: bool) {
        let mut outcome = self.outcome.lock().expect("init latch poisoned");
        if outcome.is_some() {
            warn!(target: "opencdm::host", "OnInitialized delivered more than once");
            return;
        }
        *outcome = Some(success);
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self) -> bool {
        let mut outcome = self.outcome.lock().expect("init latch poisoned");
        while outcome.is_none() {
            outcome = self.cond.wait(outcome).expect("init latch poisoned");
        }
        outcome.unwrap_or(false)
    }
}

pub(crate) struct HostState {
    pub(crate) registry: PromiseRegistry,
    pub(crate) initialized: InitLatch,
    /// The authoritative session map, keyed by CDM session id.
    pub(crate) sessions: Mutex<HashMap<String, Arc<Session>>>,
    pub(crate) cdm: Arc<CdmSlot>,
    pub(crate) timers: Timers,
}

impl HostState {
    pub(crate) fn new() -> std::io::Result<Arc<Self>> {
        let cdm = Arc::new(CdmSlot::default());
        let timers = Timers::spawn(Arc::clone(&cdm))?;
        Ok(Arc::new(Self {
            registry: PromiseRegistry::default(),
            initialized: InitLatch::default(),
            sessions: Mutex::new(HashMap::new()),
            cdm,
            timers,
        }))
    }

    pub(crate) fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(id)
            .cloned()
    }

    pub(crate) fn remove_session(&self, id: &str) {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .remove(id);
    }

    /// Detach the CDM and stop timers; called before the instance is
    /// destroyed so late callbacks and timers see no CDM.
    pub(crate) fn shutdown(&self) {
        self.cdm.take();
        self.timers.shutdown();
    }

    fn resolve_new_session(&self, promise_id: u32, session_id: &str) {
        match self.registry.take(promise_id) {
            Some(PendingPromise::CreateSession { request, tx }) => {
                let session = Arc::new(Session::new(
                    session_id.to_string(),
                    request.session_type,
                    request.system,
                    request.sink,
                ));
                self.sessions
                    .lock()
                    .expect("session map poisoned")
                    .insert(session_id.to_string(), Arc::clone(&session));
                debug!(target: "opencdm::host", promise_id, session_id, "create-session resolved");
                if tx.send(Ok(session)).is_err() {
                    warn!(target: "opencdm::host", promise_id, "create-session caller went away");
                }
            },
            Some(PendingPromise::Operation { kind, tx }) => {
                warn!(
                    target: "opencdm::host",
                    promise_id,
                    "session id delivered to a {} promise",
                    kind.as_str()
                );
                let _ = tx.send(Ok(()));
            },
            None => {
                warn!(target: "opencdm::host", promise_id, session_id, "no promise registered");
            },
        }
    }

    fn resolve(&self, promise_id: u32) {
        match self.registry.take(promise_id) {
            Some(PendingPromise::Operation { tx, .. }) => {
                debug!(target: "opencdm::host", promise_id, "promise resolved");
                let _ = tx.send(Ok(()));
            },
            Some(PendingPromise::CreateSession { tx, .. }) => {
                // A create-session promise must resolve with a session id;
                // answer with a rejection so the caller never hangs.
                warn!(
                    target: "opencdm::host",
                    promise_id, "create-session promise resolved without a session id"
                );
                let _ = tx.send(Err(RejectedPromise {
                    id: promise_id,
                    exception: Exception::INVALID_STATE_ERROR,
                    system_code: 0,
                    message: "promise resolved without a session id".to_string(),
                }));
            },
            None => {
                warn!(target: "opencdm::host", promise_id, "no matching promise found");
            },
        }
    }

    fn reject(&self, rejection: RejectedPromise) {
        warn!(
            target: "opencdm::host",
            promise_id = rejection.id,
            exception = rejection.exception.0,
            system_code = rejection.system_code,
            message = %rejection.message,
            "promise rejected"
        );
        match self.registry.take(rejection.id) {
            Some(PendingPromise::Operation { tx, .. }) => {
                let _ = tx.send(Err(rejection));
            },
            Some(PendingPromise::CreateSession { tx, .. }) => {
                let _ = tx.send(Err(rejection));
            },
            None => {
                warn!(
                    target: "opencdm::host",
                    promise_id = rejection.id,
                    "no matching promise found"
                );
            },
        }
    }

    fn route_message(&self, session_id: &str, message_type: MessageType, payload: &[u8]) {
        let Some(session) = self.session(session_id) else {
            warn!(target: "opencdm::host", session_id, "message for unknown session dropped");
            return;
        };
        match message_type {
            MessageType::LICENSE_REQUEST => session.license_request(payload),
            MessageType::LICENSE_RENEWAL => session.license_renewal(payload),
            MessageType::LICENSE_RELEASE => session.license_release(payload),
            MessageType::INDIVIDUALIZATION_REQUEST => session.individualization_request(payload),
            other => {
                warn!(
                    target: "opencdm::host",
                    session_id,
                    message_type = other.0,
                    "unknown message type dropped"
                );
            },
        }
    }

    fn keys_change(&self, session_id: &str, keys: Vec<KeyInfo>) {
        match self.session(session_id) {
            Some(session) => session.on_key_update(keys),
            None => {
                warn!(target: "opencdm::host", session_id, "keys change for unknown session");
            },
        }
    }

    fn expiration_change(&self, session_id: &str, expiration: Time) {
        match self.session(session_id) {
            Some(session) => session.set_expiration(expiration),
            None => {
                warn!(target: "opencdm::host", session_id, "expiration for unknown session");
            },
        }
    }

    fn session_closed(&self, session_id: &str) {
        debug!(target: "opencdm::host", session_id, "session closed by cdm");
        self.remove_session(session_id);
    }
}

/// The ABI object handed to the CDM: a leading vtable pointer followed by
/// the shared host state.
#[repr(C)]
pub(crate) struct RawHost {
    raw: Host10,
    state: Arc<HostState>,
}

// SAFETY: the vtable pointer is a 'static immutable table and the state is
// Send + Sync; the object itself is pinned in a Box for its lifetime.
unsafe impl Send for RawHost {}
unsafe impl Sync for RawHost {}

impl RawHost {
    pub(crate) fn new(state: Arc<HostState>) -> Box<Self> {
        Box::new(Self {
            raw: Host10 {
                vtable: &HOST_VTABLE,
            },
            state,
        })
    }

    pub(crate) fn as_host10(&mut self) -> *mut Host10 {
        &mut self.raw as *mut Host10
    }
}

fn wall_time_now() -> Time {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Recover the shared state from the ABI object pointer.
fn host_state(this: *mut Host10) -> Option<Arc<HostState>> {
    if this.is_null() {
        return None;
    }
    // SAFETY: `this` is the `raw` field of a live RawHost; the CDM received
    // it from the host getter and the box outlives the instance.
    let host = unsafe { &*(this as *const RawHost) };
    Some(Arc::clone(&host.state))
}

/// Copy a `(ptr, len)` string the CDM owns into host memory.
fn copy_str(ptr: *const c_char, len: u32) -> String {
    if ptr.is_null() || len == 0 {
        return String::new();
    }
    // SAFETY: the CDM guarantees `ptr` addresses `len` bytes for the
    // duration of the callback.
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}

fn copy_bytes(ptr: *const u8, len: u32) -> Vec<u8> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    // SAFETY: see copy_str.
    unsafe { std::slice::from_raw_parts(ptr, len as usize) }.to_vec()
}

static HOST_VTABLE: Host10VTable = Host10VTable {
    allocate: host_allocate,
    set_timer: host_set_timer,
    get_current_wall_time: host_get_current_wall_time,
    on_initialized: host_on_initialized,
    on_resolve_key_status_promise: host_on_resolve_key_status_promise,
    on_resolve_new_session_promise: host_on_resolve_new_session_promise,
    on_resolve_promise: host_on_resolve_promise,
    on_reject_promise: host_on_reject_promise,
    on_session_message: host_on_session_message,
    on_session_keys_change: host_on_session_keys_change,
    on_expiration_change: host_on_expiration_change,
    on_session_closed: host_on_session_closed,
    send_platform_challenge: host_send_platform_challenge,
    enable_output_protection: host_enable_output_protection,
    query_output_protection_status: host_query_output_protection_status,
    on_deferred_initialization_done: host_on_deferred_initialization_done,
    create_file_io: host_create_file_io,
    request_storage_id: host_request_storage_id,
    dtor0: std::ptr::null(),
    dtor1: std::ptr::null(),
};

extern "C" fn host_allocate(_this: *mut Host10, capacity: u32) -> *mut Buffer {
    guard_with_default("Allocate", std::ptr::null_mut(), || {
        allocate_buffer(capacity)
    })
}

extern "C" fn host_set_timer(this: *mut Host10, delay_ms: i64, context: *mut c_void) {
    guard_void("SetTimer", || {
        if let Some(state) = host_state(this) {
            state.timers.schedule(delay_ms, context);
        }
    });
}

extern "C" fn host_get_current_wall_time(_this: *mut Host10) -> Time {
    guard_with_default("GetCurrentWallTime", 0.0, wall_time_now)
}

extern "C" fn host_on_initialized(this: *mut Host10, success: bool) {
    guard_void("OnInitialized", || {
        if let Some(state) = host_state(this) {
            debug!(target: "opencdm::host", success, "cdm initialized");
            state.initialized.set(success);
        }
    });
}

extern "C" fn host_on_resolve_key_status_promise(
    _this: *mut Host10,
    promise_id: u32,
    key_status: KeyStatus,
) {
    guard_void("OnResolveKeyStatusPromise", || {
        // Never parked: the adapter does not issue GetStatusForPolicy.
        if key_status != KeyStatus::USABLE {
            debug!(target: "opencdm::host", promise_id, status = key_status.0, "key status promise");
        }
    });
}

extern "C" fn host_on_resolve_new_session_promise(
    this: *mut Host10,
    promise_id: u32,
    session_id: *const c_char,
    session_id_size: u32,
) {
    guard_void("OnResolveNewSessionPromise", || {
        if let Some(state) = host_state(this) {
            let session_id = copy_str(session_id, session_id_size);
            state.resolve_new_session(promise_id, &session_id);
        }
    });
}

extern "C" fn host_on_resolve_promise(this: *mut Host10, promise_id: u32) {
    guard_void("OnResolvePromise", || {
        if let Some(state) = host_state(this) {
            state.resolve(promise_id);
        }
    });
}

extern "C" fn host_on_reject_promise(
    this: *mut Host10,
    promise_id: u32,
    exception: Exception,
    system_code: u32,
    error_message: *const c_char,
    error_message_size: u32,
) {
    guard_void("OnRejectPromise", || {
        if let Some(state) = host_state(this) {
            state.reject(RejectedPromise {
                id: promise_id,
                exception,
                system_code,
                message: copy_str(error_message, error_message_size),
            });
        }
    });
}

extern "C" fn host_on_session_message(
    this: *mut Host10,
    session_id: *const c_char,
    session_id_size: u32,
    message_type: MessageType,
    message: *const c_char,
    message_size: u32,
) {
    guard_void("OnSessionMessage", || {
        if let Some(state) = host_state(this) {
            let session_id = copy_str(session_id, session_id_size);
            let payload = copy_bytes(message as *const u8, message_size);
            state.route_message(&session_id, message_type, &payload);
        }
    });
}

extern "C" fn host_on_session_keys_change(
    this: *mut Host10,
    session_id: *const c_char,
    session_id_size: u32,
    _has_additional_usable_key: bool,
    keys_info: *const KeyInformation,
    keys_info_count: u32,
) {
    guard_void("OnSessionKeysChange", || {
        if let Some(state) = host_state(this) {
            let session_id = copy_str(session_id, session_id_size);
            let mut keys = Vec::with_capacity(keys_info_count as usize);
            if !keys_info.is_null() {
                // SAFETY: the CDM guarantees `keys_info` addresses
                // `keys_info_count` records for the duration of the callback.
                for info in
                    unsafe { std::slice::from_raw_parts(keys_info, keys_info_count as usize) }
                {
                    keys.push(KeyInfo {
                        key_id: copy_bytes(info.key_id, info.key_id_size),
                        status: info.status,
                        system_code: info.system_code,
                    });
                }
            }
            state.keys_change(&session_id, keys);
        }
    });
}

extern "C" fn host_on_expiration_change(
    this: *mut Host10,
    session_id: *const c_char,
    session_id_size: u32,
    new_expiry_time: Time,
) {
    guard_void("OnExpirationChange", || {
        if let Some(state) = host_state(this) {
            let session_id = copy_str(session_id, session_id_size);
            state.expiration_change(&session_id, new_expiry_time);
        }
    });
}

extern "C" fn host_on_session_closed(
    this: *mut Host10,
    session_id: *const c_char,
    session_id_size: u32,
) {
    guard_void("OnSessionClosed", || {
        if let Some(state) = host_state(this) {
            let session_id = copy_str(session_id, session_id_size);
            state.session_closed(&session_id);
        }
    });
}

extern "C" fn host_send_platform_challenge(
    _this: *mut Host10,
    service_id: *const c_char,
    service_id_size: u32,
    _challenge: *const c_char,
    _challenge_size: u32,
) {
    guard_void("SendPlatformChallenge", || {
        let service_id = copy_str(service_id, service_id_size);
        debug!(target: "opencdm::host", service_id, "platform challenge ignored");
    });
}

extern "C" fn host_enable_output_protection(_this: *mut Host10, desired_protection_mask: u32) {
    guard_void("EnableOutputProtection", || {
        debug!(target: "opencdm::host", mask = desired_protection_mask, "output protection request ignored");
    });
}

extern "C" fn host_query_output_protection_status(this: *mut Host10) {
    guard_void("QueryOutputProtectionStatus", || {
        if let Some(state) = host_state(this) {
            // No external outputs are modeled: report success with no links.
            if let Some(cdm) = state.cdm.get() {
                cdm.on_query_output_protection_status(QueryResult::Succeeded, 0, 0);
            }
        }
    });
}

extern "C" fn host_on_deferred_initialization_done(
    _this: *mut Host10,
    stream_type: StreamType,
    decoder_status: Status,
) {
    guard_void("OnDeferredInitializationDone", || {
        debug!(
            target: "opencdm::host",
            stream_type = stream_type.0,
            status = decoder_status.0,
            "deferred decoder initialization ignored"
        );
    });
}

extern "C" fn host_create_file_io(_this: *mut Host10, _client: *mut c_void) -> *mut c_void {
    guard_with_default("CreateFileIO", std::ptr::null_mut(), || {
        // Persistent storage is not implemented.
        std::ptr::null_mut()
    })
}

extern "C" fn host_request_storage_id(this: *mut Host10, version: u32) {
    guard_void("RequestStorageId", || {
        if let Some(state) = host_state(this)
            && let Some(cdm) = state.cdm.get()
        {
            cdm.on_storage_id(version, STORAGE_ID);
        }
    });
}
