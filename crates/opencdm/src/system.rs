//! The top-level adapter object: one [`System`] per key system, owning one
//! host object and one CDM instance.

use std::sync::Arc;

use tracing::debug;
use widevine_cdm_api::{Host10, InitDataType, SessionType};

use crate::decrypt;
use crate::error::{Error, Result};
use crate::host::{HostState, RawHost};
use crate::instance::CdmInstance;
use crate::loader;
use crate::promise::{CreateSessionRequest, OperationKind};
use crate::session::{Session, SessionSink};

pub const WIDEVINE_KEY_SYSTEM: &str = "com.widevine.alpha";
pub const WIDEVINE_UUID: &str = "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";

/// License session kinds of the adapter API.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseType {
    Temporary = 0,
    PersistentUsageRecord = 1,
    PersistentLicense = 2,
}

impl LicenseType {
    fn session_type(self) -> SessionType {
        match self {
            LicenseType::Temporary => SessionType::Temporary,
            LicenseType::PersistentUsageRecord => SessionType::PersistentUsageRecord,
            LicenseType::PersistentLicense => SessionType::PersistentLicense,
        }
    }
}

/// Only the Widevine key system (by name or UUID) is supported, regardless
/// of MIME type.
pub fn is_type_supported(key_system: &str, _mime_type: &str) -> Result<()> {
    if key_system == WIDEVINE_KEY_SYSTEM || key_system == WIDEVINE_UUID {
        Ok(())
    } else {
        Err(Error::UnsupportedKeySystem(key_system.to_string()))
    }
}

/// Load and initialize the CDM module. Idempotent: the first call pays for
/// the load, later calls return the retained outcome.
pub fn init() -> Result<()> {
    loader::module().ok_or(Error::ModuleUnavailable).map(|_| ())
}

fn init_data_type_from_name(name: &str) -> Result<InitDataType> {
    match name {
        "cenc" => Ok(InitDataType::Cenc),
        "keyids" => Ok(InitDataType::KeyIds),
        "webm" => Ok(InitDataType::WebM),
        other => Err(Error::UnknownInitDataType(other.to_string())),
    }
}

pub struct System {
    shared: Arc<SystemShared>,
}

pub(crate) struct SystemShared {
    key_system: String,
    pub(crate) state: Arc<HostState>,
    cdm: CdmInstance,
    // Pins the ABI host object the CDM holds a pointer to.
    _host: Box<RawHost>,
}

impl Drop for SystemShared {
    fn drop(&mut self) {
        // Detach the CDM from host callbacks and timers first, then release
        // the instance exactly once.
        self.state.shutdown();
        self.cdm.destroy();
    }
}

impl System {
    /// Create a system bound to a freshly created CDM instance.
    pub fn create(key_system: &str) -> Result<Self> {
        is_type_supported(key_system, "")?;
        let module = loader::module().ok_or(Error::ModuleUnavailable)?;
        Self::assemble(key_system, |host| {
            module
                .create_instance(key_system, host)
                .map_err(|e| Error::InstanceCreation(format!("{e:#}")))
        })
    }

    /// Shared assembly path: build the host object, let `create` produce the
    /// CDM instance against it, then wire the instance into the host state.
    pub(crate) fn assemble(
        key_system: &str,
        create: impl FnOnce(*mut Host10) -> Result<CdmInstance>,
    ) -> Result<Self> {
        let state =
            HostState::new().map_err(|e| Error::InstanceCreation(format!("host setup: {e}")))?;
        let mut host = RawHost::new(Arc::clone(&state));
        let cdm = create(host.as_host10())?;
        state.cdm.set(cdm);
        debug!(target: "opencdm::system", key_system, "system created");
        Ok(Self {
            shared: Arc::new(SystemShared {
                key_system: key_system.to_string(),
                state,
                cdm,
                _host: host,
            }),
        })
    }

    pub fn key_system(&self) -> &str {
        &self.shared.key_system
    }

    /// Server certificates are always accepted for Widevine.
    pub fn supports_server_certificate(&self) -> bool {
        true
    }

    /// Establish a license session: translate the init-data type, make sure
    /// the CDM is initialized, then issue
    /// `CreateSessionAndGenerateRequest` and wait for the session id.
    pub fn construct_session(
        &self,
        license_type: LicenseType,
        init_data_type_name: &str,
        init_data: &[u8],
        sink: Box<dyn SessionSink>,
    ) -> Result<Arc<Session>> {
        let init_data_type = init_data_type_from_name(init_data_type_name)?;
        let shared = &self.shared;

        if shared.state.initialized.begin() {
            debug!(target: "opencdm::system", "initializing cdm");
            shared.cdm.initialize(false, false, false);
        }
        if !shared.state.initialized.wait() {
            return Err(Error::CdmInitFailed);
        }

        let session_type = license_type.session_type();
        let promise_id = shared.state.registry.allocate();
        let rx = shared.state.registry.park_create_session(
            promise_id,
            CreateSessionRequest {
                session_type,
                sink,
                system: Arc::downgrade(shared),
            },
        );
        shared.cdm.create_session_and_generate_request(
            promise_id,
            session_type,
            init_data_type,
            init_data,
        );
        match rx.recv() {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(rejection)) => Err(Error::rejected("create-session", rejection)),
            Err(_) => Err(Error::PromiseDropped {
                operation: "create-session",
            }),
        }
    }

    pub fn set_server_certificate(&self, certificate: &[u8]) -> Result<()> {
        self.shared
            .run_operation(OperationKind::ServerCertificate, None, |id| {
                self.shared.cdm.set_server_certificate(id, certificate);
            })
    }

    /// First session whose key table contains `key_id`, if any.
    pub fn session_for_key(&self, key_id: &[u8]) -> Option<Arc<Session>> {
        self.shared.session_for_key(key_id)
    }

    /// Session with the given CDM session id, if it is still open.
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.shared.state.session(session_id)
    }
}

impl SystemShared {
    /// Park a promise, let `call` dispatch to the CDM, and wait for the
    /// resolution. Rejections of session-scoped operations are also
    /// delivered through the session's error sink.
    fn run_operation(
        &self,
        kind: OperationKind,
        session: Option<&Session>,
        call: impl FnOnce(u32),
    ) -> Result<()> {
        let promise_id = self.state.registry.allocate();
        let rx = self.state.registry.park_operation(promise_id, kind);
        call(promise_id);
        match rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(rejection)) => {
                if let Some(session) = session {
                    session.error_message(&rejection.message);
                }
                Err(Error::rejected(kind.as_str(), rejection))
            },
            Err(_) => Err(Error::PromiseDropped {
                operation: kind.as_str(),
            }),
        }
    }

    pub(crate) fn load_session(&self, session: &Session) -> Result<()> {
        // No session context to report rejections through on load.
        self.run_operation(OperationKind::Load, None, |id| {
            self.cdm
                .load_session(id, session.session_type(), session.id());
        })
    }

    pub(crate) fn update_session(&self, session: &Session, response: &[u8]) -> Result<()> {
        self.run_operation(OperationKind::Update, Some(session), |id| {
            self.cdm.update_session(id, session.id(), response);
        })
    }

    pub(crate) fn remove_session(&self, session: &Session) -> Result<()> {
        self.run_operation(OperationKind::Remove, Some(session), |id| {
            self.cdm.remove_session(id, session.id());
        })?;
        self.state.remove_session(session.id());
        Ok(())
    }

    pub(crate) fn close_session(&self, session: &Session) -> Result<()> {
        self.run_operation(OperationKind::Close, Some(session), |id| {
            self.cdm.close_session(id, session.id());
        })?;
        self.state.remove_session(session.id());
        Ok(())
    }

    pub(crate) fn decrypt(
        &self,
        buffer: &mut [u8],
        subsamples: &[u8],
        subsample_count: u32,
        iv: &[u8],
        key_id: &[u8],
    ) -> Result<()> {
        decrypt::decrypt_buffer(&self.cdm, buffer, subsamples, subsample_count, iv, key_id)
    }

    fn session_for_key(&self, key_id: &[u8]) -> Option<Arc<Session>> {
        let sessions = self.state.sessions.lock().expect("session map poisoned");
        sessions
            .values()
            .find(|session| session.has_key(key_id))
            .cloned()
    }
}
