//! Promise-id allocation and the table of promises parked between an
//! adapter call into the CDM and the matching asynchronous resolution.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::warn;
use widevine_cdm_api::{Exception, SessionType};

use crate::error::OpenCDMError;
use crate::session::{Session, SessionSink};
use crate::system::SystemShared;

/// A promise the CDM rejected, as delivered through `OnRejectPromise`.
#[derive(Debug)]
pub struct RejectedPromise {
    pub id: u32,
    pub exception: Exception,
    pub system_code: u32,
    pub message: String,
}

impl RejectedPromise {
    pub fn open_cdm_error(&self) -> OpenCDMError {
        match self.exception {
            Exception::TYPE_ERROR
            | Exception::NOT_SUPPORTED_ERROR
            | Exception::INVALID_STATE_ERROR
            | Exception::QUOTA_EXCEEDED_ERROR => OpenCDMError::Fail,
            _ => OpenCDMError::Unknown,
        }
    }
}

impl std::fmt::Display for RejectedPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "exception={}, system_code={}, message=`{}`",
            self.exception.0, self.system_code, self.message
        )
    }
}

/// Everything needed to build the session once the CDM resolves a
/// create-session promise with the generated id.
pub(crate) struct CreateSessionRequest {
    pub session_type: SessionType,
    pub sink: Box<dyn SessionSink>,
    pub system: Weak<SystemShared>,
}

pub(crate) type OperationOutcome = Result<(), RejectedPromise>;
pub(crate) type CreateSessionOutcome = Result<Arc<Session>, RejectedPromise>;

/// Which non-create operation a parked promise belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationKind {
    ServerCertificate,
    Load,
    Update,
    Remove,
    Close,
}

impl OperationKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            OperationKind::ServerCertificate => "set-server-certificate",
            OperationKind::Load => "load-session",
            OperationKind::Update => "update-session",
            OperationKind::Remove => "remove-session",
            OperationKind::Close => "close-session",
        }
    }
}

/// One parked promise. The create-session variant carries the pending
/// request payload alongside its delivery channel.
pub(crate) enum PendingPromise {
    CreateSession {
        request: CreateSessionRequest,
        tx: Sender<CreateSessionOutcome>,
    },
    Operation {
        kind: OperationKind,
        tx: Sender<OperationOutcome>,
    },
}

/// Tagged promise table. Ids are issued once, slots are taken exactly once;
/// resolutions for unknown ids are the caller's problem to log and drop.
#[derive(Default)]
pub(crate) struct PromiseRegistry {
    next_id: AtomicU32,
    pending: Mutex<HashMap<u32, PendingPromise>>,
}

impl PromiseRegistry {
    pub(crate) fn allocate(&self) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // ~4e9 promises per process; wrap-around is out of scope.
        debug_assert!(id != u32::MAX, "promise id space exhausted");
        id
    }

    pub(crate) fn park_create_session(
        &self,
        id: u32,
        request: CreateSessionRequest,
    ) -> Receiver<CreateSessionOutcome> {
        let (tx, rx) = bounded(1);
        self.park(id, PendingPromise::CreateSession { request, tx });
        rx
    }

    pub(crate) fn park_operation(
        &self,
        id: u32,
        kind: OperationKind,
    ) -> Receiver<OperationOutcome> {
        let (tx, rx) = bounded(1);
        self.park(id, PendingPromise::Operation { kind, tx });
        rx
    }

    fn park(&self, id: u32, slot: PendingPromise) {
        let mut pending = self.pending.lock().expect("promise table poisoned");
        if pending.insert(id, slot).is_some() {
            // Ids are allocated from an atomic counter, so this cannot happen
            // short of a wrap-around.
            warn!(target: "opencdm::host", promise_id = id, "promise id parked twice");
        }
    }

    /// Removes and returns the parked slot, if any. Resolution and rejection
    /// both funnel through here so a promise is observed at most once.
    pub(crate) fn take(&self, id: u32) -> Option<PendingPromise> {
        self.pending.lock().expect("promise table poisoned").remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_unique_increasing_ids() {
        let registry = PromiseRegistry::default();
        let a = registry.allocate();
        let b = registry.allocate();
        let c = registry.allocate();
        assert!(a < b && b < c);
    }

    #[test]
    fn parked_operation_is_taken_exactly_once() {
        let registry = PromiseRegistry::default();
        let id = registry.allocate();
        let rx = registry.park_operation(id, OperationKind::Update);

        let slot = registry.take(id).expect("parked slot");
        match slot {
            PendingPromise::Operation { kind, tx } => {
                assert_eq!(kind, OperationKind::Update);
                tx.send(Ok(())).expect("deliver");
            },
            PendingPromise::CreateSession { .. } => panic!("wrong slot kind"),
        }
        assert!(registry.take(id).is_none());
        assert!(rx.recv().expect("outcome").is_ok());
    }

    #[test]
    fn rejection_maps_known_exceptions_to_fail() {
        for exception in [
            Exception::TYPE_ERROR,
            Exception::NOT_SUPPORTED_ERROR,
            Exception::INVALID_STATE_ERROR,
            Exception::QUOTA_EXCEEDED_ERROR,
        ] {
            let rejection = RejectedPromise {
                id: 1,
                exception,
                system_code: 0,
                message: String::new(),
            };
            assert_eq!(rejection.open_cdm_error(), OpenCDMError::Fail);
        }
        let rejection = RejectedPromise {
            id: 1,
            exception: Exception(99),
            system_code: 0,
            message: String::new(),
        };
        assert_eq!(rejection.open_cdm_error(), OpenCDMError::Unknown);
    }
}
