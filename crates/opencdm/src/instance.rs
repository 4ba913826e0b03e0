//! Safe call surface over a loaded CDM instance.

use core::ffi::{c_char, c_void};
use std::sync::RwLock;

use widevine_cdm_api::{
    Cdm10, Cdm10VTable, DecryptedBlock, InitDataType, InputBuffer2, QueryResult, SessionType,
    Status,
};

/// A handle to one vendor CDM instance. Copies of the handle share the same
/// underlying object; [`CdmInstance::destroy`] must be issued exactly once,
/// after which no copy may be used again.
#[derive(Clone, Copy)]
pub(crate) struct CdmInstance {
    ptr: *mut Cdm10,
}

// SAFETY: the version-10 contract permits entry from any thread; the vendor
// library synchronizes internally. The pointer itself is never mutated.
unsafe impl Send for CdmInstance {}
unsafe impl Sync for CdmInstance {}

impl CdmInstance {
    /// # Safety contract (internal)
    ///
    /// `ptr` must come from `CreateCdmInstance` (or a test double with the
    /// same object layout) and stay valid until `destroy`.
    pub(crate) fn from_raw(ptr: *mut Cdm10) -> Self {
        debug_assert!(!ptr.is_null());
        Self { ptr }
    }

    fn vtable(&self) -> &Cdm10VTable {
        // SAFETY: `ptr` is valid per the from_raw contract; the vtable pointer
        // is set once by the vendor library and never changes.
        unsafe { &*(*self.ptr).vtable }
    }

    pub(crate) fn initialize(
        &self,
        allow_distinctive_identifier: bool,
        allow_persistent_state: bool,
        use_hw_secure_codecs: bool,
    ) {
        (self.vtable().initialize)(
            self.ptr,
            allow_distinctive_identifier,
            allow_persistent_state,
            use_hw_secure_codecs,
        );
    }

    pub(crate) fn set_server_certificate(&self, promise_id: u32, certificate: &[u8]) {
        (self.vtable().set_server_certificate)(
            self.ptr,
            promise_id,
            certificate.as_ptr(),
            certificate.len() as u32,
        );
    }

    pub(crate) fn create_session_and_generate_request(
        &self,
        promise_id: u32,
        session_type: SessionType,
        init_data_type: InitDataType,
        init_data: &[u8],
    ) {
        (self.vtable().create_session_and_generate_request)(
            self.ptr,
            promise_id,
            session_type,
            init_data_type,
            init_data.as_ptr(),
            init_data.len() as u32,
        );
    }

    pub(crate) fn load_session(&self, promise_id: u32, session_type: SessionType, id: &str) {
        (self.vtable().load_session)(
            self.ptr,
            promise_id,
            session_type,
            id.as_ptr() as *const c_char,
            id.len() as u32,
        );
    }

    pub(crate) fn update_session(&self, promise_id: u32, id: &str, response: &[u8]) {
        (self.vtable().update_session)(
            self.ptr,
            promise_id,
            id.as_ptr() as *const c_char,
            id.len() as u32,
            response.as_ptr(),
            response.len() as u32,
        );
    }

    pub(crate) fn close_session(&self, promise_id: u32, id: &str) {
        (self.vtable().close_session)(
            self.ptr,
            promise_id,
            id.as_ptr() as *const c_char,
            id.len() as u32,
        );
    }

    pub(crate) fn remove_session(&self, promise_id: u32, id: &str) {
        (self.vtable().remove_session)(
            self.ptr,
            promise_id,
            id.as_ptr() as *const c_char,
            id.len() as u32,
        );
    }

    pub(crate) fn timer_expired(&self, context: *mut c_void) {
        (self.vtable().timer_expired)(self.ptr, context);
    }

    pub(crate) fn decrypt(
        &self,
        encrypted: &InputBuffer2,
        decrypted_block: *mut DecryptedBlock,
    ) -> Status {
        (self.vtable().decrypt)(self.ptr, encrypted, decrypted_block)
    }

    pub(crate) fn on_query_output_protection_status(
        &self,
        result: QueryResult,
        link_mask: u32,
        output_protection_mask: u32,
    ) {
        (self.vtable().on_query_output_protection_status)(
            self.ptr,
            result,
            link_mask,
            output_protection_mask,
        );
    }

    pub(crate) fn on_storage_id(&self, version: u32, storage_id: &[u8]) {
        (self.vtable().on_storage_id)(
            self.ptr,
            version,
            storage_id.as_ptr(),
            storage_id.len() as u32,
        );
    }

    /// Releases the vendor instance. Every copy of this handle is dead
    /// afterwards.
    pub(crate) fn destroy(self) {
        (self.vtable().destroy)(self.ptr);
    }
}

/// Shared, clearable slot through which host callbacks and the timer worker
/// reach the CDM. Cleared before the instance is destroyed so that late
/// timers and callbacks see no CDM instead of a dangling one.
#[derive(Default)]
pub(crate) struct CdmSlot {
    inner: RwLock<Option<CdmInstance>>,
}

impl CdmSlot {
    pub(crate) fn set(&self, cdm: CdmInstance) {
        *self.inner.write().expect("cdm slot poisoned") = Some(cdm);
    }

    pub(crate) fn get(&self) -> Option<CdmInstance> {
        *self.inner.read().expect("cdm slot poisoned")
    }

    pub(crate) fn take(&self) -> Option<CdmInstance> {
        self.inner.write().expect("cdm slot poisoned").take()
    }
}
