use core::ffi::{c_char, c_void};

use crate::{Exception, KeyInformation, KeyStatus, MessageType, Status, StreamType, Time};

/// Output buffer the host allocates on the CDM's behalf.
///
/// Ownership passes to the CDM on allocation; the CDM releases it through the
/// `destroy` slot (directly or via a wrapper such as a decrypted block).
#[repr(C)]
pub struct Buffer {
    pub vtable: *const BufferVTable,
}

#[repr(C)]
pub struct BufferVTable {
    pub destroy: extern "C" fn(this: *mut Buffer),
    pub capacity: extern "C" fn(this: *const Buffer) -> u32,
    pub data: extern "C" fn(this: *mut Buffer) -> *mut u8,
    pub set_size: extern "C" fn(this: *mut Buffer, size: u32),
    pub size: extern "C" fn(this: *const Buffer) -> u32,
    pub dtor0: *const c_void,
    pub dtor1: *const c_void,
}

// Vtables are immutable function tables; the raw destructor slots make them
// non-auto-Send/Sync but are never dereferenced.
unsafe impl Send for BufferVTable {}
unsafe impl Sync for BufferVTable {}

/// Result carrier for `decrypt`: the CDM stores the output buffer and sample
/// timestamp into the block the host passed in.
#[repr(C)]
pub struct DecryptedBlock {
    pub vtable: *const DecryptedBlockVTable,
}

#[repr(C)]
pub struct DecryptedBlockVTable {
    pub set_decrypted_buffer: extern "C" fn(this: *mut DecryptedBlock, buffer: *mut Buffer),
    pub decrypted_buffer: extern "C" fn(this: *mut DecryptedBlock) -> *mut Buffer,
    pub set_timestamp: extern "C" fn(this: *mut DecryptedBlock, timestamp: i64),
    pub timestamp: extern "C" fn(this: *const DecryptedBlock) -> i64,
    pub dtor0: *const c_void,
    pub dtor1: *const c_void,
}

// See BufferVTable.
unsafe impl Send for DecryptedBlockVTable {}
unsafe impl Sync for DecryptedBlockVTable {}

/// The host object handed to the CDM through the host getter.
///
/// The CDM may invoke any entry from any of its internal threads; every
/// implementation behind this table must be thread-safe and must not unwind.
#[repr(C)]
pub struct Host10 {
    pub vtable: *const Host10VTable,
}

#[repr(C)]
pub struct Host10VTable {
    pub allocate: extern "C" fn(this: *mut Host10, capacity: u32) -> *mut Buffer,
    pub set_timer: extern "C" fn(this: *mut Host10, delay_ms: i64, context: *mut c_void),
    pub get_current_wall_time: extern "C" fn(this: *mut Host10) -> Time,
    pub on_initialized: extern "C" fn(this: *mut Host10, success: bool),
    pub on_resolve_key_status_promise:
        extern "C" fn(this: *mut Host10, promise_id: u32, key_status: KeyStatus),
    pub on_resolve_new_session_promise: extern "C" fn(
        this: *mut Host10,
        promise_id: u32,
        session_id: *const c_char,
        session_id_size: u32,
    ),
    pub on_resolve_promise: extern "C" fn(this: *mut Host10, promise_id: u32),
    pub on_reject_promise: extern "C" fn(
        this: *mut Host10,
        promise_id: u32,
        exception: Exception,
        system_code: u32,
        error_message: *const c_char,
        error_message_size: u32,
    ),
    pub on_session_message: extern "C" fn(
        this: *mut Host10,
        session_id: *const c_char,
        session_id_size: u32,
        message_type: MessageType,
        message: *const c_char,
        message_size: u32,
    ),
    pub on_session_keys_change: extern "C" fn(
        this: *mut Host10,
        session_id: *const c_char,
        session_id_size: u32,
        has_additional_usable_key: bool,
        keys_info: *const KeyInformation,
        keys_info_count: u32,
    ),
    pub on_expiration_change: extern "C" fn(
        this: *mut Host10,
        session_id: *const c_char,
        session_id_size: u32,
        new_expiry_time: Time,
    ),
    pub on_session_closed:
        extern "C" fn(this: *mut Host10, session_id: *const c_char, session_id_size: u32),
    pub send_platform_challenge: extern "C" fn(
        this: *mut Host10,
        service_id: *const c_char,
        service_id_size: u32,
        challenge: *const c_char,
        challenge_size: u32,
    ),
    pub enable_output_protection:
        extern "C" fn(this: *mut Host10, desired_protection_mask: u32),
    pub query_output_protection_status: extern "C" fn(this: *mut Host10),
    pub on_deferred_initialization_done:
        extern "C" fn(this: *mut Host10, stream_type: StreamType, decoder_status: Status),
    /// Persistent-storage factory. `client` is a CDM-owned `FileIOClient`;
    /// a host without storage support returns null.
    pub create_file_io: extern "C" fn(this: *mut Host10, client: *mut c_void) -> *mut c_void,
    pub request_storage_id: extern "C" fn(this: *mut Host10, version: u32),
    pub dtor0: *const c_void,
    pub dtor1: *const c_void,
}

// See BufferVTable.
unsafe impl Send for Host10VTable {}
unsafe impl Sync for Host10VTable {}
