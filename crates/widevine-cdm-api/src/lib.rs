#![allow(clippy::missing_safety_doc)]

//! ABI surface of the Widevine Content Decryption Module, interface
//! version 10.
//!
//! The vendor library exposes a C-shaped object interface: every object is a
//! pointer whose first field is a vtable pointer, and every method is an
//! `extern "C"` function taking the object pointer first. Vtable entries are
//! listed in interface declaration order; the two trailing `dtor` slots stand
//! in for the virtual-destructor pair, which neither side ever invokes (the
//! CDM is torn down through `destroy`, host objects through `Destroy()`).

use core::ffi::{c_char, c_int, c_void};

mod cdm;
mod host;

pub use cdm::*;
pub use host::*;

/// The single CDM interface version this adapter speaks.
pub const CDM_INTERFACE_VERSION: c_int = 10;

pub const INITIALIZE_CDM_MODULE_SYMBOL: &[u8] = b"InitializeCdmModule_10";
pub const CREATE_CDM_INSTANCE_SYMBOL: &[u8] = b"CreateCdmInstance";

/// Parameterless module initializer, called exactly once per process.
pub type InitializeCdmModuleFn = unsafe extern "C" fn();

/// Supplied by the host to `CreateCdmInstance`; must return the host object
/// iff `interface_version` matches [`CDM_INTERFACE_VERSION`], else null.
pub type GetCdmHostFn =
    extern "C" fn(interface_version: c_int, user_data: *mut c_void) -> *mut c_void;

pub type CreateCdmInstanceFn = unsafe extern "C" fn(
    cdm_interface_version: c_int,
    key_system: *const c_char,
    key_system_size: u32,
    get_cdm_host_func: GetCdmHostFn,
    user_data: *mut c_void,
) -> *mut c_void;

/// Wall-clock seconds since the Unix epoch.
pub type Time = f64;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Temporary = 0,
    PersistentLicense = 1,
    PersistentUsageRecord = 2,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitDataType {
    Cenc = 0,
    KeyIds = 1,
    WebM = 2,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionScheme {
    Unencrypted = 0,
    Cenc = 1,
    Cbcs = 2,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    Succeeded = 0,
    Failed = 1,
}

// Codes below originate inside the vendor library, so they are transparent
// newtypes rather than Rust enums: any u32 the CDM sends stays representable.

/// Outcome of a `decrypt` (or decode) call.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const NEED_MORE_DATA: Status = Status(1);
    pub const NO_KEY: Status = Status(2);
    pub const INITIALIZATION_ERROR: Status = Status(3);
    pub const DECRYPT_ERROR: Status = Status(4);
    pub const DECODE_ERROR: Status = Status(5);
    pub const DEFERRED_INITIALIZATION: Status = Status(6);
}

/// Exception category attached to a rejected promise.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception(pub u32);

impl Exception {
    pub const TYPE_ERROR: Exception = Exception(0);
    pub const NOT_SUPPORTED_ERROR: Exception = Exception(1);
    pub const INVALID_STATE_ERROR: Exception = Exception(2);
    pub const QUOTA_EXCEEDED_ERROR: Exception = Exception(3);
}

/// Per-key state reported through `OnSessionKeysChange`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStatus(pub u32);

impl KeyStatus {
    pub const USABLE: KeyStatus = KeyStatus(0);
    pub const INTERNAL_ERROR: KeyStatus = KeyStatus(1);
    pub const EXPIRED: KeyStatus = KeyStatus(2);
    pub const OUTPUT_RESTRICTED: KeyStatus = KeyStatus(3);
    pub const OUTPUT_DOWNSCALED: KeyStatus = KeyStatus(4);
    pub const STATUS_PENDING: KeyStatus = KeyStatus(5);
    pub const RELEASED: KeyStatus = KeyStatus(6);
}

/// Kind of a session message delivered through `OnSessionMessage`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageType(pub u32);

impl MessageType {
    pub const LICENSE_REQUEST: MessageType = MessageType(0);
    pub const LICENSE_RENEWAL: MessageType = MessageType(1);
    pub const LICENSE_RELEASE: MessageType = MessageType(2);
    pub const INDIVIDUALIZATION_REQUEST: MessageType = MessageType(3);
}

/// Decoder stream kind, only ever observed in deferred-init notifications.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamType(pub u32);

impl StreamType {
    pub const AUDIO: StreamType = StreamType(0);
    pub const VIDEO: StreamType = StreamType(1);
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub crypt_byte_block: u32,
    pub skip_byte_block: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleEntry {
    pub clear_bytes: u32,
    pub cipher_bytes: u32,
}

/// One encrypted input sample handed to `decrypt`.
///
/// All pointers are host-owned and only need to stay valid for the duration
/// of the call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InputBuffer2 {
    pub data: *const u8,
    pub data_size: u32,
    pub encryption_scheme: EncryptionScheme,
    pub key_id: *const u8,
    pub key_id_size: u32,
    pub iv: *const u8,
    pub iv_size: u32,
    pub subsamples: *const SubsampleEntry,
    pub num_subsamples: u32,
    pub pattern: Pattern,
    pub timestamp: i64,
}

/// Key-status record inside an `OnSessionKeysChange` delivery. The `key_id`
/// bytes are CDM-owned and must be copied out before the callback returns.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KeyInformation {
    pub key_id: *const u8,
    pub key_id_size: u32,
    pub status: KeyStatus,
    pub system_code: u32,
}
