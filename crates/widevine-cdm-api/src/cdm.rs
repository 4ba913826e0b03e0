use core::ffi::{c_char, c_void};

use crate::{
    DecryptedBlock, InitDataType, InputBuffer2, QueryResult, SessionType, Status, StreamType,
};

/// The CDM instance returned by `CreateCdmInstance`.
///
/// Decoder-path and platform-challenge entries are part of the version-10
/// table but are never invoked by this adapter; their payload pointers are
/// typed as `c_void` because the host never constructs them.
#[repr(C)]
pub struct Cdm10 {
    pub vtable: *const Cdm10VTable,
}

#[repr(C)]
pub struct Cdm10VTable {
    pub initialize: extern "C" fn(
        this: *mut Cdm10,
        allow_distinctive_identifier: bool,
        allow_persistent_state: bool,
        use_hw_secure_codecs: bool,
    ),
    pub get_status_for_policy:
        extern "C" fn(this: *mut Cdm10, promise_id: u32, policy: *const c_void),
    pub set_server_certificate: extern "C" fn(
        this: *mut Cdm10,
        promise_id: u32,
        server_certificate_data: *const u8,
        server_certificate_data_size: u32,
    ),
    pub create_session_and_generate_request: extern "C" fn(
        this: *mut Cdm10,
        promise_id: u32,
        session_type: SessionType,
        init_data_type: InitDataType,
        init_data: *const u8,
        init_data_size: u32,
    ),
    pub load_session: extern "C" fn(
        this: *mut Cdm10,
        promise_id: u32,
        session_type: SessionType,
        session_id: *const c_char,
        session_id_size: u32,
    ),
    pub update_session: extern "C" fn(
        this: *mut Cdm10,
        promise_id: u32,
        session_id: *const c_char,
        session_id_size: u32,
        response: *const u8,
        response_size: u32,
    ),
    pub close_session: extern "C" fn(
        this: *mut Cdm10,
        promise_id: u32,
        session_id: *const c_char,
        session_id_size: u32,
    ),
    pub remove_session: extern "C" fn(
        this: *mut Cdm10,
        promise_id: u32,
        session_id: *const c_char,
        session_id_size: u32,
    ),
    pub timer_expired: extern "C" fn(this: *mut Cdm10, context: *mut c_void),
    pub decrypt: extern "C" fn(
        this: *mut Cdm10,
        encrypted_buffer: *const InputBuffer2,
        decrypted_block: *mut DecryptedBlock,
    ) -> Status,
    pub initialize_audio_decoder:
        extern "C" fn(this: *mut Cdm10, audio_decoder_config: *const c_void) -> Status,
    pub initialize_video_decoder:
        extern "C" fn(this: *mut Cdm10, video_decoder_config: *const c_void) -> Status,
    pub deinitialize_decoder: extern "C" fn(this: *mut Cdm10, decoder_type: StreamType),
    pub reset_decoder: extern "C" fn(this: *mut Cdm10, decoder_type: StreamType),
    pub decrypt_and_decode_frame: extern "C" fn(
        this: *mut Cdm10,
        encrypted_buffer: *const InputBuffer2,
        video_frame: *mut c_void,
    ) -> Status,
    pub decrypt_and_decode_samples: extern "C" fn(
        this: *mut Cdm10,
        encrypted_buffer: *const InputBuffer2,
        audio_frames: *mut c_void,
    ) -> Status,
    pub on_platform_challenge_response:
        extern "C" fn(this: *mut Cdm10, response: *const c_void),
    pub on_query_output_protection_status: extern "C" fn(
        this: *mut Cdm10,
        result: QueryResult,
        link_mask: u32,
        output_protection_mask: u32,
    ),
    pub on_storage_id: extern "C" fn(
        this: *mut Cdm10,
        version: u32,
        storage_id: *const u8,
        storage_id_size: u32,
    ),
    /// Releases the instance. The pointer is invalid afterwards.
    pub destroy: extern "C" fn(this: *mut Cdm10),
    pub dtor0: *const c_void,
    pub dtor1: *const c_void,
}

// Vtables are immutable function tables; the raw destructor slots make them
// non-auto-Send/Sync but are never dereferenced.
unsafe impl Send for Cdm10VTable {}
unsafe impl Sync for Cdm10VTable {}
