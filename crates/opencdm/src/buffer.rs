//! Heap-backed implementations of the CDM output-buffer contracts.

use core::ffi::c_void;

use widevine_cdm_api::{Buffer, BufferVTable, DecryptedBlock, DecryptedBlockVTable};

/// Buffer handed to the CDM through `Host::Allocate`. `capacity` is the
/// originally requested size; `set_size` marks the used prefix. The CDM owns
/// the allocation and releases it through the `destroy` slot.
#[repr(C)]
struct HeapBuffer {
    raw: Buffer,
    data: Vec<u8>,
    size: u32,
}

static HEAP_BUFFER_VTABLE: BufferVTable = BufferVTable {
    destroy: heap_buffer_destroy,
    capacity: heap_buffer_capacity,
    data: heap_buffer_data,
    set_size: heap_buffer_set_size,
    size: heap_buffer_size,
    dtor0: std::ptr::null(),
    dtor1: std::ptr::null(),
};

pub(crate) fn allocate_buffer(capacity: u32) -> *mut Buffer {
    let buffer = Box::new(HeapBuffer {
        raw: Buffer {
            vtable: &HEAP_BUFFER_VTABLE,
        },
        data: vec![0; capacity as usize],
        size: 0,
    });
    Box::into_raw(buffer) as *mut Buffer
}

extern "C" fn heap_buffer_destroy(this: *mut Buffer) {
    if this.is_null() {
        return;
    }
    // SAFETY: allocated by `allocate_buffer`, released exactly once here.
    drop(unsafe { Box::from_raw(this as *mut HeapBuffer) });
}

extern "C" fn heap_buffer_capacity(this: *const Buffer) -> u32 {
    // SAFETY: `this` is a live HeapBuffer per the allocation contract.
    let buffer = unsafe { &*(this as *const HeapBuffer) };
    buffer.data.len() as u32
}

extern "C" fn heap_buffer_data(this: *mut Buffer) -> *mut u8 {
    // SAFETY: `this` is a live HeapBuffer per the allocation contract.
    let buffer = unsafe { &mut *(this as *mut HeapBuffer) };
    buffer.data.as_mut_ptr()
}

extern "C" fn heap_buffer_set_size(this: *mut Buffer, size: u32) {
    // SAFETY: `this` is a live HeapBuffer per the allocation contract.
    let buffer = unsafe { &mut *(this as *mut HeapBuffer) };
    buffer.size = size.min(buffer.data.len() as u32);
}

extern "C" fn heap_buffer_size(this: *const Buffer) -> u32 {
    // SAFETY: `this` is a live HeapBuffer per the allocation contract.
    let buffer = unsafe { &*(this as *const HeapBuffer) };
    buffer.size
}

/// Result carrier for `Decrypt` calls. The CDM stores a host-allocated
/// buffer into it; dropping the block releases that buffer.
#[repr(C)]
pub(crate) struct OwnedDecryptedBlock {
    raw: DecryptedBlock,
    buffer: *mut Buffer,
    timestamp: i64,
}

static DECRYPTED_BLOCK_VTABLE: DecryptedBlockVTable = DecryptedBlockVTable {
    set_decrypted_buffer: block_set_decrypted_buffer,
    decrypted_buffer: block_decrypted_buffer,
    set_timestamp: block_set_timestamp,
    timestamp: block_timestamp,
    dtor0: std::ptr::null(),
    dtor1: std::ptr::null(),
};

impl OwnedDecryptedBlock {
    pub(crate) fn new() -> Self {
        Self {
            raw: DecryptedBlock {
                vtable: &DECRYPTED_BLOCK_VTABLE,
            },
            buffer: std::ptr::null_mut(),
            timestamp: 0,
        }
    }

    pub(crate) fn as_raw(&mut self) -> *mut DecryptedBlock {
        &mut self.raw as *mut DecryptedBlock
    }

    /// The used portion of the decrypted buffer, empty when the CDM stored
    /// nothing.
    pub(crate) fn payload(&self) -> &[u8] {
        if self.buffer.is_null() {
            return &[];
        }
        // SAFETY: `buffer` was stored by the CDM and is alive until this
        // block drops; data/size go through its own vtable.
        unsafe {
            let vtable = &*(*self.buffer).vtable;
            let data = (vtable.data)(self.buffer);
            let size = (vtable.size)(self.buffer) as usize;
            if data.is_null() {
                return &[];
            }
            std::slice::from_raw_parts(data, size)
        }
    }
}

impl Drop for OwnedDecryptedBlock {
    fn drop(&mut self) {
        if self.buffer.is_null() {
            return;
        }
        // SAFETY: the stored buffer is released exactly once, here.
        unsafe {
            let vtable = &*(*self.buffer).vtable;
            (vtable.destroy)(self.buffer);
        }
    }
}

extern "C" fn block_set_decrypted_buffer(this: *mut DecryptedBlock, buffer: *mut Buffer) {
    // SAFETY: `this` is the `raw` field of a live OwnedDecryptedBlock.
    let block = unsafe { &mut *(this as *mut OwnedDecryptedBlock) };
    block.buffer = buffer;
}

extern "C" fn block_decrypted_buffer(this: *mut DecryptedBlock) -> *mut Buffer {
    // SAFETY: `this` is the `raw` field of a live OwnedDecryptedBlock.
    let block = unsafe { &*(this as *const OwnedDecryptedBlock) };
    block.buffer
}

extern "C" fn block_set_timestamp(this: *mut DecryptedBlock, timestamp: i64) {
    // SAFETY: `this` is the `raw` field of a live OwnedDecryptedBlock.
    let block = unsafe { &mut *(this as *mut OwnedDecryptedBlock) };
    block.timestamp = timestamp;
}

extern "C" fn block_timestamp(this: *const DecryptedBlock) -> i64 {
    // SAFETY: `this` is the `raw` field of a live OwnedDecryptedBlock.
    let block = unsafe { &*(this as *const OwnedDecryptedBlock) };
    block.timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn vtable(buffer: *mut Buffer) -> &'static BufferVTable {
        unsafe { &*(*buffer).vtable }
    }

    #[test]
    fn buffer_reports_requested_capacity_and_used_size() {
        let buffer = allocate_buffer(16);
        // SAFETY: fresh allocation from `allocate_buffer`.
        unsafe {
            let vt = vtable(buffer);
            assert_eq!((vt.capacity)(buffer), 16);
            assert_eq!((vt.size)(buffer), 0);

            let data = (vt.data)(buffer);
            assert!(!data.is_null());
            std::ptr::write_bytes(data, 0x5A, 16);

            (vt.set_size)(buffer, 10);
            assert_eq!((vt.size)(buffer), 10);
            // The used size never exceeds the allocation.
            (vt.set_size)(buffer, 64);
            assert_eq!((vt.size)(buffer), 16);

            (vt.destroy)(buffer);
        }
    }

    #[test]
    fn decrypted_block_owns_its_buffer() {
        let mut block = OwnedDecryptedBlock::new();
        assert!(block.payload().is_empty());

        let buffer = allocate_buffer(4);
        // SAFETY: fresh allocation; the block takes ownership below.
        unsafe {
            let vt = vtable(buffer);
            std::ptr::copy_nonoverlapping(b"abcd".as_ptr(), (vt.data)(buffer), 4);
            (vt.set_size)(buffer, 3);
        }

        let raw = block.as_raw();
        // SAFETY: `raw` points at the block's embedded DecryptedBlock.
        unsafe {
            let vt = &*(*raw).vtable;
            (vt.set_decrypted_buffer)(raw, buffer);
            (vt.set_timestamp)(raw, 42);
            assert_eq!((vt.timestamp)(raw), 42);
            assert_eq!((vt.decrypted_buffer)(raw), buffer);
        }

        assert_eq!(block.payload(), b"abc");
        // Dropping the block releases the stored buffer.
    }
}
