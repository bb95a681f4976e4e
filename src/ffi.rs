//! C ABI Boundary
//!
//! C-compatible exports (`dm_*`) for driving the runtime from a simulator
//! or SystemVerilog testbench over DPI. Build as a cdylib or staticlib:
//!
//! ```toml
//! [lib]
//! crate-type = ["cdylib", "staticlib", "rlib"]
//! ```
//!
//! ## Handles
//!
//! Every object crossing the boundary (allocator, space, region, heap) is
//! owned by a process-wide handle table and represented by an opaque
//! pointer-sized id. Ids are handed out from a monotone counter and never
//! reused, so a freed handle can never be mistaken for a live one: any use
//! after `dm_free_region`/`dm_free_heap` is detected as a stale handle.
//!
//! Handles are references. `dm_get_region` returns a fresh handle to the
//! registered region; releasing a region handle with `dm_free_region` drops
//! that reference, and the region itself is released once no handle and no
//! space holds it. Space handles are never freed (spaces live for the
//! process lifetime).
//!
//! ## Error signaling
//!
//! The boundary has no native error channel, so each operation documents
//! its failure behavior:
//!
//! | Operation | On failure |
//! |---|---|
//! | `dm_new_allocator`, `dm_new_locked_allocator` | returns null |
//! | `dm_alloc_addr` | returns [`DM_ALLOC_FAILED`] (reserved address) |
//! | `dm_free_addr` | logs the error; aborts in debug builds |
//! | `dm_get_space`, `dm_new_space` | returns null |
//! | `dm_add_region` | returns null (placement overlap, bad name) |
//! | `dm_get_region` | returns null (name not registered) |
//! | `dm_alloc_region`, `dm_map_region`, `dm_heap` | returns null |
//! | reads, writes, `dm_*_region_info` | logs and aborts |
//!
//! A stale, null, or wrongly-typed handle is a caller bug on every
//! operation: it is logged at error level and the process aborts, the same
//! policy the runtime applies to detected use-after-free.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::fmt;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::allocator::{AddressAllocator, LockedAddressAllocator};
use crate::log::{LogBuilder, LogLevel, LogValue};
use crate::region::{AccessError, Heap, MemInfo, Region};
use crate::space::{space_table, Space};

/// Reserved address returned by `dm_alloc_addr` on allocation failure.
pub const DM_ALLOC_FAILED: u64 = u64::MAX;

/// Error produced by handle resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// The handle is null.
    Null,
    /// The handle is not registered: freed (ids are never reused, so this
    /// is use-after-free) or never valid.
    Stale {
        /// The offending handle id.
        handle: u64,
    },
    /// The handle is live but refers to a different kind of object.
    Mismatch {
        /// The offending handle id.
        handle: u64,
        /// The kind the operation required.
        expected: &'static str,
    },
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::Null => write!(f, "null handle"),
            HandleError::Stale { handle } => {
                write!(f, "stale handle {:#x} (freed or never valid)", handle)
            }
            HandleError::Mismatch { handle, expected } => {
                write!(f, "handle {:#x} is not a {}", handle, expected)
            }
        }
    }
}

impl std::error::Error for HandleError {}

/// An allocator whose callers serialize access externally.
///
/// `dm_new_allocator` hands these out; the safety contract on the
/// `dm_alloc_addr`/`dm_free_addr` exports requires the caller not to drive
/// one handle from two threads at once.
struct UnlockedAllocator(UnsafeCell<AddressAllocator>);

// Safety: mutation only happens through the unlocked-allocator ABI, whose
// safety contract requires external serialization.
unsafe impl Send for UnlockedAllocator {}
unsafe impl Sync for UnlockedAllocator {}

/// An object owned by the handle table.
enum Object {
    Allocator(UnlockedAllocator),
    LockedAllocator(LockedAddressAllocator),
    Space(Arc<Space>),
    Region(Arc<Region>),
    Heap(Heap),
}

/// Process-wide handle table.
struct HandleTable {
    entries: RwLock<HashMap<u64, Object>>,
}

static HANDLES: OnceLock<HandleTable> = OnceLock::new();

fn handles() -> &'static HandleTable {
    HANDLES.get_or_init(|| HandleTable {
        entries: RwLock::new(HashMap::new()),
    })
}

/// Handle id source. Starts at 1; 0 stays the null handle.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn register(object: Object) -> *mut c_void {
    let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    handles().entries.write().insert(id, object);
    id as usize as *mut c_void
}

fn take(handle: *const c_void) -> Result<Object, HandleError> {
    let id = handle as usize as u64;
    if id == 0 {
        return Err(HandleError::Null);
    }
    handles()
        .entries
        .write()
        .remove(&id)
        .ok_or(HandleError::Stale { handle: id })
}

fn with_entry<R>(
    handle: *const c_void,
    f: impl FnOnce(u64, &Object) -> Result<R, HandleError>,
) -> Result<R, HandleError> {
    let id = handle as usize as u64;
    if id == 0 {
        return Err(HandleError::Null);
    }
    let entries = handles().entries.read();
    let object = entries.get(&id).ok_or(HandleError::Stale { handle: id })?;
    f(id, object)
}

fn with_region<R>(
    handle: *const c_void,
    f: impl FnOnce(&Arc<Region>) -> R,
) -> Result<R, HandleError> {
    with_entry(handle, |id, object| match object {
        Object::Region(region) => Ok(f(region)),
        _ => Err(HandleError::Mismatch {
            handle: id,
            expected: "region",
        }),
    })
}

fn with_space<R>(
    handle: *const c_void,
    f: impl FnOnce(&Arc<Space>) -> R,
) -> Result<R, HandleError> {
    with_entry(handle, |id, object| match object {
        Object::Space(space) => Ok(f(space)),
        _ => Err(HandleError::Mismatch {
            handle: id,
            expected: "space",
        }),
    })
}

/// Run `f` against either allocator variant.
///
/// # Safety
///
/// If `handle` refers to an unlocked allocator, the caller must guarantee
/// no concurrent call is driving the same handle.
unsafe fn with_allocator<R>(
    handle: *const c_void,
    f: impl FnOnce(&mut AddressAllocator) -> R,
) -> Result<R, HandleError> {
    with_entry(handle, |id, object| match object {
        Object::Allocator(cell) => {
            // Safety: deferred to this function's contract.
            let allocator = unsafe { &mut *cell.0.get() };
            Ok(f(allocator))
        }
        Object::LockedAllocator(locked) => Ok(locked.with(f)),
        _ => Err(HandleError::Mismatch {
            handle: id,
            expected: "allocator",
        }),
    })
}

/// Log a boundary fault and abort.
fn fault(op: &'static str, err: &dyn fmt::Display) -> ! {
    LogBuilder::new(LogLevel::Error)
        .target("ffi")
        .message(format!("{}: {}; aborting", op, err))
        .emit();
    process::abort();
}

/// Resolve a region handle or abort; for operations with no error channel.
fn region_op<R>(
    op: &'static str,
    handle: *const c_void,
    f: impl FnOnce(&Arc<Region>) -> Result<R, AccessError>,
) -> R {
    match with_region(handle, f) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => fault(op, &err),
        Err(err) => fault(op, &err),
    }
}

/// Borrow a C string name, if present and valid UTF-8.
unsafe fn c_name(name: *const c_char) -> Option<String> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok().map(str::to_string)
}

// ============================================================================
// Runtime Initialization
// ============================================================================

/// Initialize the runtime from `DM_*` environment variables.
///
/// Optional: all runtime state is otherwise initialized lazily with
/// defaults on first use. Returns 0 on success.
#[no_mangle]
pub extern "C" fn dm_runtime_init() -> c_int {
    crate::init_from_env();
    0
}

// ============================================================================
// Address Allocators
// ============================================================================

/// Create an address allocator over `[base, base+size)`.
///
/// The returned allocator is not internally synchronized: the caller must
/// not drive one handle from two threads at once. Returns null if the
/// window is empty or overflows.
#[no_mangle]
pub extern "C" fn dm_new_allocator(base: u64, size: u64) -> *mut c_void {
    match AddressAllocator::new(base, size) {
        Ok(allocator) => register(Object::Allocator(UnlockedAllocator(UnsafeCell::new(
            allocator,
        )))),
        Err(err) => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message(format!("dm_new_allocator: {}", err))
                .emit();
            std::ptr::null_mut()
        }
    }
}

/// Create an internally-synchronized address allocator over
/// `[base, base+size)`.
///
/// Safe to drive from any number of threads. Returns null if the window is
/// empty or overflows.
#[no_mangle]
pub extern "C" fn dm_new_locked_allocator(base: u64, size: u64) -> *mut c_void {
    match LockedAddressAllocator::new(base, size) {
        Ok(allocator) => register(Object::LockedAllocator(allocator)),
        Err(err) => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message(format!("dm_new_locked_allocator: {}", err))
                .emit();
            std::ptr::null_mut()
        }
    }
}

/// Allocate `size` bytes aligned to `align` from an allocator.
///
/// Returns the allocated address, or [`DM_ALLOC_FAILED`] if no aligned fit
/// exists (or the request is empty).
///
/// # Safety
///
/// `allocator` must be a live allocator handle. For handles from
/// `dm_new_allocator`, the caller must serialize calls on the same handle.
#[no_mangle]
pub unsafe extern "C" fn dm_alloc_addr(
    allocator: *const c_void,
    size: u64,
    align: u64,
) -> u64 {
    match with_allocator(allocator, |a| a.allocate(size, align)) {
        Ok(Ok(addr)) => addr,
        Ok(Err(err)) => {
            LogBuilder::new(LogLevel::Warn)
                .target("ffi")
                .message(format!("dm_alloc_addr: {}", err))
                .field("size", LogValue::Addr(size))
                .field("align", LogValue::Addr(align))
                .emit();
            DM_ALLOC_FAILED
        }
        Err(err) => fault("dm_alloc_addr", &err),
    }
}

/// Return a previously allocated address to an allocator.
///
/// A double-free or garbage address is logged at error level and aborts in
/// debug builds.
///
/// # Safety
///
/// `allocator` must be a live allocator handle. For handles from
/// `dm_new_allocator`, the caller must serialize calls on the same handle.
#[no_mangle]
pub unsafe extern "C" fn dm_free_addr(allocator: *const c_void, addr: u64) {
    match with_allocator(allocator, |a| a.free(addr)) {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message(format!("dm_free_addr: {}", err))
                .field("addr", LogValue::Addr(addr))
                .emit();
            if cfg!(debug_assertions) {
                process::abort();
            }
        }
        Err(err) => fault("dm_free_addr", &err),
    }
}

// ============================================================================
// Spaces
// ============================================================================

/// Create an anonymous space.
#[no_mangle]
pub extern "C" fn dm_new_space() -> *mut c_void {
    register(Object::Space(Arc::new(Space::new())))
}

/// Look up a space in the global table by name, creating it if absent.
///
/// Returns null if `name` is null or not valid UTF-8.
///
/// # Safety
///
/// `name` must be null or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn dm_get_space(name: *const c_char) -> *mut c_void {
    match c_name(name) {
        Some(name) => register(Object::Space(space_table().get_space(&name))),
        None => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message("dm_get_space: null or non-UTF-8 name")
                .emit();
            std::ptr::null_mut()
        }
    }
}

/// Register a region under `name` in a space, replacing (and releasing) any
/// previous region under that name.
///
/// Returns `region` on success, null on failure (bad name, or the placement
/// overlaps a region registered under another name).
///
/// # Safety
///
/// `space` and `region` must be live handles of the right kinds; `name`
/// must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn dm_add_region(
    space: *const c_void,
    name: *const c_char,
    region: *mut c_void,
) -> *mut c_void {
    let name = match c_name(name) {
        Some(name) => name,
        None => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message("dm_add_region: null or non-UTF-8 name")
                .emit();
            return std::ptr::null_mut();
        }
    };
    let target = match with_region(region, Arc::clone) {
        Ok(target) => target,
        Err(err) => fault("dm_add_region", &err),
    };
    let result = match with_space(space, |s| s.add_region(&name, &target)) {
        Ok(result) => result,
        Err(err) => fault("dm_add_region", &err),
    };
    match result {
        Ok(_) => region,
        Err(err) => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message(format!("dm_add_region: {}", err))
                .field("name", LogValue::String(name))
                .emit();
            std::ptr::null_mut()
        }
    }
}

/// Look up the region registered under `name` in a space.
///
/// Returns a fresh region handle, or null if the name is not registered
/// (or invalid). Release the handle with `dm_free_region` when done.
///
/// # Safety
///
/// `space` must be a live space handle; `name` must be a valid
/// null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn dm_get_region(
    space: *const c_void,
    name: *const c_char,
) -> *mut c_void {
    let name = match c_name(name) {
        Some(name) => name,
        None => return std::ptr::null_mut(),
    };
    let found = match with_space(space, |s| s.get_region(&name)) {
        Ok(found) => found,
        Err(err) => fault("dm_get_region", &err),
    };
    match found {
        Some(region) => register(Object::Region(region)),
        None => std::ptr::null_mut(),
    }
}

/// Release and remove the region under `name`, but only if the registered
/// region is the one `ptr` refers to.
///
/// A stale replacement guard is a no-op: if the name was already replaced,
/// the current region stays registered. `ptr` itself remains a live handle
/// and must still be released with `dm_free_region`.
///
/// # Safety
///
/// `space` and `ptr` must be live handles of the right kinds; `name` must
/// be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn dm_clean_region(
    space: *const c_void,
    name: *const c_char,
    ptr: *const c_void,
) {
    let name = match c_name(name) {
        Some(name) => name,
        None => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message("dm_clean_region: null or non-UTF-8 name")
                .emit();
            return;
        }
    };
    let expect = match with_region(ptr, Arc::clone) {
        Ok(expect) => expect,
        Err(err) => fault("dm_clean_region", &err),
    };
    match with_space(space, |s| s.clean_region(&name, &expect)) {
        Ok(()) => {}
        Err(err) => fault("dm_clean_region", &err),
    }
}

/// Release and remove the region under `name` unconditionally.
///
/// A miss is logged at warn level and otherwise ignored.
///
/// # Safety
///
/// `space` must be a live space handle; `name` must be a valid
/// null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn dm_delete_region(space: *const c_void, name: *const c_char) {
    let name = match c_name(name) {
        Some(name) => name,
        None => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message("dm_delete_region: null or non-UTF-8 name")
                .emit();
            return;
        }
    };
    let result = match with_space(space, |s| s.delete_region(&name)) {
        Ok(result) => result,
        Err(err) => fault("dm_delete_region", &err),
    };
    if let Err(err) = result {
        LogBuilder::new(LogLevel::Warn)
            .target("ffi")
            .message(format!("dm_delete_region: {}", err))
            .emit();
    }
}

// ============================================================================
// Regions and Heaps
// ============================================================================

/// Allocate a region of `size` bytes aligned to `align` from a heap.
///
/// A null `heap` means the global heap. Returns a region handle, or null if
/// no aligned fit exists.
///
/// # Safety
///
/// `heap` must be null or a live heap handle.
#[no_mangle]
pub unsafe extern "C" fn dm_alloc_region(
    heap: *mut c_void,
    size: u64,
    align: u64,
) -> *mut c_void {
    let heap = if heap.is_null() {
        Heap::global().clone()
    } else {
        match with_entry(heap, |id, object| match object {
            Object::Heap(heap) => Ok(heap.clone()),
            _ => Err(HandleError::Mismatch {
                handle: id,
                expected: "heap",
            }),
        }) {
            Ok(heap) => heap,
            Err(err) => fault("dm_alloc_region", &err),
        }
    };
    match heap.alloc(size, align) {
        Ok(region) => register(Object::Region(region)),
        Err(err) => {
            LogBuilder::new(LogLevel::Warn)
                .target("ffi")
                .message(format!("dm_alloc_region: {}", err))
                .field("size", LogValue::Addr(size))
                .field("align", LogValue::Addr(align))
                .emit();
            std::ptr::null_mut()
        }
    }
}

/// Place a region's storage at a new base address.
///
/// Returns a handle to the mapped view; the original handle stays valid and
/// both views share the same bytes.
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_map_region(region: *const c_void, base: u64) -> *mut c_void {
    match with_region(region, |r| Region::remap(base, r)) {
        Ok(view) => register(Object::Region(view)),
        Err(err) => fault("dm_map_region", &err),
    }
}

/// Get the heap carving sub-regions out of a region.
///
/// The heap is created on first call and cached on the region; each call
/// returns a new handle to the same heap. Returns null if the region's
/// placement overflows the address space.
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_heap(region: *const c_void) -> *mut c_void {
    let result = match with_region(region, |r| r.heap()) {
        Ok(result) => result,
        Err(err) => fault("dm_heap", &err),
    };
    match result {
        Ok(heap) => register(Object::Heap(heap)),
        Err(err) => {
            LogBuilder::new(LogLevel::Error)
                .target("ffi")
                .message(format!("dm_heap: {}", err))
                .emit();
            std::ptr::null_mut()
        }
    }
}

/// Release a region handle.
///
/// The region itself is released once no handle and no space holds it;
/// releasing a carved region returns its range to the owning heap.
///
/// # Safety
///
/// `region` must be a live region handle, and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn dm_free_region(region: *const c_void) {
    match take(region) {
        Ok(Object::Region(region)) => drop(region),
        Ok(other) => {
            // Put it back; the caller freed the wrong handle.
            let id = region as usize as u64;
            handles().entries.write().insert(id, other);
            fault(
                "dm_free_region",
                &HandleError::Mismatch {
                    handle: id,
                    expected: "region",
                },
            );
        }
        Err(err) => fault("dm_free_region", &err),
    }
}

/// Release a heap handle.
///
/// Outstanding carved regions keep the heap's allocator alive and stay
/// valid; freeing a heap never cascades to its regions.
///
/// # Safety
///
/// `heap` must be a live heap handle, and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn dm_free_heap(heap: *const c_void) {
    match take(heap) {
        Ok(Object::Heap(heap)) => drop(heap),
        Ok(other) => {
            let id = heap as usize as u64;
            handles().entries.write().insert(id, other);
            fault(
                "dm_free_heap",
                &HandleError::Mismatch {
                    handle: id,
                    expected: "heap",
                },
            );
        }
        Err(err) => fault("dm_free_heap", &err),
    }
}

// ============================================================================
// Region Access
// ============================================================================

/// Write a byte at offset `addr` within a region.
///
/// Out-of-bounds or misaligned access logs and aborts (see module docs).
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_region_write_u8(region: *const c_void, addr: u64, data: u8) {
    region_op("dm_region_write_u8", region, |r| r.write_u8(addr, data));
}

/// Write a little-endian u16 at offset `addr` within a region.
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_region_write_u16(region: *const c_void, addr: u64, data: u16) {
    region_op("dm_region_write_u16", region, |r| r.write_u16(addr, data));
}

/// Write a little-endian u32 at offset `addr` within a region.
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_region_write_u32(region: *const c_void, addr: u64, data: u32) {
    region_op("dm_region_write_u32", region, |r| r.write_u32(addr, data));
}

/// Write a little-endian u64 at offset `addr` within a region.
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_region_write_u64(region: *const c_void, addr: u64, data: u64) {
    region_op("dm_region_write_u64", region, |r| r.write_u64(addr, data));
}

/// Read a byte at offset `addr` within a region (return-value convention).
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_c_region_read_u8(region: *const c_void, addr: u64) -> u8 {
    region_op("dm_c_region_read_u8", region, |r| r.read_u8(addr))
}

/// Read a little-endian u16 at offset `addr` (return-value convention).
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_c_region_read_u16(region: *const c_void, addr: u64) -> u16 {
    region_op("dm_c_region_read_u16", region, |r| r.read_u16(addr))
}

/// Read a little-endian u32 at offset `addr` (return-value convention).
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_c_region_read_u32(region: *const c_void, addr: u64) -> u32 {
    region_op("dm_c_region_read_u32", region, |r| r.read_u32(addr))
}

/// Read a little-endian u64 at offset `addr` (return-value convention).
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_c_region_read_u64(region: *const c_void, addr: u64) -> u64 {
    region_op("dm_c_region_read_u64", region, |r| r.read_u64(addr))
}

/// Read a byte at offset `addr` into `data` (out-parameter convention).
///
/// Behaviorally identical to `dm_c_region_read_u8`, for callers that cannot
/// consume return values across the boundary.
///
/// # Safety
///
/// `region` must be a live region handle; `data` must be a valid writable
/// pointer.
#[no_mangle]
pub unsafe extern "C" fn dm_dpi_region_read_u8(
    region: *const c_void,
    addr: u64,
    data: *mut u8,
) {
    if data.is_null() {
        fault("dm_dpi_region_read_u8", &HandleError::Null);
    }
    *data = region_op("dm_dpi_region_read_u8", region, |r| r.read_u8(addr));
}

/// Read a little-endian u16 into `data` (out-parameter convention).
///
/// # Safety
///
/// `region` must be a live region handle; `data` must be a valid writable
/// pointer.
#[no_mangle]
pub unsafe extern "C" fn dm_dpi_region_read_u16(
    region: *const c_void,
    addr: u64,
    data: *mut u16,
) {
    if data.is_null() {
        fault("dm_dpi_region_read_u16", &HandleError::Null);
    }
    *data = region_op("dm_dpi_region_read_u16", region, |r| r.read_u16(addr));
}

/// Read a little-endian u32 into `data` (out-parameter convention).
///
/// # Safety
///
/// `region` must be a live region handle; `data` must be a valid writable
/// pointer.
#[no_mangle]
pub unsafe extern "C" fn dm_dpi_region_read_u32(
    region: *const c_void,
    addr: u64,
    data: *mut u32,
) {
    if data.is_null() {
        fault("dm_dpi_region_read_u32", &HandleError::Null);
    }
    *data = region_op("dm_dpi_region_read_u32", region, |r| r.read_u32(addr));
}

/// Read a little-endian u64 into `data` (out-parameter convention).
///
/// # Safety
///
/// `region` must be a live region handle; `data` must be a valid writable
/// pointer.
#[no_mangle]
pub unsafe extern "C" fn dm_dpi_region_read_u64(
    region: *const c_void,
    addr: u64,
    data: *mut u64,
) {
    if data.is_null() {
        fault("dm_dpi_region_read_u64", &HandleError::Null);
    }
    *data = region_op("dm_dpi_region_read_u64", region, |r| r.read_u64(addr));
}

// ============================================================================
// Region Info
// ============================================================================

/// Get a region's base and size (return-value convention).
///
/// Returns a freshly-allocated `dm_mem_info`; release it with
/// `dm_free_info`. Prefer `dm_dpi_region_info`, which fills caller storage.
///
/// # Safety
///
/// `region` must be a live region handle.
#[no_mangle]
pub unsafe extern "C" fn dm_c_region_info(region: *const c_void) -> *mut MemInfo {
    match with_region(region, |r| r.info()) {
        Ok(info) => Box::into_raw(Box::new(info)),
        Err(err) => fault("dm_c_region_info", &err),
    }
}

/// Get a region's base and size into caller storage (out-parameter
/// convention). Behaviorally identical to `dm_c_region_info`.
///
/// # Safety
///
/// `region` must be a live region handle; `info` must be a valid writable
/// pointer.
#[no_mangle]
pub unsafe extern "C" fn dm_dpi_region_info(region: *const c_void, info: *mut MemInfo) {
    if info.is_null() {
        fault("dm_dpi_region_info", &HandleError::Null);
    }
    match with_region(region, |r| r.info()) {
        Ok(snapshot) => *info = snapshot,
        Err(err) => fault("dm_dpi_region_info", &err),
    }
}

/// Release a `dm_mem_info` returned by `dm_c_region_info`.
///
/// A null pointer is ignored.
///
/// # Safety
///
/// `info` must be null or a pointer returned by `dm_c_region_info` that has
/// not been freed already.
#[no_mangle]
pub unsafe extern "C" fn dm_free_info(info: *mut MemInfo) {
    if !info.is_null() {
        drop(Box::from_raw(info));
    }
}
