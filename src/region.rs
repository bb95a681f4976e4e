//! Memory Regions and Heaps
//!
//! A [`Region`] is a placed block of byte-addressable storage: a base
//! address, a size, and backing bytes. Simulated devices, DMA buffers, and
//! shared-memory windows are all regions. Access is little-endian and
//! offset-addressed: `addr` is a byte offset within the region, and every
//! access must satisfy `addr + width <= size`.
//!
//! A [`Heap`] carves regions out of an address window:
//!
//! - [`Heap::global`] covers the configured process-wide window; regions
//!   allocated from it get fresh zero-initialized storage.
//! - A region's own heap ([`Region::heap`]) carves child regions that alias
//!   the parent's bytes, so a write through a child is visible through the
//!   parent at the corresponding offset.
//!
//! [`Region::remap`] places an existing region's storage at a new base
//! address without copying; the returned region is a second view of the
//! same bytes.
//!
//! Regions are reference counted. Dropping the last handle of a carved
//! region returns its address range to the owning heap's allocator; a heap
//! stays alive while any of its carved regions does, so releasing a heap
//! handle never invalidates outstanding children.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

use crate::allocator::{AllocError, LockedAddressAllocator};
use crate::config::{DEFAULT_HEAP_BASE, DEFAULT_HEAP_SIZE};
use crate::log::{self, LogBuilder, LogLevel, LogValue};

/// Base and size of a region, also the boundary info struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    /// Base address.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
}

impl MemInfo {
    /// One-past-the-end address, saturating at the top of the address space.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Whether `addr` lies within `[base, base+size)`.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && (addr - self.base) < self.size
    }

    /// Whether two placements intersect.
    pub fn overlaps(&self, other: &MemInfo) -> bool {
        let self_end = self.base as u128 + self.size as u128;
        let other_end = other.base as u128 + other.size as u128;
        (self.base as u128) < other_end && (other.base as u128) < self_end
    }
}

/// Error produced by region access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The access extends past the end of the region.
    OutOfBounds {
        /// Byte offset of the access.
        addr: u64,
        /// Access width in bytes.
        width: u64,
        /// Region size in bytes.
        size: u64,
    },
    /// Natural alignment is enforced and the offset violates it.
    Misaligned {
        /// Byte offset of the access.
        addr: u64,
        /// Access width in bytes.
        width: u64,
    },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::OutOfBounds { addr, width, size } => {
                write!(
                    f,
                    "out of bounds: addr={:#x} width={} exceeds region size {:#x}",
                    addr, width, size
                )
            }
            AccessError::Misaligned { addr, width } => {
                write!(f, "misaligned access: addr={:#x} width={}", addr, width)
            }
        }
    }
}

impl std::error::Error for AccessError {}

/// Region identifier, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub u64);

impl RegionId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Global region ID counter.
static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

fn next_region_id() -> RegionId {
    RegionId(NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Whether multi-byte accesses must be naturally aligned.
static STRICT_ALIGN: AtomicBool = AtomicBool::new(false);

/// Enable or disable natural-alignment enforcement for region access.
///
/// Disabled by default: the backing storage is byte-granular, so unaligned
/// access is well defined. `init_with`/`init_from_env` apply the configured
/// policy here.
pub fn set_strict_alignment(strict: bool) {
    STRICT_ALIGN.store(strict, Ordering::SeqCst);
}

/// Whether natural-alignment enforcement is enabled.
pub fn strict_alignment() -> bool {
    STRICT_ALIGN.load(Ordering::SeqCst)
}

/// Backing bytes of a region.
enum Backing {
    /// Region-owned storage, zero-initialized at allocation.
    Owned(RwLock<Box<[u8]>>),
    /// A view into another region's storage. `delta` is the fixed offset of
    /// this view within the target; alias ranges nest by construction.
    Alias { target: Arc<Region>, delta: u64 },
}

/// A placed block of byte-addressable storage.
pub struct Region {
    id: RegionId,
    info: MemInfo,
    backing: Backing,
    /// The heap to return `info.base` to when the last handle drops.
    origin: Option<Arc<HeapShared>>,
    /// Lazily-created heap carving sub-regions out of this region.
    sub_heap: OnceLock<Heap>,
}

impl Region {
    /// Create a standalone region with fresh zeroed storage at `base`.
    ///
    /// Fails with `InvalidRange` if `size` is zero, does not fit host
    /// memory, or `base + size` overflows.
    pub fn new(base: u64, size: u64) -> Result<Arc<Self>, AllocError> {
        if size == 0 || base.checked_add(size).is_none() {
            return Err(AllocError::InvalidRange { base, size });
        }
        let len = usize::try_from(size).map_err(|_| AllocError::InvalidRange { base, size })?;
        Ok(Self::owned(MemInfo { base, size }, len, None))
    }

    fn owned(info: MemInfo, len: usize, origin: Option<Arc<HeapShared>>) -> Arc<Self> {
        Arc::new(Self {
            id: next_region_id(),
            info,
            backing: Backing::Owned(RwLock::new(vec![0u8; len].into_boxed_slice())),
            origin,
            sub_heap: OnceLock::new(),
        })
    }

    fn alias(
        info: MemInfo,
        target: Arc<Region>,
        delta: u64,
        origin: Option<Arc<HeapShared>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_region_id(),
            info,
            backing: Backing::Alias { target, delta },
            origin,
            sub_heap: OnceLock::new(),
        })
    }

    /// Place `region`'s storage at a new base address.
    ///
    /// Pure metadata: no bytes move, and the returned region is a second
    /// view of the same storage.
    pub fn remap(base: u64, region: &Arc<Region>) -> Arc<Region> {
        Self::alias(
            MemInfo {
                base,
                size: region.info.size,
            },
            Arc::clone(region),
            0,
            None,
        )
    }

    /// Region identifier.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Base/size snapshot.
    pub fn info(&self) -> MemInfo {
        self.info
    }

    /// The heap carving sub-regions out of this region.
    ///
    /// Created on first call and cached, so repeated calls share one
    /// allocator and carved ranges never overlap. Fails with `InvalidRange`
    /// if the region's placement overflows the address space.
    pub fn heap(self: &Arc<Self>) -> Result<Heap, AllocError> {
        if let Some(heap) = self.sub_heap.get() {
            return Ok(heap.clone());
        }
        let heap = Heap::new(self)?;
        // A racing initializer may win; its heap is kept and ours discarded
        // before anything was carved from it.
        Ok(self.sub_heap.get_or_init(|| heap).clone())
    }

    fn bounds(&self, addr: u64, width: u64) -> Result<(), AccessError> {
        match addr.checked_add(width) {
            Some(end) if end <= self.info.size => Ok(()),
            _ => Err(AccessError::OutOfBounds {
                addr,
                width,
                size: self.info.size,
            }),
        }
    }

    fn natural_align(&self, addr: u64, width: u64) -> Result<(), AccessError> {
        if width > 1 && strict_alignment() && addr % width != 0 {
            return Err(AccessError::Misaligned { addr, width });
        }
        Ok(())
    }

    /// Copy validated bytes out of the backing storage.
    fn copy_out(&self, addr: u64, buf: &mut [u8]) {
        match &self.backing {
            Backing::Owned(storage) => {
                let data = storage.read();
                let off = addr as usize;
                buf.copy_from_slice(&data[off..off + buf.len()]);
            }
            Backing::Alias { target, delta } => target.copy_out(delta + addr, buf),
        }
    }

    /// Copy validated bytes into the backing storage.
    fn copy_in(&self, addr: u64, bytes: &[u8]) {
        match &self.backing {
            Backing::Owned(storage) => {
                let mut data = storage.write();
                let off = addr as usize;
                data[off..off + bytes.len()].copy_from_slice(bytes);
            }
            Backing::Alias { target, delta } => target.copy_in(delta + addr, bytes),
        }
    }

    fn load<const N: usize>(&self, addr: u64) -> Result<[u8; N], AccessError> {
        self.bounds(addr, N as u64)?;
        self.natural_align(addr, N as u64)?;
        let mut buf = [0u8; N];
        self.copy_out(addr, &mut buf);
        Ok(buf)
    }

    fn store<const N: usize>(&self, addr: u64, bytes: [u8; N]) -> Result<(), AccessError> {
        self.bounds(addr, N as u64)?;
        self.natural_align(addr, N as u64)?;
        self.copy_in(addr, &bytes);
        Ok(())
    }

    /// Read `buf.len()` bytes starting at offset `addr`.
    pub fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        self.bounds(addr, buf.len() as u64)?;
        self.copy_out(addr, buf);
        Ok(())
    }

    /// Write `bytes` starting at offset `addr`.
    pub fn write_bytes(&self, addr: u64, bytes: &[u8]) -> Result<(), AccessError> {
        self.bounds(addr, bytes.len() as u64)?;
        self.copy_in(addr, bytes);
        Ok(())
    }

    /// Read a byte at offset `addr`.
    pub fn read_u8(&self, addr: u64) -> Result<u8, AccessError> {
        Ok(self.load::<1>(addr)?[0])
    }

    /// Read a little-endian u16 at offset `addr`.
    pub fn read_u16(&self, addr: u64) -> Result<u16, AccessError> {
        Ok(u16::from_le_bytes(self.load(addr)?))
    }

    /// Read a little-endian u32 at offset `addr`.
    pub fn read_u32(&self, addr: u64) -> Result<u32, AccessError> {
        Ok(u32::from_le_bytes(self.load(addr)?))
    }

    /// Read a little-endian u64 at offset `addr`.
    pub fn read_u64(&self, addr: u64) -> Result<u64, AccessError> {
        Ok(u64::from_le_bytes(self.load(addr)?))
    }

    /// Write a byte at offset `addr`.
    pub fn write_u8(&self, addr: u64, data: u8) -> Result<(), AccessError> {
        self.store(addr, [data])
    }

    /// Write a little-endian u16 at offset `addr`.
    pub fn write_u16(&self, addr: u64, data: u16) -> Result<(), AccessError> {
        self.store(addr, data.to_le_bytes())
    }

    /// Write a little-endian u32 at offset `addr`.
    pub fn write_u32(&self, addr: u64, data: u32) -> Result<(), AccessError> {
        self.store(addr, data.to_le_bytes())
    }

    /// Write a little-endian u64 at offset `addr`.
    pub fn write_u64(&self, addr: u64, data: u64) -> Result<(), AccessError> {
        self.store(addr, data.to_le_bytes())
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("base", &format_args!("{:#x}", self.info.base))
            .field("size", &format_args!("{:#x}", self.info.size))
            .field(
                "backing",
                &match &self.backing {
                    Backing::Owned(_) => "owned",
                    Backing::Alias { .. } => "alias",
                },
            )
            .finish()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Some(heap) = self.origin.take() {
            if let Err(err) = heap.allocator.free(self.info.base) {
                LogBuilder::new(LogLevel::Error)
                    .target("region")
                    .message(format!("releasing carved region failed: {}", err))
                    .field("base", LogValue::Addr(self.info.base))
                    .emit();
            }
        }
    }
}

/// Shared heap state: the allocator plus the optional parent region whose
/// bytes carved children alias.
struct HeapShared {
    allocator: LockedAddressAllocator,
    parent: Option<Weak<Region>>,
}

/// An allocator carving [`Region`]s out of an address window.
#[derive(Clone)]
pub struct Heap {
    inner: Arc<HeapShared>,
}

/// The process-wide heap.
static GLOBAL_HEAP: OnceLock<Heap> = OnceLock::new();

impl Heap {
    /// The process-wide heap over the configured window.
    ///
    /// Initialized on first use from the installed [`RuntimeConfig`]; an
    /// invalid configured window is reported and replaced by the defaults.
    ///
    /// [`RuntimeConfig`]: crate::config::RuntimeConfig
    pub fn global() -> &'static Heap {
        GLOBAL_HEAP.get_or_init(|| {
            let (base, size) = crate::runtime_config()
                .map(|c| (c.memory.heap_base, c.memory.heap_size))
                .unwrap_or((DEFAULT_HEAP_BASE, DEFAULT_HEAP_SIZE));
            let allocator = if size == 0 || base.checked_add(size).is_none() {
                log::error(format!(
                    "invalid global heap window base={:#x} size={:#x}, using defaults",
                    base, size
                ));
                LockedAddressAllocator::over(DEFAULT_HEAP_BASE, DEFAULT_HEAP_SIZE)
            } else {
                LockedAddressAllocator::over(base, size)
            };
            Heap {
                inner: Arc::new(HeapShared {
                    allocator,
                    parent: None,
                }),
            }
        })
    }

    /// Create a heap carving sub-regions out of `parent`'s address range.
    ///
    /// Children alias the parent's bytes. Prefer [`Region::heap`], which
    /// caches one heap per region; a second heap over the same parent hands
    /// out ranges independently and may overlap the first's.
    pub fn new(parent: &Arc<Region>) -> Result<Heap, AllocError> {
        let info = parent.info();
        let allocator = LockedAddressAllocator::new(info.base, info.size)?;
        Ok(Heap {
            inner: Arc::new(HeapShared {
                allocator,
                parent: Some(Arc::downgrade(parent)),
            }),
        })
    }

    /// Allocate a region of `size` bytes aligned to `align`.
    ///
    /// Fails with `OutOfSpace`/`InvalidRange` per the allocator contract,
    /// and with `OutOfSpace` if this heap's parent region is gone.
    pub fn alloc(&self, size: u64, align: u64) -> Result<Arc<Region>, AllocError> {
        let addr = self.inner.allocator.allocate(size, align)?;
        let info = MemInfo { base: addr, size };

        let region = match &self.inner.parent {
            None => {
                let len = match usize::try_from(size) {
                    Ok(len) => len,
                    Err(_) => {
                        let _ = self.inner.allocator.free(addr);
                        return Err(AllocError::InvalidRange { base: addr, size });
                    }
                };
                Region::owned(info, len, Some(Arc::clone(&self.inner)))
            }
            Some(parent) => match parent.upgrade() {
                Some(parent) => {
                    let delta = addr - parent.info().base;
                    Region::alias(info, parent, delta, Some(Arc::clone(&self.inner)))
                }
                None => {
                    let _ = self.inner.allocator.free(addr);
                    log::warn("allocation from a heap whose parent region is gone");
                    return Err(AllocError::OutOfSpace { size, align });
                }
            },
        };

        LogBuilder::new(LogLevel::Debug)
            .target("heap")
            .message("region allocated")
            .field("id", LogValue::Int(region.id().as_u64() as i64))
            .field("base", LogValue::Addr(addr))
            .field("size", LogValue::Addr(size))
            .emit();
        Ok(region)
    }

    /// Base address of the heap's window.
    pub fn base(&self) -> u64 {
        self.inner.allocator.base()
    }

    /// Size of the heap's window in bytes.
    pub fn size(&self) -> u64 {
        self.inner.allocator.size()
    }

    /// Number of outstanding carved regions.
    pub fn allocation_count(&self) -> usize {
        self.inner.allocator.allocation_count()
    }

    /// Whether `addr` is the base of an outstanding carved region.
    pub fn is_allocated(&self, addr: u64) -> bool {
        self.inner.allocator.is_allocated(addr)
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("size", &format_args!("{:#x}", self.size()))
            .field("allocations", &self.allocation_count())
            .field("scoped", &self.inner.parent.is_some())
            .finish()
    }
}
