//! Address-Range Allocation
//!
//! An allocator for numeric address ranges within a fixed window
//! `[base, base+size)`. It hands out non-overlapping aligned ranges,
//! accepts them back, and coalesces adjacent free space so the window does
//! not fragment permanently. This is not a heap for Rust objects; the
//! "memory" here is an address space a simulator carves device and DMA
//! windows out of.
//!
//! ## Design
//!
//! - Free space is a sorted `Vec` of disjoint, coalesced ranges.
//! - Outstanding allocations are tracked by start address, which makes
//!   double-free and garbage-address free detectable in release builds.
//! - Allocation policy is first-fit from the lowest address: the scan walks
//!   the sorted free list and takes the lowest aligned start that fits.
//!   This keeps the placement of a fixed request sequence deterministic.
//! - Free-list invariants (sorted, disjoint, in-window) are re-checked with
//!   `debug_assert!` after every mutation.
//!
//! `AddressAllocator` is not internally synchronized; callers sharing one
//! across threads use [`LockedAddressAllocator`], which serializes every
//! operation behind a mutex.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use parking_lot::Mutex;

/// Error produced by address-range allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The window or requested range is empty or overflows the address space.
    InvalidRange {
        /// Range base.
        base: u64,
        /// Range size in bytes.
        size: u64,
    },
    /// No free range satisfies the requested size and alignment.
    OutOfSpace {
        /// Requested size in bytes.
        size: u64,
        /// Requested alignment.
        align: u64,
    },
    /// The freed address is not the start of an outstanding allocation.
    InvalidAddress {
        /// The offending address.
        addr: u64,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidRange { base, size } => {
                write!(f, "invalid range: base={:#x}, size={:#x}", base, size)
            }
            AllocError::OutOfSpace { size, align } => {
                write!(
                    f,
                    "out of space: no free range fits size={:#x} align={:#x}",
                    size, align
                )
            }
            AllocError::InvalidAddress { addr } => {
                write!(
                    f,
                    "invalid address {:#x}: not an outstanding allocation",
                    addr
                )
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// Round `value` up to a multiple of `align`.
///
/// Alignment 0 or 1 means unconstrained. Non-power-of-two alignments are
/// honored. Returns `None` if rounding overflows.
pub(crate) fn align_up(value: u64, align: u64) -> Option<u64> {
    if align <= 1 {
        return Some(value);
    }
    let rem = value % align;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(align - rem)
    }
}

/// An allocator for address ranges within `[base, base+size)`.
///
/// # Examples
///
/// ```rust,ignore
/// use dm_runtime::allocator::AddressAllocator;
///
/// let mut alloc = AddressAllocator::new(0x1000, 0x2000)?;
/// let a = alloc.allocate(0x100, 0x10)?; // 0x1000
/// let b = alloc.allocate(0x100, 0x10)?; // 0x1100
/// alloc.free(a)?;
/// ```
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    base: u64,
    size: u64,
    /// Sorted, disjoint, coalesced free ranges.
    free: Vec<Range<u64>>,
    /// Outstanding allocations: start address to size.
    allocated: HashMap<u64, u64>,
}

impl AddressAllocator {
    /// Create an allocator covering `[base, base+size)`.
    ///
    /// Fails with `InvalidRange` if `size` is zero or `base + size`
    /// overflows the 64-bit address space.
    pub fn new(base: u64, size: u64) -> Result<Self, AllocError> {
        if size == 0 || base.checked_add(size).is_none() {
            return Err(AllocError::InvalidRange { base, size });
        }
        Ok(Self::over(base, size))
    }

    /// Create an allocator over an already-validated window.
    pub(crate) fn over(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            free: vec![base..base + size],
            allocated: HashMap::new(),
        }
    }

    /// Base address of the window.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// Returns the start address of the allocated range. Alignment 0 or 1
    /// means unconstrained. Fails with `InvalidRange` for a zero-size
    /// request and `OutOfSpace` when no aligned fit exists.
    pub fn allocate(&mut self, size: u64, align: u64) -> Result<u64, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidRange {
                base: self.base,
                size,
            });
        }

        for idx in 0..self.free.len() {
            let range = self.free[idx].clone();
            let start = match align_up(range.start, align) {
                Some(start) => start,
                None => continue,
            };
            let end = match start.checked_add(size) {
                Some(end) => end,
                None => continue,
            };
            if end > range.end {
                continue;
            }

            self.take(idx, start..end);
            self.allocated.insert(start, size);
            self.debug_validate();
            return Ok(start);
        }

        Err(AllocError::OutOfSpace { size, align })
    }

    /// Return a previously allocated range to the free set.
    ///
    /// `addr` must be the start address of an outstanding allocation;
    /// anything else (double-free, garbage) fails with `InvalidAddress`.
    /// Returns the size of the freed range.
    pub fn free(&mut self, addr: u64) -> Result<u64, AllocError> {
        let size = self
            .allocated
            .remove(&addr)
            .ok_or(AllocError::InvalidAddress { addr })?;
        self.insert_free(addr..addr + size);
        self.debug_validate();
        Ok(size)
    }

    /// Number of outstanding allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocated.len()
    }

    /// Whether `addr` is the start of an outstanding allocation.
    pub fn is_allocated(&self, addr: u64) -> bool {
        self.allocated.contains_key(&addr)
    }

    /// Total free bytes in the window.
    pub fn free_bytes(&self) -> u64 {
        self.free.iter().map(|r| r.end - r.start).sum()
    }

    /// The free ranges, sorted by start address.
    pub fn free_ranges(&self) -> &[Range<u64>] {
        &self.free
    }

    /// Carve `taken` out of the free range at `idx`, keeping leftover
    /// head/tail fragments free. `taken` must lie within that range.
    fn take(&mut self, idx: usize, taken: Range<u64>) {
        let range = self.free[idx].clone();
        let head = range.start..taken.start;
        let tail = taken.end..range.end;

        match (head.is_empty(), tail.is_empty()) {
            (false, false) => {
                self.free[idx] = head;
                self.free.insert(idx + 1, tail);
            }
            (false, true) => self.free[idx] = head,
            (true, false) => self.free[idx] = tail,
            (true, true) => {
                self.free.remove(idx);
            }
        }
    }

    /// Insert a range into the free set, coalescing with adjacent
    /// neighbors. The range must not overlap any free range.
    fn insert_free(&mut self, range: Range<u64>) {
        let idx = self.free.partition_point(|r| r.start < range.start);
        let merge_prev = idx > 0 && self.free[idx - 1].end == range.start;
        let merge_next = idx < self.free.len() && self.free[idx].start == range.end;

        match (merge_prev, merge_next) {
            (true, true) => {
                self.free[idx - 1].end = self.free[idx].end;
                self.free.remove(idx);
            }
            (true, false) => self.free[idx - 1].end = range.end,
            (false, true) => self.free[idx].start = range.start,
            (false, false) => self.free.insert(idx, range),
        }
    }

    /// Debug-build invariant check: sorted, disjoint, coalesced, in-window.
    fn debug_validate(&self) {
        if cfg!(debug_assertions) {
            let end = self.base + self.size;
            for (i, r) in self.free.iter().enumerate() {
                debug_assert!(r.start < r.end, "empty free range {:?}", r);
                debug_assert!(
                    r.start >= self.base && r.end <= end,
                    "free range {:?} outside window",
                    r
                );
                if i > 0 {
                    debug_assert!(
                        self.free[i - 1].end < r.start,
                        "free ranges not disjoint/coalesced: {:?} then {:?}",
                        self.free[i - 1],
                        r
                    );
                }
            }
        }
    }
}

/// An [`AddressAllocator`] that serializes every operation behind a mutex.
///
/// Same contract and error taxonomy as the unlocked allocator; the only
/// addition is that at most one mutating operation is in flight at a time
/// across concurrent callers.
#[derive(Debug)]
pub struct LockedAddressAllocator {
    inner: Mutex<AddressAllocator>,
}

impl LockedAddressAllocator {
    /// Create a locked allocator covering `[base, base+size)`.
    pub fn new(base: u64, size: u64) -> Result<Self, AllocError> {
        Ok(Self {
            inner: Mutex::new(AddressAllocator::new(base, size)?),
        })
    }

    /// Create a locked allocator over an already-validated window.
    pub(crate) fn over(base: u64, size: u64) -> Self {
        Self {
            inner: Mutex::new(AddressAllocator::over(base, size)),
        }
    }

    /// Allocate `size` bytes aligned to `align`. See
    /// [`AddressAllocator::allocate`].
    pub fn allocate(&self, size: u64, align: u64) -> Result<u64, AllocError> {
        self.inner.lock().allocate(size, align)
    }

    /// Return a previously allocated range. See [`AddressAllocator::free`].
    pub fn free(&self, addr: u64) -> Result<u64, AllocError> {
        self.inner.lock().free(addr)
    }

    /// Base address of the window.
    pub fn base(&self) -> u64 {
        self.inner.lock().base()
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> u64 {
        self.inner.lock().size()
    }

    /// Number of outstanding allocations.
    pub fn allocation_count(&self) -> usize {
        self.inner.lock().allocation_count()
    }

    /// Whether `addr` is the start of an outstanding allocation.
    pub fn is_allocated(&self, addr: u64) -> bool {
        self.inner.lock().is_allocated(addr)
    }

    /// Total free bytes in the window.
    pub fn free_bytes(&self) -> u64 {
        self.inner.lock().free_bytes()
    }

    /// Snapshot of the free ranges, sorted by start address.
    pub fn free_ranges(&self) -> Vec<Range<u64>> {
        self.inner.lock().free_ranges().to_vec()
    }

    /// Run `f` with exclusive access to the underlying allocator.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut AddressAllocator) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_window() {
        assert_eq!(
            AddressAllocator::new(0, 0).err(),
            Some(AllocError::InvalidRange { base: 0, size: 0 })
        );
        assert_eq!(
            AddressAllocator::new(u64::MAX, 2).err(),
            Some(AllocError::InvalidRange {
                base: u64::MAX,
                size: 2
            })
        );
        // A window ending exactly at the top of the address space is fine.
        assert!(AddressAllocator::new(u64::MAX - 0x1000, 0x1000).is_ok());
    }

    #[test]
    fn test_basic_allocate_free() {
        let mut alloc = AddressAllocator::new(0x1000, 0x1000).unwrap();
        let a = alloc.allocate(0x100, 1).unwrap();
        assert_eq!(a, 0x1000);
        assert!(alloc.is_allocated(a));
        assert_eq!(alloc.free_bytes(), 0xf00);

        assert_eq!(alloc.free(a), Ok(0x100));
        assert!(!alloc.is_allocated(a));
        assert_eq!(alloc.free_bytes(), 0x1000);
    }

    #[test]
    fn test_alignment() {
        let mut alloc = AddressAllocator::new(0x1001, 0x1000).unwrap();
        let a = alloc.allocate(0x10, 0x100).unwrap();
        assert_eq!(a % 0x100, 0);
        assert_eq!(a, 0x1100);
    }

    #[test]
    fn test_zero_and_one_align_unconstrained() {
        let mut alloc = AddressAllocator::new(0x1003, 0x100).unwrap();
        assert_eq!(alloc.allocate(1, 0).unwrap(), 0x1003);
        assert_eq!(alloc.allocate(1, 1).unwrap(), 0x1004);
    }

    #[test]
    fn test_non_power_of_two_alignment() {
        let mut alloc = AddressAllocator::new(0, 0x1000).unwrap();
        alloc.allocate(1, 1).unwrap();
        let a = alloc.allocate(8, 24).unwrap();
        assert_eq!(a % 24, 0);
        assert_eq!(a, 24);
    }

    #[test]
    fn test_zero_size_request() {
        let mut alloc = AddressAllocator::new(0, 0x1000).unwrap();
        assert!(matches!(
            alloc.allocate(0, 1),
            Err(AllocError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_out_of_space() {
        let mut alloc = AddressAllocator::new(0, 0x100).unwrap();
        assert_eq!(
            alloc.allocate(0x101, 1),
            Err(AllocError::OutOfSpace {
                size: 0x101,
                align: 1
            })
        );
        // Fits unaligned but not at the required alignment.
        alloc.allocate(0xff, 1).unwrap();
        assert!(matches!(
            alloc.allocate(1, 0x200),
            Err(AllocError::OutOfSpace { .. })
        ));
    }

    #[test]
    fn test_double_free_detected() {
        let mut alloc = AddressAllocator::new(0, 0x1000).unwrap();
        let a = alloc.allocate(0x10, 1).unwrap();
        alloc.free(a).unwrap();
        assert_eq!(alloc.free(a), Err(AllocError::InvalidAddress { addr: a }));
        // Garbage address, never handed out.
        assert_eq!(
            alloc.free(0x123),
            Err(AllocError::InvalidAddress { addr: 0x123 })
        );
    }

    #[test]
    fn test_coalescing_round_trip() {
        let mut alloc = AddressAllocator::new(0x1000, 0x1000).unwrap();
        let before = alloc.free_ranges().to_vec();
        let a = alloc.allocate(0x80, 0x10).unwrap();
        alloc.free(a).unwrap();
        assert_eq!(alloc.free_ranges(), &before[..]);
    }

    #[test]
    fn test_coalescing_middle() {
        let mut alloc = AddressAllocator::new(0, 0x300).unwrap();
        let a = alloc.allocate(0x100, 1).unwrap();
        let b = alloc.allocate(0x100, 1).unwrap();
        let c = alloc.allocate(0x100, 1).unwrap();
        alloc.free(a).unwrap();
        alloc.free(c).unwrap();
        assert_eq!(alloc.free_ranges().len(), 2);
        alloc.free(b).unwrap();
        assert_eq!(alloc.free_ranges(), &[0..0x300]);
    }

    #[test]
    fn test_first_fit_scenario() {
        // Deterministic placement over [0x1000, 0x1000+0x2000).
        let mut alloc = AddressAllocator::new(0x1000, 0x2000).unwrap();
        let a = alloc.allocate(0x100, 0x10).unwrap();
        assert_eq!(a, 0x1000);
        let b = alloc.allocate(0x100, 0x10).unwrap();
        assert_eq!(b, 0x1100);
        alloc.free(a).unwrap();
        // The 0x100 hole at 0x1000 cannot fit 0x200, so first-fit lands on
        // the next contiguous free area at 0x1200.
        let c = alloc.allocate(0x200, 0x10).unwrap();
        assert_eq!(c, 0x1200);
        // A request that does fit the hole reuses the lowest address.
        let d = alloc.allocate(0x100, 0x10).unwrap();
        assert_eq!(d, 0x1000);
    }

    #[test]
    fn test_allocate_entire_window() {
        let mut alloc = AddressAllocator::new(0x4000, 0x400).unwrap();
        let a = alloc.allocate(0x400, 1).unwrap();
        assert_eq!(a, 0x4000);
        assert_eq!(alloc.free_bytes(), 0);
        assert!(matches!(
            alloc.allocate(1, 1),
            Err(AllocError::OutOfSpace { .. })
        ));
        alloc.free(a).unwrap();
        assert_eq!(alloc.free_bytes(), 0x400);
    }

    #[test]
    fn test_locked_allocator_basic() {
        let alloc = LockedAddressAllocator::new(0x1000, 0x1000).unwrap();
        let a = alloc.allocate(0x100, 0x10).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(alloc.allocation_count(), 1);
        alloc.free(a).unwrap();
        assert_eq!(alloc.allocation_count(), 0);
        assert_eq!(alloc.free_ranges(), vec![0x1000..0x2000]);
    }

    #[test]
    fn test_conservation() {
        // Free bytes plus outstanding bytes always equals the window size.
        let mut alloc = AddressAllocator::new(0, 0x10000).unwrap();
        let mut live = Vec::new();
        for i in 1..20u64 {
            let size = i * 0x10;
            live.push((alloc.allocate(size, 0x20).unwrap(), size));
        }
        for idx in (0..live.len()).step_by(2).rev() {
            let (addr, _) = live.remove(idx);
            alloc.free(addr).unwrap();
        }
        let outstanding: u64 = live.iter().map(|&(_, size)| size).sum();
        assert_eq!(alloc.free_bytes() + outstanding, 0x10000);
        assert_eq!(alloc.allocation_count(), live.len());
    }
}
