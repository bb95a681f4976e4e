//! FFI Integration Tests
//!
//! Drives the exported `dm_*` C ABI end-to-end, the way a simulator
//! testbench would: create spaces and allocators, carve regions, read and
//! write through both boundary conventions, and release everything.

use std::ffi::{c_void, CString};

use dm_runtime::ffi::{
    dm_add_region, dm_alloc_addr, dm_alloc_region, dm_c_region_info, dm_c_region_read_u16,
    dm_c_region_read_u32, dm_c_region_read_u64, dm_c_region_read_u8, dm_clean_region,
    dm_delete_region, dm_dpi_region_info, dm_dpi_region_read_u16, dm_dpi_region_read_u32,
    dm_dpi_region_read_u64, dm_dpi_region_read_u8, dm_free_addr, dm_free_heap, dm_free_info,
    dm_free_region, dm_get_region, dm_get_space, dm_heap, dm_map_region, dm_new_allocator,
    dm_new_locked_allocator, dm_new_space, dm_region_write_u16, dm_region_write_u32,
    dm_region_write_u64, dm_region_write_u8, dm_runtime_init, DM_ALLOC_FAILED,
};
use dm_runtime::MemInfo;

fn name(s: &str) -> CString {
    CString::new(s).unwrap()
}

#[test]
fn test_runtime_init() {
    assert_eq!(dm_runtime_init(), 0);
}

#[test]
fn test_allocator_first_fit_scenario() {
    // The canonical placement scenario over [0x1000, 0x1000+0x2000).
    let alloc = dm_new_allocator(0x1000, 0x2000);
    assert!(!alloc.is_null());
    unsafe {
        let a = dm_alloc_addr(alloc, 0x100, 0x10);
        assert_eq!(a, 0x1000);
        let b = dm_alloc_addr(alloc, 0x100, 0x10);
        assert_eq!(b, 0x1100);
        dm_free_addr(alloc, a);
        // The freed 0x100 hole cannot fit 0x200; first-fit moves on to the
        // next contiguous free area.
        let c = dm_alloc_addr(alloc, 0x200, 0x10);
        assert_eq!(c, 0x1200);
    }
}

#[test]
fn test_locked_allocator_concurrent() {
    let alloc = dm_new_locked_allocator(0, 0x100_0000);
    assert!(!alloc.is_null());
    let handle = alloc as usize;

    let threads: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(move || {
                let alloc = handle as *mut c_void;
                let mut live = Vec::new();
                for _ in 0..200 {
                    let addr = unsafe { dm_alloc_addr(alloc, 0x40, 0x10) };
                    assert_ne!(addr, DM_ALLOC_FAILED);
                    assert_eq!(addr % 0x10, 0);
                    live.push(addr);
                }
                for addr in live {
                    unsafe { dm_free_addr(alloc, addr) };
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
}

#[test]
fn test_alloc_addr_failure_sentinel() {
    let alloc = dm_new_locked_allocator(0, 0x100);
    unsafe {
        assert_eq!(dm_alloc_addr(alloc, 0x200, 1), DM_ALLOC_FAILED);
        // Zero-size requests are rejected the same way.
        assert_eq!(dm_alloc_addr(alloc, 0, 1), DM_ALLOC_FAILED);
    }
}

#[test]
fn test_region_read_write_both_conventions() {
    unsafe {
        let region = dm_alloc_region(std::ptr::null_mut(), 0x100, 0x10);
        assert!(!region.is_null());

        dm_region_write_u8(region, 0x00, 0xab);
        dm_region_write_u16(region, 0x02, 0xbeef);
        dm_region_write_u32(region, 0x04, 0xdead_beef);
        dm_region_write_u64(region, 0x08, 0x0123_4567_89ab_cdef);

        // Return-value convention.
        assert_eq!(dm_c_region_read_u8(region, 0x00), 0xab);
        assert_eq!(dm_c_region_read_u16(region, 0x02), 0xbeef);
        assert_eq!(dm_c_region_read_u32(region, 0x04), 0xdead_beef);
        assert_eq!(dm_c_region_read_u64(region, 0x08), 0x0123_4567_89ab_cdef);

        // Out-parameter convention must agree on identical inputs.
        let mut v8 = 0u8;
        let mut v16 = 0u16;
        let mut v32 = 0u32;
        let mut v64 = 0u64;
        dm_dpi_region_read_u8(region, 0x00, &mut v8);
        dm_dpi_region_read_u16(region, 0x02, &mut v16);
        dm_dpi_region_read_u32(region, 0x04, &mut v32);
        dm_dpi_region_read_u64(region, 0x08, &mut v64);
        assert_eq!(v8, dm_c_region_read_u8(region, 0x00));
        assert_eq!(v16, dm_c_region_read_u16(region, 0x02));
        assert_eq!(v32, dm_c_region_read_u32(region, 0x04));
        assert_eq!(v64, dm_c_region_read_u64(region, 0x08));

        dm_free_region(region);
    }
}

#[test]
fn test_region_info_both_conventions() {
    unsafe {
        let region = dm_alloc_region(std::ptr::null_mut(), 0x400, 0x100);
        assert!(!region.is_null());

        let boxed = dm_c_region_info(region);
        assert!(!boxed.is_null());
        let mut filled = MemInfo { base: 0, size: 0 };
        dm_dpi_region_info(region, &mut filled);

        assert_eq!((*boxed).base, filled.base);
        assert_eq!((*boxed).size, filled.size);
        assert_eq!(filled.size, 0x400);
        assert_eq!(filled.base % 0x100, 0);

        dm_free_info(boxed);
        dm_free_region(region);
    }
}

#[test]
fn test_space_register_lookup_delete() {
    unsafe {
        let space_name = name("test_space_register_lookup_delete");
        let space = dm_get_space(space_name.as_ptr());
        assert!(!space.is_null());

        // Lookup-or-create returns the same space for the same name.
        let space_again = dm_get_space(space_name.as_ptr());
        assert!(!space_again.is_null());

        let region = dm_alloc_region(std::ptr::null_mut(), 0x100, 1);
        let reg_name = name("sram");
        let echoed = dm_add_region(space, reg_name.as_ptr(), region);
        assert_eq!(echoed, region);

        // Visible through the other handle to the same space.
        let found = dm_get_region(space_again, reg_name.as_ptr());
        assert!(!found.is_null());
        dm_region_write_u32(region, 0, 0x1234_5678);
        assert_eq!(dm_c_region_read_u32(found, 0), 0x1234_5678);
        dm_free_region(found);

        let missing = name("missing");
        assert!(dm_get_region(space, missing.as_ptr()).is_null());

        dm_delete_region(space, reg_name.as_ptr());
        assert!(dm_get_region(space, reg_name.as_ptr()).is_null());

        dm_free_region(region);
    }
}

#[test]
fn test_clean_region_stale_guard() {
    unsafe {
        let space = dm_new_space();
        let reg_name = name("buf");

        let first = dm_alloc_region(std::ptr::null_mut(), 0x100, 1);
        dm_add_region(space, reg_name.as_ptr(), first);

        let second = dm_alloc_region(std::ptr::null_mut(), 0x100, 1);
        dm_add_region(space, reg_name.as_ptr(), second);

        // Cleaning with the replaced region must not remove the current one.
        dm_clean_region(space, reg_name.as_ptr(), first);
        let current = dm_get_region(space, reg_name.as_ptr());
        assert!(!current.is_null());
        dm_free_region(current);

        // Cleaning with the current region removes it.
        dm_clean_region(space, reg_name.as_ptr(), second);
        assert!(dm_get_region(space, reg_name.as_ptr()).is_null());

        dm_free_region(first);
        dm_free_region(second);
    }
}

#[test]
fn test_region_heap_carving() {
    unsafe {
        let parent = dm_alloc_region(std::ptr::null_mut(), 0x1000, 0x1000);
        assert!(!parent.is_null());
        let heap = dm_heap(parent);
        assert!(!heap.is_null());

        let child = dm_alloc_region(heap, 0x100, 0x10);
        assert!(!child.is_null());

        let mut parent_info = MemInfo { base: 0, size: 0 };
        let mut child_info = MemInfo { base: 0, size: 0 };
        dm_dpi_region_info(parent, &mut parent_info);
        dm_dpi_region_info(child, &mut child_info);
        assert!(child_info.base >= parent_info.base);
        assert!(child_info.base + child_info.size <= parent_info.base + parent_info.size);

        // Writes through the child are visible through the parent.
        let delta = child_info.base - parent_info.base;
        dm_region_write_u32(child, 4, 0xfeed_face);
        assert_eq!(dm_c_region_read_u32(parent, delta + 4), 0xfeed_face);

        // Freeing the heap handle does not invalidate the child.
        dm_free_heap(heap);
        assert_eq!(dm_c_region_read_u32(child, 4), 0xfeed_face);

        dm_free_region(child);
        dm_free_region(parent);
    }
}

#[test]
fn test_map_region_shares_bytes() {
    unsafe {
        let region = dm_alloc_region(std::ptr::null_mut(), 0x100, 1);
        let view = dm_map_region(region, 0x4000_0000);
        assert!(!view.is_null());

        let mut info = MemInfo { base: 0, size: 0 };
        dm_dpi_region_info(view, &mut info);
        assert_eq!(info.base, 0x4000_0000);
        assert_eq!(info.size, 0x100);

        dm_region_write_u64(region, 0x20, 0xaaaa_bbbb_cccc_dddd);
        assert_eq!(dm_c_region_read_u64(view, 0x20), 0xaaaa_bbbb_cccc_dddd);

        dm_free_region(view);
        dm_free_region(region);
    }
}

#[test]
fn test_add_region_overlap_rejected() {
    unsafe {
        let space = dm_new_space();

        let a = dm_alloc_region(std::ptr::null_mut(), 0x100, 1);
        let name_a = name("a");
        assert!(!dm_add_region(space, name_a.as_ptr(), a).is_null());

        // A view of the same placement under a different name overlaps.
        let mut info = MemInfo { base: 0, size: 0 };
        dm_dpi_region_info(a, &mut info);
        let clash = dm_map_region(a, info.base);
        let name_b = name("b");
        assert!(dm_add_region(space, name_b.as_ptr(), clash).is_null());

        dm_free_region(clash);
        dm_free_region(a);
    }
}

#[test]
fn test_invalid_creations() {
    unsafe {
        assert!(dm_new_allocator(0, 0).is_null());
        assert!(dm_new_locked_allocator(u64::MAX, 0x10).is_null());
        assert!(dm_get_space(std::ptr::null()).is_null());
        // Carving more than the window holds fails cleanly.
        assert!(dm_alloc_region(std::ptr::null_mut(), 0, 1).is_null());
    }
}
