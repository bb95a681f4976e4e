//! # dm-runtime
//!
//! A memory and address-space management runtime for hardware-simulation
//! testbenches. The crate builds as a C library (`cdylib`/`staticlib`) so a
//! simulator or SystemVerilog testbench can drive it over DPI through the
//! `dm_*` exports, and as a regular Rust library (`rlib`) for native use.
//!
//! The runtime provides:
//!
//! - **Address allocators**: non-overlapping aligned ranges carved out of a
//!   fixed window, with free/reuse and coalescing (`allocator`)
//! - **Memory regions**: placed, byte-addressable storage with sized
//!   little-endian reads and writes, remapping, and region-scoped heaps
//!   (`region`)
//! - **Spaces**: named region registries with a process-wide lookup table
//!   (`space`)
//! - **C ABI boundary**: opaque handles and `dm_*` exports (`ffi`)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      DM RUNTIME                          │
//! ├─────────────────────────────────────────────────────────┤
//! │                                                          │
//! │   ┌──────────────┐   ┌──────────────┐   ┌────────────┐  │
//! │   │    Spaces    │   │   Regions    │   │ Allocators │  │
//! │   │  (space.rs)  │──▶│ (region.rs)  │──▶│(allocator. │  │
//! │   └──────────────┘   └──────────────┘   │    rs)     │  │
//! │          ▲                  ▲           └────────────┘  │
//! │          │                  │                           │
//! │   ┌──────┴──────────────────┴──────┐   ┌────────────┐   │
//! │   │         C ABI (ffi.rs)         │   │ Config/Log │   │
//! │   └────────────────────────────────┘   └────────────┘   │
//! │                                                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use dm_runtime::{Heap, space_table};
//!
//! let space = space_table().get_space("soc");
//! let region = Heap::global().alloc(0x1000, 0x1000)?;
//! space.add_region("sram", &region)?;
//!
//! let sram = space.get_region("sram").unwrap();
//! sram.write_u32(0x10, 0xdead_beef)?;
//! assert_eq!(sram.read_u32(0x10)?, 0xdead_beef);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod allocator;
pub mod config;
pub mod ffi;
pub mod log;
pub mod region;
pub mod space;

// Re-exports
pub use allocator::{AddressAllocator, AllocError, LockedAddressAllocator};
pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use region::{AccessError, Heap, MemInfo, Region, RegionId};
pub use space::{space_table, Space, SpaceError, SpaceTable};

use std::sync::OnceLock;

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Global runtime configuration.
static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Get the installed runtime configuration.
///
/// Returns `None` if the runtime has not been initialized with `init_with`
/// or `init_from_env`; consumers fall back to defaults in that case.
pub fn runtime_config() -> Option<&'static RuntimeConfig> {
    RUNTIME_CONFIG.get()
}

/// Initialize the runtime with default configuration.
pub fn init() {
    init_with(RuntimeConfig::default());
}

/// Initialize the runtime with the given configuration.
///
/// The first call wins; later calls (and later `init_from_env` calls) are
/// no-ops apart from reapplying the log settings of the installed
/// configuration. Must run before the global heap is first used for the
/// heap window settings to take effect.
pub fn init_with(config: RuntimeConfig) {
    let _ = RUNTIME_CONFIG.set(config);
    if let Some(installed) = RUNTIME_CONFIG.get() {
        log::set_level(installed.log.level);
        log::set_format(installed.log.format);
        region::set_strict_alignment(installed.memory.strict_alignment);
    }
}

/// Initialize the runtime from `DM_*` environment variables.
///
/// See [`config::RuntimeConfig::from_env`] for the variable list.
pub fn init_from_env() {
    init_with(RuntimeConfig::from_env());
}
