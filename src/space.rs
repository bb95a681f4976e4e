//! Named Region Registry
//!
//! A [`Space`] maps string names to regions so a testbench can publish a
//! region under a well-known name from one thread and look it up from
//! another. Names are unique within a space; registering under an existing
//! name releases the previous region first. Since a space also serves
//! lookup by address ([`Space::get_region_by_addr`]), regions registered
//! under distinct names must not overlap in placement.
//!
//! [`space_table`] is the process-wide registry of spaces, keyed by name
//! with lookup-or-create semantics. It is initialized on first use and
//! lives for the process lifetime.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::log::{LogBuilder, LogLevel, LogValue};
use crate::region::{MemInfo, Region};

/// Error produced by space operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    /// The region's placement overlaps a region registered under another name.
    Overlap {
        /// Name of the already-registered region.
        name: String,
        /// Placement of the already-registered region.
        info: MemInfo,
    },
    /// No region is registered under the name.
    NotFound {
        /// The missing name.
        name: String,
    },
}

impl fmt::Display for SpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceError::Overlap { name, info } => {
                write!(
                    f,
                    "placement overlaps region \"{}\" at base={:#x} size={:#x}",
                    name, info.base, info.size
                )
            }
            SpaceError::NotFound { name } => {
                write!(f, "no region registered under \"{}\"", name)
            }
        }
    }
}

impl std::error::Error for SpaceError {}

/// A named collection of regions.
#[derive(Default)]
pub struct Space {
    regions: RwLock<HashMap<String, Arc<Region>>>,
}

impl Space {
    /// Create an empty space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `region` under `name`.
    ///
    /// A region previously registered under `name` is released first, then
    /// replaced; the swap is atomic from other callers' perspective. Fails
    /// with `Overlap` if the placement intersects a region registered under
    /// a different name, leaving the space unchanged.
    pub fn add_region(
        &self,
        name: &str,
        region: &Arc<Region>,
    ) -> Result<Arc<Region>, SpaceError> {
        let info = region.info();
        let mut regions = self.regions.write();
        for (other_name, other) in regions.iter() {
            if other_name != name && info.overlaps(&other.info()) {
                return Err(SpaceError::Overlap {
                    name: other_name.clone(),
                    info: other.info(),
                });
            }
        }
        let old = regions.insert(name.to_string(), Arc::clone(region));
        drop(regions);
        // The replaced region is released here, outside the map lock.
        drop(old);
        Ok(Arc::clone(region))
    }

    /// Look up the region registered under `name`.
    pub fn get_region(&self, name: &str) -> Option<Arc<Region>> {
        self.regions.read().get(name).cloned()
    }

    /// Look up the region whose placement contains `addr`.
    pub fn get_region_by_addr(&self, addr: u64) -> Option<Arc<Region>> {
        self.regions
            .read()
            .values()
            .find(|r| r.info().contains(addr))
            .cloned()
    }

    /// Release and remove the region under `name`, but only if the stored
    /// region is `expect` itself.
    ///
    /// The identity guard makes a stale cleanup a no-op: if the name has
    /// already been replaced, the replacement stays registered.
    pub fn clean_region(&self, name: &str, expect: &Arc<Region>) {
        let mut regions = self.regions.write();
        let matches = regions
            .get(name)
            .map_or(false, |current| Arc::ptr_eq(current, expect));
        if matches {
            let old = regions.remove(name);
            drop(regions);
            drop(old);
        }
    }

    /// Release and remove the region under `name` unconditionally.
    pub fn delete_region(&self, name: &str) -> Result<(), SpaceError> {
        let mut regions = self.regions.write();
        let old = regions.remove(name).ok_or_else(|| SpaceError::NotFound {
            name: name.to_string(),
        })?;
        drop(regions);
        drop(old);
        Ok(())
    }

    /// Number of registered regions.
    pub fn region_count(&self) -> usize {
        self.regions.read().len()
    }
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space")
            .field("regions", &self.region_count())
            .finish()
    }
}

/// The process-wide registry of spaces.
pub struct SpaceTable {
    spaces: RwLock<HashMap<String, Arc<Space>>>,
}

impl SpaceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            spaces: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the space named `name`, creating and registering it if
    /// absent.
    pub fn get_space(&self, name: &str) -> Arc<Space> {
        if let Some(space) = self.spaces.read().get(name) {
            return Arc::clone(space);
        }
        let mut spaces = self.spaces.write();
        // A racing creator may have won between the two locks.
        if let Some(space) = spaces.get(name) {
            return Arc::clone(space);
        }
        let space = Arc::new(Space::new());
        spaces.insert(name.to_string(), Arc::clone(&space));
        LogBuilder::new(LogLevel::Debug)
            .target("space")
            .message("space created")
            .field("name", LogValue::String(name.to_string()))
            .emit();
        space
    }

    /// Whether a space named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.spaces.read().contains_key(name)
    }

    /// Number of registered spaces.
    pub fn space_count(&self) -> usize {
        self.spaces.read().len()
    }
}

impl Default for SpaceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global space table instance.
static SPACE_TABLE: OnceLock<SpaceTable> = OnceLock::new();

/// Get the global space table.
///
/// Populated on first use, lives for the process lifetime.
pub fn space_table() -> &'static SpaceTable {
    SPACE_TABLE.get_or_init(SpaceTable::new)
}
