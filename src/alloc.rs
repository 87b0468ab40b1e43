//! Free-id search over the OS identity namespace.
//!
//! Regular accounts get the lowest free id scanning up from the bottom of
//! the configured range; system accounts get the highest free id scanning
//! down from the top of the system range. The existence check is injected
//! so the same scan works against NSS in production and against fixtures
//! in tests.

use std::fmt;

use crate::config::Defs;
use crate::error::ProvisionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Group,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::User => write!(f, "user"),
            IdKind::Group => write!(f, "group"),
        }
    }
}

/// Half-open id range `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

/// Find an unused id for a new account.
///
/// A `preferred` id is returned as-is when it lies strictly between the
/// range bounds and is free. Otherwise the range is scanned linearly,
/// ascending for regular accounts and descending for system accounts,
/// without wraparound.
pub fn allocate<F>(
    kind: IdKind,
    system: bool,
    preferred: Option<u32>,
    defs: &Defs,
    exists: F,
) -> Result<u32, ProvisionError>
where
    F: Fn(u32) -> bool,
{
    let range = defs.id_range(kind, system);
    if range.max < range.min {
        return Err(ProvisionError::InvalidRangeConfig {
            kind,
            min: range.min,
            max: range.max,
        });
    }

    if let Some(id) = preferred
        && range.min < id
        && id < range.max
        && !exists(id)
    {
        return Ok(id);
    }

    if system {
        for id in ((range.min + 1)..range.max).rev() {
            if !exists(id) {
                return Ok(id);
            }
        }
    } else {
        for id in range.min..range.max {
            if !exists(id) {
                return Ok(id);
            }
        }
    }

    Err(ProvisionError::AllocationExhausted {
        kind,
        min: range.min,
        max: range.max,
    })
}
