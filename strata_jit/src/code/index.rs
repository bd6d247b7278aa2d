//! Global index of compiled code units.

use super::effective_ip;
use super::unit::CompiledUnit;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Rejected code unit registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeIndexError {
    /// The unit covers no code.
    #[error("code unit at {0:#x} is empty")]
    Empty(usize),
    /// The unit overlaps one that is already registered.
    #[error("code unit {start:#x}..{end:#x} overlaps {existing_start:#x}..{existing_end:#x}")]
    Overlap {
        /// New unit start.
        start: usize,
        /// New unit end.
        end: usize,
        /// Registered unit start.
        existing_start: usize,
        /// Registered unit end.
        existing_end: usize,
    },
}

/// Address-ordered map from code ranges to compiled units.
///
/// Uses a `BTreeMap` keyed by start address; a lookup is one predecessor
/// query plus a bounds check.
#[derive(Debug, Default)]
pub struct CodeUnitIndex {
    units: RwLock<BTreeMap<usize, Arc<CompiledUnit>>>,
}

impl CodeUnitIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            units: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a unit.
    pub fn insert(&self, unit: Arc<CompiledUnit>) -> Result<(), CodeIndexError> {
        let (start, end) = (unit.code_start(), unit.code_end());
        if start == end {
            return Err(CodeIndexError::Empty(start));
        }

        let mut units = self.units.write();
        let below = units.range(..end).next_back();
        if let Some((_, existing)) = below {
            if existing.code_end() > start {
                return Err(CodeIndexError::Overlap {
                    start,
                    end,
                    existing_start: existing.code_start(),
                    existing_end: existing.code_end(),
                });
            }
        }
        units.insert(start, unit);
        Ok(())
    }

    /// Unregister the unit starting at `code_start`.
    pub fn remove(&self, code_start: usize) -> Option<Arc<CompiledUnit>> {
        self.units.write().remove(&code_start)
    }

    /// Find the unit containing `ip`.
    pub fn resolve(&self, ip: usize, is_ip_past: bool) -> Option<Arc<CompiledUnit>> {
        let ip = effective_ip(ip, is_ip_past);
        let units = self.units.read();
        let (_, unit) = units.range(..=ip).next_back()?;
        (ip < unit.code_end()).then(|| Arc::clone(unit))
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Drop every unit.
    pub fn clear(&self) {
        self.units.write().clear();
    }
}
