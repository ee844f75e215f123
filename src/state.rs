//! Process-wide mutable state shared by the ingestion and scheduler paths.
//!
//! Both tables are lock-guarded and only expose atomic get/set/update
//! operations. Locks are never held across I/O or `.await`.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ValidationError;
use crate::models::{Reading, ThresholdUpdate, Thresholds};

// ---

/// Current alert thresholds.
#[derive(Debug, Clone, Default)]
pub struct ThresholdTable {
    inner: Arc<RwLock<Thresholds>>,
}

impl ThresholdTable {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            inner: Arc::new(RwLock::new(thresholds)),
        }
    }

    /// Consistent copy of every threshold.
    pub fn snapshot(&self) -> Thresholds {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and apply a partial update as one step.
    ///
    /// Either every field in `update` is applied or none is.
    pub fn update(&self, update: &ThresholdUpdate) -> Result<Thresholds, ValidationError> {
        // ---
        update.validate()?;
        let mut thresholds = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        update.apply_to(&mut thresholds);
        Ok(*thresholds)
    }
}

/// Most recent reading seen for each area.
#[derive(Debug, Clone, Default)]
pub struct LatestReadings {
    inner: Arc<RwLock<BTreeMap<i64, Reading>>>,
}

impl LatestReadings {
    /// Record `reading` unless a newer one is already held for its area.
    ///
    /// Returns whether the entry changed.
    pub fn record(&self, reading: &Reading) -> bool {
        // ---
        let mut latest = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match latest.get(&reading.area_id) {
            Some(current) if current.timestamp > reading.timestamp => false,
            _ => {
                latest.insert(reading.area_id, reading.clone());
                true
            }
        }
    }

    pub fn get(&self, area_id: i64) -> Option<Reading> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&area_id)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<i64, Reading> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn areas(&self) -> Vec<i64> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}
