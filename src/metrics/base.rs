//! Per-dimension diff bases.
//!
//! A diffed metric reports `raw - base` where the base is the previous raw
//! value seen for the same dimension and value field.

use crate::core::types::{DimensionKey, StateKey, Value};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Expected direction of raw values in diff mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueDirection {
    /// Counters that only grow; a drop means a reset
    #[default]
    Increasing,
    /// Values that only shrink; a rise means a reset
    Decreasing,
    /// No reset detection
    Any,
}

/// Diff options fixed at metric load time
#[derive(Debug, Clone, Copy)]
pub struct DiffOptions {
    /// Expected direction
    pub direction: ValueDirection,
    /// Report the raw value after a reset instead of dropping it
    pub use_absolute_value_on_reset: bool,
    /// Start new dimensions from zero when a global base exists
    pub use_zero_default_base: bool,
}

/// Result of feeding one raw value through the tracker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiffOutcome {
    /// A diff to aggregate
    Diff(Value),
    /// No base existed; the raw value became the base
    Seeded,
    /// The value moved against the configured direction; the base was overwritten
    Reset,
}

impl DiffOutcome {
    /// The diff, if one was produced
    pub fn value(&self) -> Option<Value> {
        match self {
            DiffOutcome::Diff(v) => Some(*v),
            DiffOutcome::Seeded | DiffOutcome::Reset => None,
        }
    }
}

/// Base and state bookkeeping for one dimension
#[derive(Debug, Clone)]
pub struct DimensionBaseInfo {
    /// Last raw value per configured value field
    pub bases: Vec<Option<Value>>,
    /// Last known state of the dimension
    pub current_state: StateKey,
    /// Whether `current_state` came from the state feed
    pub has_current_state: bool,
    /// Dirty flag, cleared at every bucket close
    pub seen_new_data: bool,
}

impl DimensionBaseInfo {
    fn new(num_fields: usize, state: StateKey) -> Self {
        Self {
            bases: vec![None; num_fields],
            current_state: state,
            has_current_state: false,
            seen_new_data: false,
        }
    }

    fn clear_bases(&mut self) {
        self.bases.iter_mut().for_each(|b| *b = None);
    }
}

/// Owns every dimension's bases plus the metric-wide global base flag
#[derive(Debug, Default)]
pub struct BaseTracker {
    infos: AHashMap<DimensionKey, DimensionBaseInfo>,
    num_fields: usize,
    has_global_base: bool,
}

impl BaseTracker {
    /// Create a tracker for `num_fields` value fields
    pub fn new(num_fields: usize) -> Self {
        Self {
            infos: AHashMap::new(),
            num_fields,
            has_global_base: false,
        }
    }

    /// Look up a dimension, creating it in `initial_state` if unseen
    pub fn get_or_insert(&mut self, key: &DimensionKey, initial_state: StateKey) -> &mut DimensionBaseInfo {
        let num_fields = self.num_fields;
        self.infos
            .entry(key.clone())
            .or_insert_with(|| DimensionBaseInfo::new(num_fields, initial_state))
    }

    /// Look up a dimension
    pub fn get(&self, key: &DimensionKey) -> Option<&DimensionBaseInfo> {
        self.infos.get(key)
    }

    /// Look up a dimension mutably
    pub fn get_mut(&mut self, key: &DimensionKey) -> Option<&mut DimensionBaseInfo> {
        self.infos.get_mut(key)
    }

    /// Iterate over all tracked dimensions
    pub fn iter(&self) -> impl Iterator<Item = (&DimensionKey, &DimensionBaseInfo)> {
        self.infos.iter()
    }

    /// Iterate mutably over all tracked dimensions
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&DimensionKey, &mut DimensionBaseInfo)> {
        self.infos.iter_mut()
    }

    /// Number of tracked dimensions
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if no dimension is tracked
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Whether at least one full round produced trustworthy bases
    pub fn has_global_base(&self) -> bool {
        self.has_global_base
    }

    /// Set the global base flag
    pub fn set_global_base(&mut self, value: bool) {
        self.has_global_base = value;
    }

    /// Feed `raw` for `field_index` of `key` and compute its diff.
    ///
    /// The dimension is created with an empty state if it does not exist.
    pub fn update(
        &mut self,
        key: &DimensionKey,
        field_index: usize,
        raw: Value,
        opts: DiffOptions,
    ) -> DiffOutcome {
        let zero_base_allowed = self.has_global_base && opts.use_zero_default_base;
        let info = self.get_or_insert(key, StateKey::default());
        info.seen_new_data = true;
        let Some(slot) = info.bases.get_mut(field_index) else {
            return DiffOutcome::Seeded;
        };

        let base = match *slot {
            Some(base) => base,
            None if zero_base_allowed => raw.zero_like(),
            None => {
                *slot = Some(raw);
                return DiffOutcome::Seeded;
            },
        };

        let diff = match opts.direction {
            ValueDirection::Increasing => {
                if raw >= base {
                    raw - base
                } else if opts.use_absolute_value_on_reset {
                    raw
                } else {
                    *slot = Some(raw);
                    return DiffOutcome::Reset;
                }
            },
            ValueDirection::Decreasing => {
                if base >= raw {
                    base - raw
                } else if opts.use_absolute_value_on_reset {
                    raw
                } else {
                    *slot = Some(raw);
                    return DiffOutcome::Reset;
                }
            },
            ValueDirection::Any => raw - base,
        };

        *slot = Some(raw);
        DiffOutcome::Diff(diff)
    }

    /// Record `raw` as the base without producing a diff
    pub fn set_base(&mut self, key: &DimensionKey, field_index: usize, raw: Value) {
        let info = self.get_or_insert(key, StateKey::default());
        info.seen_new_data = true;
        if let Some(slot) = info.bases.get_mut(field_index) {
            *slot = Some(raw);
        }
    }

    /// Clear bases of one dimension, or of every dimension with `None`.
    /// Clearing everything also drops the global base.
    pub fn reset_base(&mut self, key: Option<&DimensionKey>) {
        match key {
            Some(key) => {
                if let Some(info) = self.infos.get_mut(key) {
                    info.clear_bases();
                }
            },
            None => {
                self.infos.values_mut().for_each(DimensionBaseInfo::clear_bases);
                self.has_global_base = false;
            },
        }
    }

    /// Remove dimensions that saw no data since the last call and clear the
    /// dirty flag on the rest. Returns the removed keys.
    pub fn trim_unseen(&mut self) -> Vec<DimensionKey> {
        let stale: Vec<DimensionKey> = self
            .infos
            .iter()
            .filter(|(_, info)| !info.seen_new_data)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.infos.remove(key);
        }
        self.infos.values_mut().for_each(|info| info.seen_new_data = false);
        stale
    }

    /// Forget every dimension and the global base
    pub fn clear(&mut self) {
        self.infos.clear();
        self.has_global_base = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FieldValue;

    fn opts(direction: ValueDirection) -> DiffOptions {
        DiffOptions {
            direction,
            use_absolute_value_on_reset: false,
            use_zero_default_base: false,
        }
    }

    fn key(uid: i64) -> DimensionKey {
        DimensionKey::new([FieldValue::int(1, uid)])
    }

    #[test]
    fn test_first_value_only_seeds() {
        let mut tracker = BaseTracker::new(1);
        let k = key(1);
        assert_eq!(tracker.update(&k, 0, Value::Int(3), opts(ValueDirection::Increasing)), DiffOutcome::Seeded);
        assert_eq!(
            tracker.update(&k, 0, Value::Int(11), opts(ValueDirection::Increasing)),
            DiffOutcome::Diff(Value::Int(8))
        );
    }

    #[test]
    fn test_increasing_reset_overwrites_base() {
        let mut tracker = BaseTracker::new(1);
        let k = key(1);
        tracker.update(&k, 0, Value::Int(10), opts(ValueDirection::Increasing));
        assert_eq!(tracker.update(&k, 0, Value::Int(4), opts(ValueDirection::Increasing)), DiffOutcome::Reset);
        assert_eq!(tracker.get(&k).unwrap().bases[0], Some(Value::Int(4)));
        assert_eq!(
            tracker.update(&k, 0, Value::Int(6), opts(ValueDirection::Increasing)),
            DiffOutcome::Diff(Value::Int(2))
        );
    }

    #[test]
    fn test_absolute_value_on_reset() {
        let mut tracker = BaseTracker::new(1);
        let k = key(1);
        let mut o = opts(ValueDirection::Increasing);
        o.use_absolute_value_on_reset = true;
        tracker.update(&k, 0, Value::Int(10), o);
        assert_eq!(tracker.update(&k, 0, Value::Int(4), o), DiffOutcome::Diff(Value::Int(4)));
    }

    #[test]
    fn test_decreasing_and_any() {
        let mut tracker = BaseTracker::new(2);
        let k = key(1);
        tracker.update(&k, 0, Value::Int(10), opts(ValueDirection::Decreasing));
        assert_eq!(
            tracker.update(&k, 0, Value::Int(7), opts(ValueDirection::Decreasing)),
            DiffOutcome::Diff(Value::Int(3))
        );
        assert_eq!(tracker.update(&k, 0, Value::Int(9), opts(ValueDirection::Decreasing)), DiffOutcome::Reset);

        tracker.update(&k, 1, Value::Int(10), opts(ValueDirection::Any));
        assert_eq!(
            tracker.update(&k, 1, Value::Int(7), opts(ValueDirection::Any)),
            DiffOutcome::Diff(Value::Int(-3))
        );
    }

    #[test]
    fn test_zero_default_base_requires_global_base() {
        let mut tracker = BaseTracker::new(1);
        let mut o = opts(ValueDirection::Increasing);
        o.use_zero_default_base = true;

        assert_eq!(tracker.update(&key(1), 0, Value::Int(5), o), DiffOutcome::Seeded);
        tracker.set_global_base(true);
        assert_eq!(tracker.update(&key(2), 0, Value::Int(5), o), DiffOutcome::Diff(Value::Int(5)));
    }

    #[test]
    fn test_reset_all_drops_global_base() {
        let mut tracker = BaseTracker::new(1);
        tracker.update(&key(1), 0, Value::Int(5), opts(ValueDirection::Increasing));
        tracker.set_global_base(true);
        tracker.reset_base(None);
        assert!(!tracker.has_global_base());
        assert_eq!(tracker.get(&key(1)).unwrap().bases[0], None);
    }

    #[test]
    fn test_trim_unseen() {
        let mut tracker = BaseTracker::new(1);
        tracker.update(&key(1), 0, Value::Int(5), opts(ValueDirection::Increasing));
        tracker.update(&key(2), 0, Value::Int(5), opts(ValueDirection::Increasing));
        assert!(tracker.trim_unseen().is_empty());

        tracker.update(&key(1), 0, Value::Int(6), opts(ValueDirection::Increasing));
        assert_eq!(tracker.trim_unseen(), vec![key(2)]);
        assert_eq!(tracker.len(), 1);
    }
}
