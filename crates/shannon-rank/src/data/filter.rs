//! Row filtering ranges.
//!
//! A [`RowFilter`] is a set of per-variable inclusion predicates; a row is
//! inside the filter iff it satisfies all of them. Computations capture their
//! own clone, so edits to the live filter never race with a running ranking.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::variable::VariableId;

/// Inclusion predicate over the raw values of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Range {
    /// Closed interval `[min, max]` for numerical and date variables.
    Interval { min: f64, max: f64 },
    /// Accepted category codes.
    Categories(BTreeSet<u32>),
}

impl Range {
    pub fn interval(min: f64, max: f64) -> Self {
        Range::Interval { min, max }
    }

    pub fn categories(codes: impl IntoIterator<Item = u32>) -> Self {
        Range::Categories(codes.into_iter().collect())
    }

    pub fn contains(&self, raw: f64) -> bool {
        match self {
            Range::Interval { min, max } => *min <= raw && raw <= *max,
            Range::Categories(codes) => raw >= 0.0 && codes.contains(&(raw as u32)),
        }
    }
}

/// Immutable-per-computation set of inclusion predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    ranges: BTreeMap<VariableId, Range>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, var: VariableId, range: Range) -> Self {
        self.set(var, range);
        self
    }

    pub fn set(&mut self, var: VariableId, range: Range) {
        self.ranges.insert(var, range);
    }

    pub fn remove(&mut self, var: VariableId) -> Option<Range> {
        self.ranges.remove(&var)
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn get(&self, var: VariableId) -> Option<&Range> {
        self.ranges.get(&var)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &Range)> {
        self.ranges.iter().map(|(var, range)| (*var, range))
    }

    /// Evaluate the filter for one row given a raw-value lookup.
    ///
    /// A missing value for a filtered variable puts the row outside.
    pub fn includes(&self, mut value_of: impl FnMut(VariableId) -> Option<f64>) -> bool {
        self.ranges
            .iter()
            .all(|(var, range)| value_of(*var).is_some_and(|raw| range.contains(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_is_closed() {
        let range = Range::interval(1.0, 2.0);
        assert!(range.contains(1.0));
        assert!(range.contains(2.0));
        assert!(!range.contains(2.5));
    }

    #[test]
    fn test_category_membership() {
        let range = Range::categories([0, 2]);
        assert!(range.contains(2.0));
        assert!(!range.contains(1.0));
        assert!(!range.contains(-1.0));
    }

    #[test]
    fn test_empty_filter_includes_everything() {
        assert!(RowFilter::new().includes(|_| None));
    }

    #[test]
    fn test_missing_value_is_outside() {
        let filter = RowFilter::new().with(VariableId(0), Range::interval(0.0, 10.0));
        assert!(filter.includes(|_| Some(5.0)));
        assert!(!filter.includes(|_| None));
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let filter = RowFilter::new()
            .with(VariableId(0), Range::interval(0.0, 10.0))
            .with(VariableId(1), Range::categories([1]));
        assert!(filter.includes(|v| Some(if v.0 == 0 { 3.0 } else { 1.0 })));
        assert!(!filter.includes(|v| Some(if v.0 == 0 { 3.0 } else { 0.0 })));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut live = RowFilter::new().with(VariableId(0), Range::interval(0.0, 1.0));
        let snapshot = live.clone();
        live.set(VariableId(0), Range::interval(5.0, 6.0));
        assert_eq!(snapshot.get(VariableId(0)), Some(&Range::interval(0.0, 1.0)));
    }
}
