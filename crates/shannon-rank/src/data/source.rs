//! The dataset interface consumed by the ranking core.

use super::filter::RowFilter;
use super::variable::{Variable, VariableId};

/// A rectangular table of typed, possibly-missing values.
///
/// Implementations must be `Send + Sync`: score tasks read the table from
/// worker threads while the coordinator keeps its own handle.
pub trait DataSource: Send + Sync {
    /// Total number of rows.
    fn row_count(&self) -> usize;

    /// All variables, in natural order (`variables()[i].id == VariableId(i)`).
    fn variables(&self) -> &[Variable];

    /// Raw value of `var` at `row`; `None` is the missing sentinel.
    ///
    /// Numerical values are returned as-is, dates as days since the epoch and
    /// categories as their code.
    fn value(&self, row: usize, var: VariableId) -> Option<f64>;

    /// Text of a string variable, used for sample labels.
    fn text(&self, _row: usize, _var: VariableId) -> Option<&str> {
        None
    }

    /// Variable designated to label samples, if any.
    fn label_variable(&self) -> Option<VariableId> {
        None
    }

    fn variable_count(&self) -> usize {
        self.variables().len()
    }

    fn variable(&self, id: VariableId) -> Option<&Variable> {
        self.variables().get(id.index())
    }

    fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.variables().iter().find(|var| var.name == name)
    }

    fn is_row_included(&self, row: usize, filter: &RowFilter) -> bool {
        filter.includes(|var| self.value(row, var))
    }

    /// Sample weight for `var` at `row`: the value of its weight variable,
    /// or 1 when it has none. `None` when the weight itself is missing.
    fn weight(&self, row: usize, var: &Variable) -> Option<f64> {
        match var.weighted_by {
            Some(weight_var) => self.value(row, weight_var),
            None => Some(1.0),
        }
    }

    /// Number of rows inside `filter`.
    fn row_count_in(&self, filter: &RowFilter) -> usize {
        (0..self.row_count())
            .filter(|&row| self.is_row_included(row, filter))
            .count()
    }

    /// Fraction of the rows inside `filter` for which `var` is missing.
    ///
    /// An empty selection counts as entirely missing.
    fn missing_fraction(&self, var: VariableId, filter: &RowFilter) -> f32 {
        let mut total = 0usize;
        let mut missing = 0usize;
        for row in 0..self.row_count() {
            if !self.is_row_included(row, filter) {
                continue;
            }
            total += 1;
            if self.value(row, var).is_none() {
                missing += 1;
            }
        }
        if total == 0 {
            1.0
        } else {
            missing as f32 / total as f32
        }
    }

    /// Included variables whose name or alias matches `query`.
    fn find_variables(&self, query: &str) -> Vec<VariableId> {
        self.variables()
            .iter()
            .filter(|var| var.include && var.matches(query))
            .map(|var| var.id)
            .collect()
    }
}
