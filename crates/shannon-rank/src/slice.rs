//! Value extraction: filtered, missing-value-free, normalized sample sets.
//!
//! A slice holds one sample per row that passes the row filter and has
//! non-missing values for every requested variable. Values are normalized to
//! [0, 1] and carry a weight (1 unless a weight variable applies). Slices are
//! pure functions of the table, the filter and the variables.

use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;

use crate::data::{DataSource, RowFilter, Variable, VariableId};
use crate::error::{RankingError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Value1D {
    pub x: f64,
    pub w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Value2D {
    pub x: f64,
    pub y: f64,
    pub w: f64,
}

/// Samples of a single variable.
#[derive(Debug, Clone)]
pub struct Slice1D {
    pub var: Variable,
    pub values: Vec<Value1D>,
    /// Category count for categorical variables, observed distinct values otherwise.
    pub count_x: usize,
    /// Fraction of rows inside the filter that were dropped as missing.
    pub missing: f32,
    pub labels: Option<Vec<String>>,
}

/// Paired samples of two variables.
#[derive(Debug, Clone)]
pub struct Slice2D {
    pub var_x: Variable,
    pub var_y: Variable,
    pub values: Vec<Value2D>,
    pub count_x: usize,
    pub count_y: usize,
    pub missing: f32,
    pub labels: Option<Vec<String>>,
}

impl Slice1D {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Slice2D {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Surrogate with the y values permuted across samples.
    ///
    /// Both marginals are preserved while any association between x and y is
    /// destroyed; weights stay attached to x.
    pub fn shuffle<R: Rng + ?Sized>(&self, rng: &mut R) -> Slice2D {
        let mut ys: Vec<f64> = self.values.iter().map(|v| v.y).collect();
        ys.shuffle(rng);
        let values = self
            .values
            .iter()
            .zip(ys)
            .map(|(v, y)| Value2D { x: v.x, y, w: v.w })
            .collect();
        Slice2D {
            var_x: self.var_x.clone(),
            var_y: self.var_y.clone(),
            values,
            count_x: self.count_x,
            count_y: self.count_y,
            missing: self.missing,
            labels: None,
        }
    }
}

fn lookup<S: DataSource + ?Sized>(source: &S, id: VariableId) -> Result<&Variable> {
    source
        .variable(id)
        .ok_or_else(|| RankingError::VariableNotFound(format!("#{}", id.index())))
}

fn label_of<S: DataSource + ?Sized>(source: &S, row: usize, label: VariableId) -> String {
    source.text(row, label).unwrap_or_default().to_string()
}

/// Distinct-value count used by the bin optimizer.
fn distinct_count(var: &Variable, values: impl Iterator<Item = f64>) -> usize {
    if var.categorical() {
        var.category_count()
    } else {
        values.map(f64::to_bits).collect::<HashSet<_>>().len()
    }
}

/// Project one variable through `filter`.
pub fn extract_1d<S: DataSource + ?Sized>(
    source: &S,
    var: VariableId,
    filter: &RowFilter,
    label: Option<VariableId>,
) -> Result<Slice1D> {
    let var = lookup(source, var)?;
    let mut values = Vec::new();
    let mut labels = label.map(|_| Vec::new());
    let mut total = 0usize;

    for row in 0..source.row_count() {
        if !source.is_row_included(row, filter) {
            continue;
        }
        total += 1;
        let (Some(raw), Some(w)) = (source.value(row, var.id), source.weight(row, var)) else {
            continue;
        };
        values.push(Value1D {
            x: var.normalize(raw),
            w,
        });
        if let (Some(labels), Some(label)) = (labels.as_mut(), label) {
            labels.push(label_of(source, row, label));
        }
    }

    let count_x = distinct_count(var, values.iter().map(|v| v.x));
    Ok(Slice1D {
        var: var.clone(),
        missing: missing_fraction(total, values.len()),
        values,
        count_x,
        labels,
    })
}

/// Project two variables through `filter`.
///
/// The sample weight comes from x's weight variable, falling back to y's.
pub fn extract_2d<S: DataSource + ?Sized>(
    source: &S,
    var_x: VariableId,
    var_y: VariableId,
    filter: &RowFilter,
    label: Option<VariableId>,
) -> Result<Slice2D> {
    let var_x = lookup(source, var_x)?;
    let var_y = lookup(source, var_y)?;
    let weight_var = if var_x.weighted_by.is_some() { var_x } else { var_y };

    let mut values = Vec::new();
    let mut labels = label.map(|_| Vec::new());
    let mut total = 0usize;

    for row in 0..source.row_count() {
        if !source.is_row_included(row, filter) {
            continue;
        }
        total += 1;
        let (Some(x), Some(y), Some(w)) = (
            source.value(row, var_x.id),
            source.value(row, var_y.id),
            source.weight(row, weight_var),
        ) else {
            continue;
        };
        values.push(Value2D {
            x: var_x.normalize(x),
            y: var_y.normalize(y),
            w,
        });
        if let (Some(labels), Some(label)) = (labels.as_mut(), label) {
            labels.push(label_of(source, row, label));
        }
    }

    let count_x = distinct_count(var_x, values.iter().map(|v| v.x));
    let count_y = distinct_count(var_y, values.iter().map(|v| v.y));
    Ok(Slice2D {
        var_x: var_x.clone(),
        var_y: var_y.clone(),
        missing: missing_fraction(total, values.len()),
        values,
        count_x,
        count_y,
        labels,
    })
}

fn missing_fraction(total: usize, kept: usize) -> f32 {
    if total == 0 {
        1.0
    } else {
        (total - kept) as f32 / total as f32
    }
}
