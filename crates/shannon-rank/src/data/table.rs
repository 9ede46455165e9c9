//! In-memory column store implementing [`DataSource`].
//!
//! Tables are built either column by column through [`DataTableBuilder`] or
//! from a polars [`DataFrame`]. Values are materialized once at build time so
//! that per-row access from score workers is a plain vector lookup.

use polars::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::source::DataSource;
use super::variable::{ValueRange, Variable, VariableId, VariableKind, VariableRole};
use crate::error::{RankingError, Result, ResultExt};

/// String columns with at most this many distinct values become categorical.
pub const DEFAULT_MAX_CATEGORIES: usize = 100;

const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone)]
enum ColumnValues {
    Numbers(Vec<Option<f64>>),
    Codes(Vec<Option<u32>>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    fn len(&self) -> usize {
        match self {
            Self::Numbers(v) => v.len(),
            Self::Codes(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }
}

/// A typed, column-oriented table.
#[derive(Debug, Clone)]
pub struct DataTable {
    variables: Vec<Variable>,
    columns: Vec<ColumnValues>,
    rows: usize,
    label: Option<VariableId>,
}

static_assertions::assert_impl_all!(DataTable: Send, Sync);

impl DataTable {
    pub fn builder() -> DataTableBuilder {
        DataTableBuilder::default()
    }

    /// Build a table from a polars DataFrame with default settings.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        DataTableBuilder::from_dataframe(df, DEFAULT_MAX_CATEGORIES)?.build()
    }
}

impl DataSource for DataTable {
    fn row_count(&self) -> usize {
        self.rows
    }

    fn variables(&self) -> &[Variable] {
        &self.variables
    }

    fn value(&self, row: usize, var: VariableId) -> Option<f64> {
        match self.columns.get(var.index())? {
            ColumnValues::Numbers(values) => values.get(row).copied().flatten(),
            ColumnValues::Codes(values) => values.get(row).copied().flatten().map(f64::from),
            ColumnValues::Text(_) => None,
        }
    }

    fn text(&self, row: usize, var: VariableId) -> Option<&str> {
        match self.columns.get(var.index())? {
            ColumnValues::Text(values) => values.get(row)?.as_deref(),
            _ => None,
        }
    }

    fn label_variable(&self) -> Option<VariableId> {
        self.label
    }
}

#[derive(Debug, Clone)]
struct ColumnSpec {
    name: String,
    alias: Option<String>,
    kind: VariableKind,
    values: ColumnValues,
    categories: Vec<String>,
    role: VariableRole,
    weighted_by: Option<String>,
    include: Option<bool>,
}

/// Builder for [`DataTable`].
#[derive(Debug, Default)]
pub struct DataTableBuilder {
    columns: Vec<ColumnSpec>,
    label: Option<String>,
}

impl DataTableBuilder {
    fn push(
        mut self,
        name: impl Into<String>,
        kind: VariableKind,
        values: ColumnValues,
        categories: Vec<String>,
    ) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            alias: None,
            kind,
            values,
            categories,
            role: VariableRole::Regular,
            weighted_by: None,
            include: None,
        });
        self
    }

    /// Add a numerical column; non-finite values count as missing.
    pub fn numeric(self, name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        self.push(name, VariableKind::Numerical, ColumnValues::Numbers(values), Vec::new())
    }

    /// Add a date column given as days since the Unix epoch.
    pub fn date(self, name: impl Into<String>, days: Vec<Option<i64>>) -> Self {
        let values = days.into_iter().map(|d| d.map(|d| d as f64)).collect();
        self.push(name, VariableKind::Date, ColumnValues::Numbers(values), Vec::new())
    }

    /// Add a categorical column; categories are the sorted distinct labels.
    pub fn categorical<S: AsRef<str>>(
        self,
        name: impl Into<String>,
        values: Vec<Option<S>>,
    ) -> Self {
        let (codes, categories) =
            encode_categories(values.iter().map(|v| v.as_ref().map(AsRef::<str>::as_ref)));
        self.push(name, VariableKind::Categorical, ColumnValues::Codes(codes), categories)
    }

    /// Add a free-text column (never scored, usable as a label).
    pub fn text<S: Into<String>>(self, name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        let values = values.into_iter().map(|v| v.map(Into::into)).collect();
        self.push(name, VariableKind::String, ColumnValues::Text(values), Vec::new())
    }

    fn spec_mut(&mut self, name: &str) -> Option<&mut ColumnSpec> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn alias(mut self, name: &str, alias: impl Into<String>) -> Self {
        if let Some(spec) = self.spec_mut(name) {
            spec.alias = Some(alias.into());
        }
        self
    }

    pub fn role(mut self, name: &str, role: VariableRole) -> Self {
        if let Some(spec) = self.spec_mut(name) {
            spec.role = role;
        }
        self
    }

    /// Weight the samples of `name` by the values of `weight`.
    pub fn weighted_by(mut self, name: &str, weight: impl Into<String>) -> Self {
        if let Some(spec) = self.spec_mut(name) {
            spec.weighted_by = Some(weight.into());
        }
        self
    }

    pub fn include(mut self, name: &str, include: bool) -> Self {
        if let Some(spec) = self.spec_mut(name) {
            spec.include = Some(include);
        }
        self
    }

    /// Designate a text column as the sample label.
    pub fn label(mut self, name: impl Into<String>) -> Self {
        self.label = Some(name.into());
        self
    }

    /// Start a builder from the columns of a polars DataFrame.
    ///
    /// Numeric columns become numerical, dates and datetimes become dates,
    /// booleans become two-category variables and string columns become
    /// categorical when they have at most `max_categories` distinct values.
    pub fn from_dataframe(df: &DataFrame, max_categories: usize) -> Result<Self> {
        let mut builder = Self::default();
        for column in df.get_columns() {
            let name = column.name().to_string();
            let series = column.as_materialized_series();
            builder = match get_dtype_category(series.dtype()) {
                DtypeCategory::Numeric => {
                    let values =
                        float_values(series).context(format!("Reading column '{}'", name))?;
                    builder.numeric(name, values)
                }
                DtypeCategory::Datetime => {
                    let values =
                        day_values(series).context(format!("Reading column '{}'", name))?;
                    let values = values
                        .into_iter()
                        .map(|d| d.map(|d| d.floor() as i64))
                        .collect();
                    builder.date(name, values)
                }
                DtypeCategory::Boolean => {
                    let values: Vec<Option<&str>> = series
                        .bool()
                        .context(format!("Reading column '{}'", name))?
                        .into_iter()
                        .map(|v| v.map(|b| if b { "true" } else { "false" }))
                        .collect();
                    builder.categorical(name, values)
                }
                DtypeCategory::String | DtypeCategory::Other => {
                    let as_text = series
                        .cast(&DataType::String)
                        .context(format!("Casting column '{}' to text", name))?;
                    let values: Vec<Option<String>> = as_text
                        .str()
                        .context(format!("Reading column '{}'", name))?
                        .into_iter()
                        .map(|v| v.map(str::to_string))
                        .collect();
                    let distinct: BTreeSet<&str> =
                        values.iter().flatten().map(String::as_str).collect();
                    if !distinct.is_empty() && distinct.len() <= max_categories {
                        builder.categorical(name, values)
                    } else {
                        debug!(
                            "Column '{}' has {} distinct values, keeping as text",
                            name,
                            distinct.len()
                        );
                        builder.text(name, values)
                    }
                }
            };
        }
        Ok(builder)
    }

    /// Resolve names, compute value ranges and build the table.
    pub fn build(self) -> Result<DataTable> {
        if self.columns.is_empty() {
            return Err(RankingError::EmptyDataset);
        }
        let rows = self.columns[0].values.len();
        if let Some(bad) = self.columns.iter().find(|c| c.values.len() != rows) {
            return Err(RankingError::InvalidConfig(format!(
                "column '{}' has {} rows, expected {}",
                bad.name,
                bad.values.len(),
                rows
            )));
        }

        let index_of = |name: &str| -> Result<VariableId> {
            self.columns
                .iter()
                .position(|c| c.name == name)
                .map(VariableId)
                .ok_or_else(|| RankingError::VariableNotFound(name.to_string()))
        };

        let mut variables = Vec::with_capacity(self.columns.len());
        for (i, spec) in self.columns.iter().enumerate() {
            let range = match (&spec.kind, &spec.values) {
                (VariableKind::Categorical, _) => ValueRange::Categories(spec.categories.clone()),
                (_, ColumnValues::Numbers(values)) => interval_of(values),
                _ => ValueRange::Text,
            };
            let mut var = Variable::new(VariableId(i), spec.name.clone(), spec.kind, range);
            if let Some(alias) = &spec.alias {
                var.alias = alias.clone();
            }
            var.role = spec.role;
            if let Some(include) = spec.include {
                var.include = include && !var.string();
            }
            if let Some(weight) = &spec.weighted_by {
                match index_of(weight) {
                    Ok(id) => var.weighted_by = Some(id),
                    Err(_) => warn!(
                        "Weight variable {} of {} is not found in the data",
                        weight, spec.name
                    ),
                }
            }
            variables.push(var);
        }

        let label = match &self.label {
            Some(name) => Some(index_of(name)?),
            None => None,
        };

        Ok(DataTable {
            variables,
            columns: self.columns.into_iter().map(|c| c.values).collect(),
            rows,
            label,
        })
    }
}

fn encode_categories<'a>(
    values: impl Iterator<Item = Option<&'a str>> + Clone,
) -> (Vec<Option<u32>>, Vec<String>) {
    let labels: Vec<String> = values
        .clone()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect();
    let codes = values
        .map(|v| {
            v.and_then(|s| labels.binary_search_by(|l| l.as_str().cmp(s)).ok())
                .map(|i| i as u32)
        })
        .collect();
    (codes, labels)
}

fn interval_of(values: &[Option<f64>]) -> ValueRange {
    let (min, max) = values
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min <= max {
        ValueRange::Interval { min, max }
    } else {
        ValueRange::Interval { min: 0.0, max: 0.0 }
    }
}

// =============================================================================
// Polars helpers
// =============================================================================

/// Category of a polars data type for variable classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtypeCategory {
    Numeric,
    Datetime,
    Boolean,
    String,
    Other,
}

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Check if a DataType is a calendar type.
#[inline]
pub fn is_datetime_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Datetime(_, _) | DataType::Date)
}

/// Get the category of a DataType.
pub fn get_dtype_category(dtype: &DataType) -> DtypeCategory {
    if is_numeric_dtype(dtype) {
        DtypeCategory::Numeric
    } else if is_datetime_dtype(dtype) {
        DtypeCategory::Datetime
    } else if matches!(dtype, DataType::Boolean) {
        DtypeCategory::Boolean
    } else if matches!(dtype, DataType::String | DataType::Categorical(_, _)) {
        DtypeCategory::String
    } else {
        DtypeCategory::Other
    }
}

fn float_values(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let floats = series.cast(&DataType::Float64)?;
    Ok(floats.f64()?.into_iter().collect())
}

/// Days since the epoch for Date and Datetime series.
fn day_values(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let per_day = match series.dtype() {
        DataType::Datetime(TimeUnit::Nanoseconds, _) => MS_PER_DAY * 1e6,
        DataType::Datetime(TimeUnit::Microseconds, _) => MS_PER_DAY * 1e3,
        DataType::Datetime(TimeUnit::Milliseconds, _) => MS_PER_DAY,
        _ => 1.0,
    };
    let physical = series.to_physical_repr().cast(&DataType::Float64)?;
    Ok(physical
        .f64()?
        .into_iter()
        .map(|v| v.map(|x| x / per_day))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_table() -> DataTable {
        DataTable::builder()
            .numeric("age", vec![Some(20.0), Some(30.0), None, Some(f64::NAN)])
            .categorical("sex", vec![Some("m"), Some("f"), Some("f"), None])
            .numeric("w", vec![Some(1.0), Some(2.0), Some(1.0), Some(1.0)])
            .text("name", vec![Some("ann"), Some("bob"), None, Some("dan")])
            .weighted_by("age", "w")
            .role("w", VariableRole::Weight)
            .alias("age", "Age in years")
            .label("name")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_ranges_and_values() {
        let table = sample_table();
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.variable_count(), 4);

        let age = table.variable_by_name("age").unwrap();
        assert_eq!(age.range, ValueRange::Interval { min: 20.0, max: 30.0 });
        assert_eq!(age.alias, "Age in years");
        assert_eq!(age.weighted_by, Some(VariableId(2)));
        assert_eq!(table.value(3, age.id), None, "NaN counts as missing");

        let sex = table.variable_by_name("sex").unwrap();
        assert_eq!(sex.range, ValueRange::Categories(vec!["f".to_string(), "m".to_string()]));
        assert_eq!(table.value(0, sex.id), Some(1.0));
        assert_eq!(table.value(3, sex.id), None);
    }

    #[test]
    fn test_text_and_label() {
        let table = sample_table();
        let name = table.variable_by_name("name").unwrap();
        assert!(!name.include);
        assert_eq!(table.text(1, name.id), Some("bob"));
        assert_eq!(table.label_variable(), Some(name.id));
        assert_eq!(table.value(1, name.id), None);
    }

    #[test]
    fn test_weight_lookup() {
        let table = sample_table();
        let age = table.variable_by_name("age").unwrap().clone();
        let sex = table.variable_by_name("sex").unwrap().clone();
        assert_eq!(table.weight(1, &age), Some(2.0));
        assert_eq!(table.weight(1, &sex), Some(1.0));
    }

    #[test]
    fn test_missing_fraction_and_row_counts() {
        use crate::data::filter::{Range, RowFilter};

        let table = sample_table();
        let all = RowFilter::new();
        assert_eq!(table.row_count_in(&all), 4);
        assert_eq!(table.missing_fraction(VariableId(0), &all), 0.5);

        let females = RowFilter::new().with(VariableId(1), Range::categories([0]));
        assert_eq!(table.row_count_in(&females), 2);
        assert_eq!(table.missing_fraction(VariableId(0), &females), 0.5);
    }

    #[test]
    fn test_find_variables_skips_excluded() {
        let table = sample_table();
        assert_eq!(table.find_variables("a"), vec![VariableId(0)]);
        assert!(table.find_variables("name").is_empty());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let result = DataTable::builder()
            .numeric("a", vec![Some(1.0)])
            .numeric("b", vec![Some(1.0), Some(2.0)])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_label_rejected() {
        let result = DataTable::builder()
            .numeric("a", vec![Some(1.0)])
            .label("nope")
            .build();
        assert!(matches!(result, Err(RankingError::VariableNotFound(_))));
    }

    #[test]
    fn test_from_dataframe() {
        let df = df!(
            "x" => [1.0, 2.0, 3.0],
            "n" => [1i64, 5, 9],
            "flag" => [true, false, true],
            "city" => ["paris", "rome", "paris"]
        )
        .unwrap();

        let table = DataTable::from_dataframe(&df).unwrap();
        let kinds: Vec<VariableKind> = table.variables().iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                VariableKind::Numerical,
                VariableKind::Numerical,
                VariableKind::Categorical,
                VariableKind::Categorical
            ]
        );
        assert_eq!(table.value(1, VariableId(1)), Some(5.0));
        assert_eq!(table.variables()[3].category_count(), 2);
    }

    #[test]
    fn test_dtype_category() {
        assert_eq!(get_dtype_category(&DataType::Int64), DtypeCategory::Numeric);
        assert_eq!(get_dtype_category(&DataType::Date), DtypeCategory::Datetime);
        assert_eq!(get_dtype_category(&DataType::Boolean), DtypeCategory::Boolean);
        assert_eq!(get_dtype_category(&DataType::String), DtypeCategory::String);
    }
}
