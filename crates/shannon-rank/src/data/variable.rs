//! Variable descriptors: type classification, value range and normalization.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Position of a variable in the dataset's natural order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(pub usize);

impl VariableId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Type classification of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// Integer or floating point measurements.
    Numerical,
    /// A finite set of labelled categories, stored as codes.
    Categorical,
    /// Calendar dates, stored as days since the Unix epoch.
    Date,
    /// Free text. Never part of the calculations.
    String,
}

impl VariableKind {
    /// Short type name used in data dictionaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numerical => "number",
            Self::Categorical => "category",
            Self::Date => "date",
            Self::String => "string",
        }
    }
}

/// Weighting role of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariableRole {
    #[default]
    Regular,
    /// Sample weight column.
    Weight,
    /// Subsample weight column.
    Subsample,
}

/// Observed (or declared) value range of a variable, in raw units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRange {
    /// Closed interval for numerical and date variables.
    Interval { min: f64, max: f64 },
    /// Category labels; the raw value of a sample is its index here.
    Categories(Vec<String>),
    /// Text variables carry no range.
    Text,
}

/// A typed column descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub alias: String,
    pub kind: VariableKind,
    pub range: ValueRange,
    pub role: VariableRole,
    /// Weight variable applied to samples of this variable.
    pub weighted_by: Option<VariableId>,
    /// Whether the variable takes part in the calculations at all.
    pub include: bool,
}

impl Variable {
    pub fn new(
        id: VariableId,
        name: impl Into<String>,
        kind: VariableKind,
        range: ValueRange,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            alias: name.clone(),
            name,
            kind,
            range,
            role: VariableRole::Regular,
            weighted_by: None,
            include: kind != VariableKind::String,
        }
    }

    pub fn categorical(&self) -> bool {
        self.kind == VariableKind::Categorical
    }

    pub fn numerical(&self) -> bool {
        matches!(self.kind, VariableKind::Numerical | VariableKind::Date)
    }

    pub fn string(&self) -> bool {
        self.kind == VariableKind::String
    }

    /// Weight and subsample variables are both weights.
    pub fn is_weight(&self) -> bool {
        self.role != VariableRole::Regular
    }

    pub fn is_subsample(&self) -> bool {
        self.role == VariableRole::Subsample
    }

    /// Number of categories, or 0 for non-categorical variables.
    pub fn category_count(&self) -> usize {
        match &self.range {
            ValueRange::Categories(labels) => labels.len(),
            _ => 0,
        }
    }

    /// Map a raw value into [0, 1].
    ///
    /// Category `i` of `k` maps to the centre of the `i`-th of `k` equal
    /// bins, so binning with exactly `k` bins recovers the category.
    pub fn normalize(&self, raw: f64) -> f64 {
        match &self.range {
            ValueRange::Interval { min, max } => {
                if max > min {
                    ((raw - min) / (max - min)).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            }
            ValueRange::Categories(labels) => {
                let k = labels.len().max(1) as f64;
                ((raw + 0.5) / k).clamp(0.0, 1.0)
            }
            ValueRange::Text => 0.0,
        }
    }

    /// Inverse of [`normalize`](Self::normalize).
    pub fn denormalize(&self, value: f64) -> f64 {
        match &self.range {
            ValueRange::Interval { min, max } => min + value.clamp(0.0, 1.0) * (max - min),
            ValueRange::Categories(labels) => {
                let k = labels.len().max(1);
                ((value.clamp(0.0, 1.0) * k as f64) as usize).min(k - 1) as f64
            }
            ValueRange::Text => 0.0,
        }
    }

    /// Human-readable rendering of a raw value.
    pub fn format_value(&self, raw: f64) -> String {
        match (&self.kind, &self.range) {
            (VariableKind::Date, _) => format_days(raw),
            (_, ValueRange::Categories(labels)) => labels
                .get(raw as usize)
                .cloned()
                .unwrap_or_else(|| "missing".to_string()),
            _ => format!("{}", raw),
        }
    }

    /// Machine-readable rendering of the range: `min,max` for intervals and
    /// `;`-separated labels for categories. Text variables have no range.
    pub fn format_range(&self) -> String {
        match &self.range {
            ValueRange::Interval { min, max } => {
                format!("{},{}", self.format_value(*min), self.format_value(*max))
            }
            ValueRange::Categories(labels) => labels.join(";"),
            ValueRange::Text => String::new(),
        }
    }

    /// Case-insensitive substring match on name or alias.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        !query.is_empty()
            && (self.name.to_lowercase().contains(&query)
                || self.alias.to_lowercase().contains(&query))
    }
}

/// Format days since the epoch as `d Mon, yyyy`.
fn format_days(days: f64) -> String {
    DateTime::from_timestamp(days.round() as i64 * 86_400, 0)
        .map(|dt| dt.date_naive().format("%-d %b, %Y").to_string())
        .unwrap_or_else(|| "missing".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(min: f64, max: f64) -> Variable {
        Variable::new(
            VariableId(0),
            "x",
            VariableKind::Numerical,
            ValueRange::Interval { min, max },
        )
    }

    #[test]
    fn test_numeric_normalization_round_trip() {
        let var = numeric(10.0, 20.0);
        assert_eq!(var.normalize(15.0), 0.5);
        assert_eq!(var.normalize(30.0), 1.0);
        assert_eq!(var.denormalize(0.25), 12.5);
    }

    #[test]
    fn test_constant_range_normalizes_to_zero() {
        let var = numeric(3.0, 3.0);
        assert_eq!(var.normalize(3.0), 0.0);
    }

    #[test]
    fn test_categorical_codes_land_in_their_bin() {
        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let var = Variable::new(
            VariableId(1),
            "c",
            VariableKind::Categorical,
            ValueRange::Categories(labels),
        );
        for code in 0..3 {
            let norm = var.normalize(code as f64);
            assert_eq!((norm * 3.0) as usize, code);
            assert_eq!(var.denormalize(norm), code as f64);
        }
        assert_eq!(var.format_value(1.0), "b");
    }

    #[test]
    fn test_string_variables_are_excluded() {
        let var = Variable::new(VariableId(2), "notes", VariableKind::String, ValueRange::Text);
        assert!(!var.include);
        assert!(numeric(0.0, 1.0).include);
    }

    #[test]
    fn test_date_formatting() {
        let var = Variable::new(
            VariableId(3),
            "when",
            VariableKind::Date,
            ValueRange::Interval { min: 0.0, max: 1.0 },
        );
        assert_eq!(var.format_value(0.0), "1 Jan, 1970");
        assert_eq!(var.format_value(31.0), "1 Feb, 1970");
    }

    #[test]
    fn test_range_formatting() {
        assert_eq!(numeric(1.5, 20.0).format_range(), "1.5,20");
        let labels = vec!["north".to_string(), "south".to_string()];
        let var = Variable::new(
            VariableId(4),
            "region",
            VariableKind::Categorical,
            ValueRange::Categories(labels),
        );
        assert_eq!(var.format_range(), "north;south");
        assert_eq!(var.kind.as_str(), "category");
        let var = Variable::new(
            VariableId(5),
            "when",
            VariableKind::Date,
            ValueRange::Interval { min: 0.0, max: 31.0 },
        );
        assert_eq!(var.format_range(), "1 Jan, 1970,1 Feb, 1970");
    }

    #[test]
    fn test_matches_name_or_alias() {
        let mut var = numeric(0.0, 1.0);
        var.alias = "Household income".to_string();
        assert!(var.matches("INCOME"));
        assert!(var.matches("x"));
        assert!(!var.matches("  "));
    }
}
