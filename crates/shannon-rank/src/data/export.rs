//! Export of filtered rows and their data dictionary as polars frames.

use polars::prelude::*;
use std::collections::HashSet;
use tracing::debug;

use super::filter::RowFilter;
use super::source::DataSource;
use super::variable::{Variable, VariableId};
use crate::error::{RankingError, Result, ResultExt};

/// Rendering of a missing value in exported tables.
pub const MISSING_STRING: &str = "?";

/// Export the rows inside `filter` for the selected variables.
///
/// Returns `(data, dictionary)`. The data frame has one string column per
/// variable, named after it, with values rendered the way they are shown to
/// users (category labels, `d Mon, yyyy` dates) and [`MISSING_STRING`] for
/// missing values. The dictionary has one row per variable with its
/// `alias`, `type` and `range`.
///
/// Variables selected twice are exported once.
pub fn export_table<S: DataSource + ?Sized>(
    source: &S,
    vars: &[VariableId],
    filter: &RowFilter,
) -> Result<(DataFrame, DataFrame)> {
    let mut seen = HashSet::new();
    let mut selected: Vec<&Variable> = Vec::with_capacity(vars.len());
    for &id in vars {
        let var = source
            .variable(id)
            .ok_or_else(|| RankingError::VariableNotFound(format!("#{}", id.index())))?;
        if seen.insert(id) {
            selected.push(var);
        }
    }

    let rows: Vec<usize> = (0..source.row_count())
        .filter(|&row| source.is_row_included(row, filter))
        .collect();
    debug!("Exporting {} rows of {} variables", rows.len(), selected.len());

    let data_columns: Vec<Column> = selected
        .iter()
        .map(|var| {
            let values: Vec<String> = rows.iter().map(|&row| render(source, row, var)).collect();
            Series::new(var.name.as_str().into(), values).into()
        })
        .collect();
    let data = DataFrame::new(data_columns).context("Building exported data table")?;

    let alias: Vec<String> = selected.iter().map(|v| v.alias.clone()).collect();
    let kind: Vec<&str> = selected.iter().map(|v| v.kind.as_str()).collect();
    let range: Vec<String> = selected.iter().map(|v| v.format_range()).collect();
    let dictionary = DataFrame::new(vec![
        Series::new("alias".into(), alias).into(),
        Series::new("type".into(), kind).into(),
        Series::new("range".into(), range).into(),
    ])
    .context("Building data dictionary")?;

    Ok((data, dictionary))
}

fn render<S: DataSource + ?Sized>(source: &S, row: usize, var: &Variable) -> String {
    if var.string() {
        return source
            .text(row, var.id)
            .map_or_else(|| MISSING_STRING.to_string(), str::to_string);
    }
    source
        .value(row, var.id)
        .map_or_else(|| MISSING_STRING.to_string(), |raw| var.format_value(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataTable, Range};
    use pretty_assertions::assert_eq;

    fn table() -> DataTable {
        DataTable::builder()
            .numeric("age", vec![Some(20.0), Some(35.5), None, Some(61.0)])
            .categorical("region", vec![Some("north"), Some("south"), Some("north"), None])
            .text("notes", vec![Some("first"), None, Some("third"), Some("fourth")])
            .alias("age", "Age in years")
            .build()
            .unwrap()
    }

    fn strings(df: &DataFrame, name: &str) -> Vec<Option<String>> {
        df.column(name)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    #[test]
    fn test_export_renders_values_and_missing() {
        let t = table();
        let vars = [VariableId(0), VariableId(1), VariableId(2)];
        let (data, _) = export_table(&t, &vars, &RowFilter::new()).unwrap();

        assert_eq!(data.shape(), (4, 3));
        assert_eq!(
            strings(&data, "age"),
            vec![
                Some("20".to_string()),
                Some("35.5".to_string()),
                Some("?".to_string()),
                Some("61".to_string()),
            ]
        );
        assert_eq!(strings(&data, "region")[3], Some(MISSING_STRING.to_string()));
        assert_eq!(strings(&data, "notes")[1], Some(MISSING_STRING.to_string()));
    }

    #[test]
    fn test_export_keeps_only_filtered_rows() {
        let t = table();
        let filter = RowFilter::new().with(VariableId(0), Range::interval(30.0, 70.0));
        let (data, _) = export_table(&t, &[VariableId(2), VariableId(0)], &filter).unwrap();

        assert_eq!(data.height(), 2);
        let names: Vec<String> = data
            .get_column_names()
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["notes".to_string(), "age".to_string()]);
        assert_eq!(
            strings(&data, "notes"),
            vec![Some(MISSING_STRING.to_string()), Some("fourth".to_string())]
        );
    }

    #[test]
    fn test_dictionary_describes_each_variable_once() {
        let t = table();
        let vars = [VariableId(0), VariableId(1), VariableId(0)];
        let (data, dictionary) = export_table(&t, &vars, &RowFilter::new()).unwrap();

        assert_eq!(data.width(), 2);
        assert_eq!(dictionary.shape(), (2, 3));
        assert_eq!(
            strings(&dictionary, "alias"),
            vec![Some("Age in years".to_string()), Some("region".to_string())]
        );
        assert_eq!(
            strings(&dictionary, "type"),
            vec![Some("number".to_string()), Some("category".to_string())]
        );
        assert_eq!(strings(&dictionary, "range")[0], Some("20,61".to_string()));
    }

    #[test]
    fn test_unknown_variable_is_an_error() {
        let t = table();
        let result = export_table(&t, &[VariableId(7)], &RowFilter::new());
        assert!(matches!(result, Err(RankingError::VariableNotFound(_))));
    }
}
