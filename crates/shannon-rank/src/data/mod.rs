//! Dataset model: variables, row filters and the table interface.

pub mod export;
pub mod filter;
pub mod source;
pub mod table;
pub mod variable;

pub use export::{MISSING_STRING, export_table};
pub use filter::{Range, RowFilter};
pub use source::DataSource;
pub use table::{DEFAULT_MAX_CATEGORIES, DataTable, DataTableBuilder};
pub use variable::{ValueRange, Variable, VariableId, VariableKind, VariableRole};
