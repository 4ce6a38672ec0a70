//! The in-memory table value and the bridge trait external collaborators
//! convert through.
//!
//! Per the Design Notes' "polymorphism over table values": the recorder
//! never dictates the caller's table engine. A caller hands it anything
//! implementing [`TableSource`] — a native [`Table`], an adapter wrapping a
//! foreign dataframe, or a columnar reader — and the recorder only ever
//! calls the four capability methods on that trait.

use std::fmt::Write as _;

/// A single cell value. String cells are normalized to a canonical text
/// form before hashing so that equal content hashes equally regardless of
/// in-memory representation (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Canonical text form used as row-hash input. Distinct variants never
    /// collide because each is prefixed with a one-byte type tag.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        match self {
            Cell::Null => "n:".to_string(),
            Cell::Bool(b) => format!("b:{b}"),
            Cell::Int(i) => format!("i:{i}"),
            Cell::Float(f) => {
                let mut s = String::from("f:");
                // Shortest round-trip form, matching the canonical JSON encoder.
                let _ = write!(s, "{f}");
                s
            }
            Cell::Text(t) => format!("s:{t}"),
        }
    }
}

/// One named, typed column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub dtype: String,
    pub values: Vec<Cell>,
}

/// A finite ordered sequence of columns and a finite set of rows (§3).
///
/// Column order is significant for schema fingerprinting; row order is
/// significant only when a diff or fingerprint is computed order-sensitively.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    /// A new table containing only the first `n` rows of every column
    /// (head-sampling, used by diff `sample_rows` and snapshot `sample_rows`).
    #[must_use]
    pub fn head(&self, n: usize) -> Table {
        Table::new(
            self.columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    dtype: c.dtype.clone(),
                    values: c.values.iter().take(n).cloned().collect(),
                })
                .collect(),
        )
    }

    /// A new table containing only the first `n` columns, in order.
    #[must_use]
    pub fn head_cols(&self, n: usize) -> Table {
        Table::new(self.columns.iter().take(n).cloned().collect())
    }

    /// A new table containing only the named columns, preserving `self`'s
    /// column order (not the order of `names`).
    #[must_use]
    pub fn select(&self, names: &[String]) -> Table {
        Table::new(
            self.columns
                .iter()
                .filter(|c| names.iter().any(|n| n == &c.name))
                .cloned()
                .collect(),
        )
    }

    /// Rough deep in-memory footprint in bytes: per-cell tag byte plus the
    /// variant's payload (8 bytes for `Int`/`Float`, the UTF-8 length for
    /// `Text`, none for `Null`/`Bool`). Used only as the snapshot engine's
    /// size estimate (§4.5) — never a precise accounting.
    #[must_use]
    pub fn estimate_bytes(&self) -> u64 {
        self.columns
            .iter()
            .flat_map(|c| c.values.iter())
            .map(|cell| {
                1 + match cell {
                    Cell::Null | Cell::Bool(_) => 0,
                    Cell::Int(_) | Cell::Float(_) => 8,
                    Cell::Text(t) => t.len() as u64,
                }
            })
            .sum()
    }
}

/// The capability set every table-like value must expose (Design Notes §9).
///
/// Implemented directly by [`Table`]; external collaborators implement it
/// over a `to_pandas`-style adapter call, a lazy-frame collect, or a
/// columnar reader — the recorder only ever calls through this trait.
pub trait TableSource {
    /// Materialize (or return, if already native) the in-memory table value.
    fn to_table(&self) -> Table;

    fn row_count(&self) -> usize {
        self.to_table().n_rows()
    }

    fn column_list(&self) -> Vec<String> {
        self.to_table().column_names()
    }

    fn dtype_of(&self, column: &str) -> Option<String> {
        self.to_table().column(column).map(|c| c.dtype.clone())
    }
}

impl TableSource for Table {
    fn to_table(&self) -> Table {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(vec![
            Column {
                name: "id".into(),
                dtype: "int".into(),
                values: vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)],
            },
            Column {
                name: "x".into(),
                dtype: "float".into(),
                values: vec![Cell::Float(1.0), Cell::Float(2.0), Cell::Float(3.0)],
            },
        ])
    }

    #[test]
    fn n_rows_and_cols() {
        let t = sample();
        assert_eq!(t.n_rows(), 3);
        assert_eq!(t.n_cols(), 2);
    }

    #[test]
    fn empty_table_has_zero_rows() {
        let t = Table::default();
        assert_eq!(t.n_rows(), 0);
        assert_eq!(t.n_cols(), 0);
    }

    #[test]
    fn head_truncates_rows_not_columns() {
        let t = sample().head(2);
        assert_eq!(t.n_rows(), 2);
        assert_eq!(t.n_cols(), 2);
    }

    #[test]
    fn select_preserves_native_column_order() {
        let t = sample().select(&["x".to_string(), "id".to_string()]);
        assert_eq!(t.column_names(), vec!["id".to_string(), "x".to_string()]);
    }

    #[test]
    fn canonical_text_distinguishes_types() {
        assert_ne!(Cell::Int(1).canonical_text(), Cell::Text("1".into()).canonical_text());
        assert_ne!(Cell::Null.canonical_text(), Cell::Bool(false).canonical_text());
    }

    #[test]
    fn table_source_blanket_impl_matches_self() {
        let t = sample();
        assert_eq!(t.row_count(), 3);
        assert_eq!(t.column_list(), vec!["id".to_string(), "x".to_string()]);
        assert_eq!(t.dtype_of("x").as_deref(), Some("float"));
        assert_eq!(t.dtype_of("missing"), None);
    }

    #[test]
    fn estimate_bytes_grows_with_text_length() {
        let short = Table::new(vec![Column {
            name: "x".into(),
            dtype: "text".into(),
            values: vec![Cell::Text("a".into())],
        }]);
        let long = Table::new(vec![Column {
            name: "x".into(),
            dtype: "text".into(),
            values: vec![Cell::Text("a".repeat(100))],
        }]);
        assert!(long.estimate_bytes() > short.estimate_bytes());
    }

    #[test]
    fn estimate_bytes_zero_for_empty_table() {
        assert_eq!(Table::default().estimate_bytes(), 0);
    }
}
