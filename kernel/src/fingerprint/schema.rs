//! Schema fingerprint and schema diff (§4.3).

use std::collections::BTreeMap;

use crate::table::Table;

/// `{ cols: ordered column names; dtypes: column → dtype string }`.
/// Equality is structural (§3).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SchemaFingerprint {
    pub cols: Vec<String>,
    pub dtypes: BTreeMap<String, String>,
}

impl SchemaFingerprint {
    #[must_use]
    pub fn of(table: &Table) -> Self {
        let cols = table.column_names();
        let dtypes = table
            .columns()
            .iter()
            .map(|c| (c.name.clone(), c.dtype.clone()))
            .collect();
        Self { cols, dtypes }
    }
}

/// A single dtype change reported by [`schema_diff`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DtypeChange {
    pub column: String,
    pub from: String,
    pub to: String,
}

/// `added_cols` (in B order), `removed_cols` (in A order), `dtype_changed`
/// (columns in A∩B whose dtype strings differ).
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct SchemaDiff {
    pub added_cols: Vec<String>,
    pub removed_cols: Vec<String>,
    pub dtype_changed: Vec<DtypeChange>,
}

impl SchemaDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_cols.is_empty() && self.removed_cols.is_empty() && self.dtype_changed.is_empty()
    }
}

#[must_use]
pub fn schema_diff(a: &Table, b: &Table) -> SchemaDiff {
    let a_cols = a.column_names();
    let b_cols = b.column_names();

    let added_cols = b_cols
        .iter()
        .filter(|c| !a_cols.contains(c))
        .cloned()
        .collect();
    let removed_cols = a_cols
        .iter()
        .filter(|c| !b_cols.contains(c))
        .cloned()
        .collect();

    let mut dtype_changed = Vec::new();
    for col in &a_cols {
        if !b_cols.contains(col) {
            continue;
        }
        let from = a.column(col).map(|c| c.dtype.clone()).unwrap_or_default();
        let to = b.column(col).map(|c| c.dtype.clone()).unwrap_or_default();
        if from != to {
            dtype_changed.push(DtypeChange {
                column: col.clone(),
                from,
                to,
            });
        }
    }

    SchemaDiff {
        added_cols,
        removed_cols,
        dtype_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Cell, Column};

    fn table(cols: &[(&str, &str)]) -> Table {
        Table::new(
            cols.iter()
                .map(|(name, dtype)| Column {
                    name: (*name).to_string(),
                    dtype: (*dtype).to_string(),
                    values: vec![Cell::Int(1)],
                })
                .collect(),
        )
    }

    #[test]
    fn identical_schemas_diff_to_empty() {
        let a = table(&[("id", "int"), ("x", "float")]);
        let diff = schema_diff(&a, &a.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn rename_reports_add_and_remove() {
        let a = table(&[("id", "int"), ("score_bucket", "text")]);
        let b = table(&[("id", "int"), ("score_band", "text")]);
        let diff = schema_diff(&a, &b);
        assert_eq!(diff.added_cols, vec!["score_band".to_string()]);
        assert_eq!(diff.removed_cols, vec!["score_bucket".to_string()]);
        assert!(diff.dtype_changed.is_empty());
    }

    #[test]
    fn dtype_change_reported_for_shared_column() {
        let a = table(&[("id", "int"), ("x", "int")]);
        let b = table(&[("id", "int"), ("x", "float")]);
        let diff = schema_diff(&a, &b);
        assert_eq!(
            diff.dtype_changed,
            vec![DtypeChange {
                column: "x".to_string(),
                from: "int".to_string(),
                to: "float".to_string(),
            }]
        );
    }

    #[test]
    fn schema_fingerprint_equality_is_structural() {
        let a = SchemaFingerprint::of(&table(&[("id", "int"), ("x", "float")]));
        let b = SchemaFingerprint::of(&table(&[("id", "int"), ("x", "float")]));
        assert_eq!(a, b);
    }
}
