use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Caller-side names accepted in place of the canonical field identifiers.
pub const CONTEXT_ALIASES: [(&str, &str); 5] = [
    ("sector", "secteur"),
    ("project_type", "typeProjet"),
    ("complexity", "complexite"),
    ("contexte", "contexte_proj"),
    ("lots", "phases"),
];

/// Maps a caller-side key to its canonical identifier. Unmapped keys pass
/// through unchanged.
pub fn canonical_key(key: &str) -> &str {
    CONTEXT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(key)
}

/// Maps a requested field to the task the model was trained on.
pub fn map_request_field(field: &str) -> &str {
    match field {
        "lots" => "phases",
        "contexte" => "contexte_proj",
        other => other,
    }
}

/// Widest row accepted from caller JSON; `colN` keys beyond it are ignored.
pub const MAX_COLUMNS: usize = 64;

/// One row of a tabular field. Cells are positional and serialize as
/// `{"col0": .., "col1": ..}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRow {
    cells: Vec<String>,
}

impl TableRow {
    pub fn new(cells: Vec<String>) -> Self {
        Self { cells }
    }

    pub fn from_cells<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }

    /// Cell at `index`, or an empty string when the row is shorter.
    pub fn get(&self, index: usize) -> &str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Pipe-joins the first `column_count` cells, padding missing ones with
    /// empty strings. Embedded pipes and newlines are not escaped.
    pub fn to_pipe_line(&self, column_count: usize) -> String {
        (0..column_count)
            .map(|i| self.get(i))
            .collect::<Vec<_>>()
            .join("|")
    }
}

fn column_index(key: &str) -> Option<usize> {
    key.strip_prefix("col")?
        .parse()
        .ok()
        .filter(|i| *i < MAX_COLUMNS)
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Serialize for TableRow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (i, cell) in self.cells.iter().enumerate() {
            map.serialize_entry(&format!("col{}", i), cell)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableRow {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;

        let indexed: Vec<(usize, String)> = raw
            .iter()
            .filter_map(|(key, value)| column_index(key).map(|i| (i, cell_text(value))))
            .collect();

        let width = indexed
            .iter()
            .filter_map(|(i, _)| i.checked_add(1))
            .max()
            .unwrap_or(0);
        let mut cells = vec![String::new(); width];
        for (i, text) in indexed {
            cells[i] = text;
        }

        Ok(Self { cells })
    }
}

impl JsonSchema for TableRow {
    fn schema_name() -> String {
        "TableRow".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <BTreeMap<String, String>>::json_schema(gen)
    }
}

/// A value already known for the target document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Rows(Vec<TableRow>),
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl FieldValue {
    /// Empty text, empty row list, zero and `false` count as blank.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Rows(rows) => rows.is_empty(),
            FieldValue::Text(text) => text.is_empty(),
            FieldValue::Number(n) => n.as_f64() == Some(0.0),
            FieldValue::Flag(flag) => !flag,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Flag(true) => f.write_str("True"),
            FieldValue::Flag(false) => f.write_str("False"),
            FieldValue::Rows(rows) => {
                let json = serde_json::to_string(rows).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<bool> for FieldValue {
    fn from(flag: bool) -> Self {
        FieldValue::Flag(flag)
    }
}

impl From<Vec<TableRow>> for FieldValue {
    fn from(rows: Vec<TableRow>) -> Self {
        FieldValue::Rows(rows)
    }
}

/// Everything already known for a document, keyed by canonical field id.
/// JSON `null` entries are dropped on deserialization, like absent keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct GenerationContext {
    values: BTreeMap<String, FieldValue>,
}

impl<'de> Deserialize<'de> for GenerationContext {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<FieldValue>>::deserialize(deserializer)?;
        Ok(Self {
            values: raw
                .into_iter()
                .filter_map(|(key, value)| value.map(|value| (key, value)))
                .collect(),
        })
    }
}

impl GenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from caller-side keys, renaming aliases through
    /// [`CONTEXT_ALIASES`]. A canonical key supplied directly wins over its
    /// alias.
    pub fn from_caller(values: BTreeMap<String, FieldValue>) -> Self {
        let mut mapped = BTreeMap::new();

        for (key, value) in &values {
            let canonical = canonical_key(key);
            if canonical != key.as_str() && values.contains_key(canonical) {
                continue;
            }
            mapped.insert(canonical.to_string(), value.clone());
        }

        Self { values: mapped }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Re-applies the alias table to this context's keys.
    pub fn canonicalized(&self) -> Self {
        Self::from_caller(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_table_is_total() {
        assert_eq!(canonical_key("sector"), "secteur");
        assert_eq!(canonical_key("lots"), "phases");
        assert_eq!(canonical_key("besoin"), "besoin");
        assert_eq!(canonical_key("anything_else"), "anything_else");
    }

    #[test]
    fn test_request_field_mapping() {
        assert_eq!(map_request_field("lots"), "phases");
        assert_eq!(map_request_field("contexte"), "contexte_proj");
        assert_eq!(map_request_field("risques"), "risques");
    }

    #[test]
    fn test_canonical_key_wins_over_alias() {
        let mut raw = BTreeMap::new();
        raw.insert("sector".to_string(), FieldValue::from("Retail"));
        raw.insert("secteur".to_string(), FieldValue::from("Banque"));
        raw.insert("complexity".to_string(), FieldValue::from("Haute"));

        let context = GenerationContext::from_caller(raw);
        assert_eq!(context.get("secteur"), Some(&FieldValue::from("Banque")));
        assert_eq!(context.get("complexite"), Some(&FieldValue::from("Haute")));
        assert!(!context.contains("sector"));
        assert!(!context.contains("complexity"));
    }

    #[test]
    fn test_row_deserializes_from_positional_keys() {
        let row: TableRow =
            serde_json::from_str(r#"{"col2": 1250.5, "col0": "Dev", "note": "x"}"#).unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), "Dev");
        assert_eq!(row.get(1), "");
        assert_eq!(row.get(2), "1250.5");
        assert_eq!(row.get(7), "");

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["col0"], "Dev");
        assert_eq!(json["col2"], "1250.5");
    }

    #[test]
    fn test_pipe_line_pads_missing_columns() {
        let row = TableRow::from_cells(["A", "B"]);
        assert_eq!(row.to_pipe_line(4), "A|B||");
        assert_eq!(row.to_pipe_line(1), "A");
    }

    #[test]
    fn test_field_value_untagged_json() {
        let context: GenerationContext = serde_json::from_str(
            r#"{"annee": 2025, "client": "ACME", "phases": [{"col0": "Cadrage"}]}"#,
        )
        .unwrap();

        assert_eq!(context.get("annee").unwrap().to_string(), "2025");
        assert_eq!(context.get("client").unwrap().to_string(), "ACME");
        match context.get("phases").unwrap() {
            FieldValue::Rows(rows) => assert_eq!(rows[0].get(0), "Cadrage"),
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_values() {
        assert!(FieldValue::from("").is_blank());
        assert!(FieldValue::Rows(vec![]).is_blank());
        assert!(FieldValue::from(0).is_blank());
        assert!(FieldValue::from(false).is_blank());
        assert!(!FieldValue::from("x").is_blank());
    }

    #[test]
    fn test_out_of_range_column_keys_are_ignored() {
        let context: GenerationContext = serde_json::from_str(
            r#"{"phases": [{"col18446744073709551615": "x", "col4000000000": "y", "col1": "B"}]}"#,
        )
        .unwrap();

        match context.get("phases").unwrap() {
            FieldValue::Rows(rows) => assert_eq!(rows[0].cells(), ["", "B"]),
            other => panic!("expected rows, got {:?}", other),
        }

        let row: TableRow = serde_json::from_str(r#"{"col64": "x", "col63": "y"}"#).unwrap();
        assert_eq!(row.len(), MAX_COLUMNS);
        assert_eq!(row.get(63), "y");
    }

    #[test]
    fn test_null_values_are_absent() {
        let context: GenerationContext =
            serde_json::from_str(r#"{"client": "ACME", "perimetre": null}"#).unwrap();

        assert_eq!(context.len(), 1);
        assert!(context.contains("client"));
        assert!(!context.contains("perimetre"));
    }

    #[test]
    fn test_numbers_and_flags_render_exactly() {
        let context: GenerationContext = serde_json::from_str(
            r#"{"budget": 9007199254740993, "ratio": 0.5, "critique": true, "pra": false}"#,
        )
        .unwrap();

        assert_eq!(context.get("budget").unwrap().to_string(), "9007199254740993");
        assert_eq!(context.get("ratio").unwrap().to_string(), "0.5");
        assert_eq!(context.get("critique").unwrap().to_string(), "True");
        assert_eq!(context.get("pra").unwrap().to_string(), "False");
    }
}
