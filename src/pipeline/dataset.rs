//! Input dataset loading.
//!
//! CSV (header row) or JSONL, chosen by file extension. Loaded once per run
//! and never mutated.

use crate::models::{DatasetConfig, LabelrunError, Record, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Immutable, index-ordered set of records.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<Record>,
    positions: HashMap<u64, usize>,
}

impl Dataset {
    /// Build a dataset, rejecting duplicate or zero indices.
    pub fn new(mut records: Vec<Record>) -> Result<Self> {
        records.sort_by_key(|r| r.index);
        let mut positions = HashMap::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            if record.index == 0 {
                return Err(LabelrunError::Dataset(
                    "record indices are 1-based; found index 0".to_string(),
                ));
            }
            if positions.insert(record.index, pos).is_some() {
                return Err(LabelrunError::Dataset(format!(
                    "duplicate record index {}",
                    record.index
                )));
            }
        }
        Ok(Self { records, positions })
    }

    /// Load records according to the dataset config.
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        let columns = Columns::from_config(config);
        let is_jsonl = config
            .path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jsonl") || e.eq_ignore_ascii_case("ndjson"));

        let records = if is_jsonl {
            load_jsonl(&config.path, &columns)?
        } else {
            load_csv(&config.path, &columns)?
        };

        let dataset = Self::new(records)?;
        info!(
            path = %config.path.display(),
            count = dataset.len(),
            labeled = dataset.records.iter().filter(|r| r.label.is_some()).count(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in index order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Look up a record by index.
    pub fn get(&self, index: u64) -> Option<&Record> {
        self.positions.get(&index).map(|&pos| &self.records[pos])
    }
}

struct Columns<'a> {
    text: &'a str,
    label: Option<&'a str>,
    index: Option<&'a str>,
}

impl<'a> Columns<'a> {
    fn from_config(config: &'a DatasetConfig) -> Self {
        let non_empty = |c: &'a Option<String>| c.as_deref().filter(|s| !s.trim().is_empty());
        Self {
            text: &config.text_column,
            label: non_empty(&config.label_column),
            index: non_empty(&config.index_column),
        }
    }
}

fn parse_index(raw: &str, row: usize) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| LabelrunError::Dataset(format!("row {row}: invalid index '{raw}'")))
}

fn non_empty_label(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn load_csv(path: &Path, columns: &Columns<'_>) -> Result<Vec<Record>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| LabelrunError::Dataset(format!("opening {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| LabelrunError::Dataset(format!("reading header: {e}")))?
        .clone();
    let find = |name: &str| {
        headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
            LabelrunError::Dataset(format!("column '{name}' not found in {}", path.display()))
        })
    };

    let text_col = find(columns.text)?;
    let label_col = columns.label.map(|c| find(c)).transpose()?;
    let index_col = columns.index.map(|c| find(c)).transpose()?;

    let mut records = Vec::new();
    for (pos, row) in reader.records().enumerate() {
        let line = pos + 1;
        let row = row.map_err(|e| LabelrunError::Dataset(format!("row {line}: {e}")))?;
        let field = |col: usize| row.get(col).unwrap_or("");

        let index = match index_col {
            Some(col) => parse_index(field(col), line)?,
            None => line as u64,
        };
        let label = label_col.and_then(|col| non_empty_label(field(col)));
        records.push(Record::new(index, field(text_col), label));
    }

    Ok(records)
}

fn load_jsonl(path: &Path, columns: &Columns<'_>) -> Result<Vec<Record>> {
    let file = File::open(path).map_err(|e| LabelrunError::io("opening dataset", e))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut ordinal = 0u64;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| LabelrunError::io("reading dataset", e))?;
        if line.trim().is_empty() {
            continue;
        }
        ordinal += 1;
        let row = line_num + 1;

        let value: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| LabelrunError::Dataset(format!("line {row}: {e}")))?;

        let text = value
            .get(columns.text)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                LabelrunError::Dataset(format!("line {row}: missing string field '{}'", columns.text))
            })?;

        let label = columns
            .label
            .and_then(|key| value.get(key))
            .and_then(|v| match v {
                serde_json::Value::String(s) => non_empty_label(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            });

        let index = match columns.index {
            Some(key) => match value.get(key) {
                Some(serde_json::Value::Number(n)) => n.as_u64().ok_or_else(|| {
                    LabelrunError::Dataset(format!("line {row}: invalid index {n}"))
                })?,
                Some(serde_json::Value::String(s)) => parse_index(s, row)?,
                _ => {
                    return Err(LabelrunError::Dataset(format!(
                        "line {row}: missing index field '{key}'"
                    )));
                }
            },
            None => ordinal,
        };

        records.push(Record::new(index, text, label));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(path: &Path) -> DatasetConfig {
        DatasetConfig {
            path: path.to_path_buf(),
            text_column: "statement".to_string(),
            label_column: Some("status".to_string()),
            index_column: None,
        }
    }

    #[test]
    fn test_csv_uses_row_position_as_index() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.csv");
        fs::write(
            &path,
            "statement,status\n\"I feel fine, thanks\",Normal\ncan't sleep again,\n",
        )
        .unwrap();

        let dataset = Dataset::load(&config(&path)).unwrap();
        assert_eq!(dataset.len(), 2);
        let first = dataset.get(1).unwrap();
        assert_eq!(first.text, "I feel fine, thanks");
        assert_eq!(first.label.as_deref(), Some("Normal"));
        assert_eq!(dataset.get(2).unwrap().label, None);
    }

    #[test]
    fn test_csv_explicit_index_column() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.csv");
        fs::write(&path, "id,statement,status\n10,b,Anxiety\n3,a,Normal\n").unwrap();

        let mut cfg = config(&path);
        cfg.index_column = Some("id".to_string());
        let dataset = Dataset::load(&cfg).unwrap();
        let indices: Vec<_> = dataset.records().iter().map(|r| r.index).collect();
        assert_eq!(indices, [3, 10]);
    }

    #[test]
    fn test_csv_missing_column_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.csv");
        fs::write(&path, "body,status\nx,Normal\n").unwrap();
        assert!(matches!(
            Dataset::load(&config(&path)),
            Err(LabelrunError::Dataset(_))
        ));
    }

    #[test]
    fn test_jsonl_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.jsonl");
        fs::write(
            &path,
            "{\"statement\": \"hello\", \"status\": \"Normal\"}\n\n{\"statement\": \"bye\", \"status\": null}\n",
        )
        .unwrap();

        let dataset = Dataset::load(&config(&path)).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.get(2).unwrap().text, "bye");
        assert_eq!(dataset.get(2).unwrap().label, None);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let records = vec![Record::new(1, "a", None), Record::new(1, "b", None)];
        assert!(Dataset::new(records).is_err());
    }

    #[test]
    fn test_empty_label_column_disables_labels() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.csv");
        fs::write(&path, "statement\nx\n").unwrap();
        let mut cfg = config(&path);
        cfg.label_column = Some(String::new());
        let dataset = Dataset::load(&cfg).unwrap();
        assert_eq!(dataset.get(1).unwrap().label, None);
    }
}
