//! CSV and JSON export of the in-memory document.

use std::path::Path;

use receipt_core::WorkspaceDocument;
use serde_json::Value;
use tracing::info;

use crate::StoreError;
use crate::workspace::{WorkspaceStore, write_atomically};

impl WorkspaceStore {
    /// Write one row per image, columns in `output_format` order. Returns
    /// the number of data rows written.
    pub fn export_csv(&self, path: &Path) -> Result<usize, StoreError> {
        let document = self.document().ok_or(StoreError::NoWorkspace)?;
        let csv = render_csv(document);
        write_atomically(path, csv.as_bytes())?;
        info!(path = %path.display(), rows = document.images.len(), "exported csv");
        Ok(document.images.len())
    }

    /// Write the whole document as pretty-printed JSON.
    pub fn export_json(&self, path: &Path) -> Result<(), StoreError> {
        let document = self.document().ok_or(StoreError::NoWorkspace)?;
        let json = serde_json::to_string_pretty(document)?;
        write_atomically(path, json.as_bytes())?;
        info!(path = %path.display(), "exported json");
        Ok(())
    }
}

/// Render the document as CSV. Fields outside `output_format` are omitted;
/// absent values are empty cells.
pub fn render_csv(document: &WorkspaceDocument) -> String {
    let columns = document.output_format();
    let mut out = String::new();
    push_row(&mut out, columns.iter().map(String::as_str));

    for record in document.images.values() {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| cell(&record.extracted_data.get_by_name(column)))
            .collect();
        push_row(&mut out, cells.iter().map(String::as_str));
    }
    out
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::tests::{folder_with, opened};
    use receipt_core::{ExtractedData, FileInfo, ImageRecord};

    fn record(store: &str, total: i64) -> ImageRecord {
        let mut record = ImageRecord::new(FileInfo {
            path: format!("/r/{store}.jpg").into(),
            size: 1,
            created_at: None,
            hash: None,
        });
        record.extracted_data = ExtractedData {
            store_name: Some(store.to_string()),
            total_amount: Some(total),
            ..Default::default()
        };
        record
    }

    #[test]
    fn csv_follows_output_format() {
        let mut doc = WorkspaceDocument::new("r");
        doc.workspace.settings.output_format = vec![
            "Store Name".to_string(),
            "Total Amount (currency symbol removed)".to_string(),
        ];
        doc.images.insert("a.jpg".into(), record("A", 100));
        doc.images.insert("b.jpg".into(), record("B", 200));

        let csv = render_csv(&doc);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Store Name,Total Amount (currency symbol removed)",
                "A,100",
                "B,200",
            ]
        );
    }

    #[test]
    fn csv_quotes_and_blanks() {
        let mut doc = WorkspaceDocument::new("r");
        doc.workspace.settings.output_format =
            vec!["Store Name".to_string(), "Representative Item Name".to_string()];
        doc.images
            .insert("a.jpg".into(), record("Smith, \"Jr\" Mart", 1));

        let csv = render_csv(&doc);
        assert_eq!(csv.lines().nth(1), Some("\"Smith, \"\"Jr\"\" Mart\","));
        assert!(csv.ends_with("\r\n"));
    }

    #[test]
    fn default_format_has_header_and_one_row_per_image() {
        let dir = folder_with(&["a.jpg", "b.jpg", "c.png"]);
        let store = opened(&dir);
        let out = dir.path().join("out.csv");

        assert_eq!(store.export_csv(&out).unwrap(), 3);
        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Transaction Date (yyyy/mm/dd only),Store Name,"));
        assert_eq!(lines[1], ",,,,,,,");
    }

    #[test]
    fn json_export_round_trips_the_document() {
        let dir = folder_with(&["a.jpg"]);
        let store = opened(&dir);
        let out = dir.path().join("export.json");

        store.export_json(&out).unwrap();
        let exported: WorkspaceDocument =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(&exported, store.document().unwrap());
    }

    #[test]
    fn export_without_workspace_fails() {
        let store = WorkspaceStore::new(Default::default());
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            store.export_csv(&dir.path().join("x.csv")),
            Err(StoreError::NoWorkspace)
        ));
    }

    #[test]
    fn export_to_missing_directory_reports_failure() {
        let dir = folder_with(&["a.jpg"]);
        let store = opened(&dir);
        let result = store.export_json(&dir.path().join("missing").join("x.json"));
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }
}
