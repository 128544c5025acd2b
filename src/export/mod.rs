use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::ExportConfig;
use crate::db::{Database, Item, MetaField, Value};

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Csv => "CSV",
        }
    }

    /// Pick a format from a file extension, defaulting to CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub csv_delimiter: char,
    pub include_pictures: bool,
}

impl From<&ExportConfig> for ExportOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            csv_delimiter: config.csv_delimiter,
            include_pictures: config.include_pictures,
        }
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

/// Item data for export
#[derive(Debug, Serialize)]
pub struct ExportedItem {
    pub id: Option<i64>,
    pub values: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pictures: Vec<PathBuf>,
}

impl ExportedItem {
    fn new(item: &Item, include_pictures: bool) -> Self {
        Self {
            id: item.id,
            values: item.values.clone(),
            pictures: if include_pictures {
                item.pictures.iter().map(|p| p.original_path.clone()).collect()
            } else {
                Vec::new()
            },
        }
    }
}

/// Export every item of an album to a file
pub fn export_album(
    db: &Database,
    album: &str,
    output_path: &Path,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<usize> {
    let fields = db.get_fields(album)?;
    let items = db
        .get_all_items(album)
        .with_context(|| format!("loading items of '{}'", album))?;
    export_items(&fields, &items, output_path, format, options)
}

/// Export a list of items with the given fields as columns
pub fn export_items(
    fields: &[MetaField],
    items: &[Item],
    output_path: &Path,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<usize> {
    match format {
        ExportFormat::Json => export_json(items, output_path, options)?,
        ExportFormat::Csv => export_csv(fields, items, output_path, options)?,
    }
    tracing::info!(
        count = items.len(),
        format = format.name(),
        path = %output_path.display(),
        "Exported items"
    );
    Ok(items.len())
}

fn export_json(items: &[Item], output_path: &Path, options: &ExportOptions) -> Result<()> {
    let exported: Vec<ExportedItem> = items
        .iter()
        .map(|item| ExportedItem::new(item, options.include_pictures))
        .collect();
    let json = serde_json::to_string_pretty(&exported)?;
    let mut file = File::create(output_path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn export_csv(fields: &[MetaField], items: &[Item], output_path: &Path, options: &ExportOptions) -> Result<()> {
    if !options.csv_delimiter.is_ascii() {
        bail!("CSV delimiter '{}' is not an ASCII character", options.csv_delimiter);
    }
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(options.csv_delimiter as u8)
        .from_path(output_path)?;

    // id and content version never appear in exports
    let columns: Vec<&MetaField> = fields.iter().filter(|f| !f.is_system()).collect();

    let mut header: Vec<&str> = columns.iter().map(|f| f.name.as_str()).collect();
    if options.include_pictures {
        header.push("pictures");
    }
    wtr.write_record(&header)?;

    for item in items {
        let mut record: Vec<String> = columns
            .iter()
            .map(|f| item.value(&f.name).map(Value::to_string).unwrap_or_default())
            .collect();
        if options.include_pictures {
            let paths: Vec<String> = item
                .pictures
                .iter()
                .map(|p| p.original_path.to_string_lossy().to_string())
                .collect();
            record.push(paths.join("|"));
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use crate::db::FieldType;
    use tempfile::TempDir;

    #[test]
    fn test_csv_export_uses_field_order_and_skips_system_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dvds.csv");
        let db = fixtures::populated();
        let fields = db.get_fields_with_system_columns("DVDs").unwrap();
        let items = db.get_all_items("DVDs").unwrap();

        let count = export_items(&fields, &items, &path, ExportFormat::Csv, &ExportOptions::default()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(count, 5);
        assert_eq!(lines.next(), Some("Title,Actors,Director,Release Year,Rating,Seen"));
        assert_eq!(
            lines.next(),
            Some("Short Circuit 2,\"Cynthia Gibb, Fisher Stevens\",Kenneth Johnson,1988,3,YES")
        );
    }

    #[test]
    fn test_csv_export_with_delimiter_and_pictures() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dvds.csv");
        let db = fixtures::populated();
        let options = ExportOptions {
            csv_delimiter: ';',
            include_pictures: true,
        };

        export_album(&db, "DVDs", &path, ExportFormat::Csv, &options).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let first = content.lines().nth(1).unwrap();
        assert!(content.starts_with("Title;Actors;"));
        assert!(content.lines().next().unwrap().ends_with(";pictures"));
        assert!(first.ends_with(";/dvd/1988_0.jpg"));
    }

    #[test]
    fn test_csv_rejects_non_ascii_delimiter() {
        let dir = TempDir::new().unwrap();
        let options = ExportOptions {
            csv_delimiter: '§',
            include_pictures: false,
        };
        let fields = vec![MetaField::new("Title", FieldType::Text)];

        let result = export_items(&fields, &[], &dir.path().join("x.csv"), ExportFormat::Csv, &options);

        assert!(result.is_err());
    }

    #[test]
    fn test_json_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("books.json");
        let db = fixtures::populated();

        let count = export_album(&db, "Books", &path, ExportFormat::Json, &ExportOptions::default()).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array.len(), count);
        assert_eq!(array[0]["values"]["Book Title"], "Design Patterns");
        assert_eq!(array[0]["values"]["Lent out"], "YES");
        assert_eq!(array[0]["values"]["Price"], 45.5);
        assert!(array[0].get("pictures").is_none());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("a.JSON")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("a.csv")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("a")), ExportFormat::Csv);
    }
}
