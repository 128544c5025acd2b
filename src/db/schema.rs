//! Catalog schema and per-album table layout.
//!
//! Every album owns three tables that are created and dropped together:
//! the item table named after the normalised album name, `<name>_pictures`
//! and `<name>_typeinfo`.

use super::albums::{MetaField, CONTENT_VERSION_COLUMN, ID_COLUMN};
use crate::error::StoreError;

pub const ALBUM_MASTER: &str = "album_master";

pub const SCHEMA: &str = r#"
-- Registry of all albums
CREATE TABLE IF NOT EXISTS album_master (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album_name TEXT NOT NULL UNIQUE,
    table_name TEXT NOT NULL UNIQUE,
    pictures_enabled INTEGER NOT NULL DEFAULT 0,
    schema_version TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

const PICTURES_SUFFIX: &str = "_pictures";
const TYPEINFO_SUFFIX: &str = "_typeinfo";

/// Quote an identifier for use in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Normalise an album name into its storage identifier.
///
/// Lower-cases the name and replaces whitespace with underscores. Every
/// other character is kept; identifiers are always quoted.
pub fn normalize_name(name: &str) -> Result<String, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().any(|c| c.is_control()) {
        return Err(StoreError::InvalidName(name.to_string()));
    }

    let normalized: String = trimmed
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    let reserved = normalized == ALBUM_MASTER
        || normalized.starts_with("sqlite_")
        || normalized.ends_with(PICTURES_SUFFIX)
        || normalized.ends_with(TYPEINFO_SUFFIX);
    if reserved {
        return Err(StoreError::InvalidName(name.to_string()));
    }

    Ok(normalized)
}

/// Validate a user field name.
pub fn validate_field_name(name: &str) -> Result<(), StoreError> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed != name
        || name.chars().any(|c| c.is_control())
        || name.eq_ignore_ascii_case(ID_COLUMN)
        || name.eq_ignore_ascii_case(CONTENT_VERSION_COLUMN);
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn pictures_table_name(table: &str) -> String {
    format!("{}{}", table, PICTURES_SUFFIX)
}

pub fn typeinfo_table_name(table: &str) -> String {
    format!("{}{}", table, TYPEINFO_SUFFIX)
}

pub fn create_item_table_sql(table: &str, fields: &[MetaField]) -> String {
    let mut columns = vec![
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(ID_COLUMN)),
        format!("{} TEXT NOT NULL", quote_ident(CONTENT_VERSION_COLUMN)),
    ];
    columns.extend(
        fields
            .iter()
            .map(|f| format!("{} {}", quote_ident(&f.name), f.field_type.sql_type())),
    );
    format!("CREATE TABLE {} (\n    {}\n)", quote_ident(table), columns.join(",\n    "))
}

pub fn create_pictures_table_sql(table: &str) -> String {
    format!(
        r#"CREATE TABLE {pictures} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES {items}(id) ON DELETE CASCADE,
    original_path TEXT NOT NULL,
    thumbnail_path TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0
)"#,
        pictures = quote_ident(&pictures_table_name(table)),
        items = quote_ident(table),
    )
}

pub fn create_typeinfo_table_sql(table: &str) -> String {
    format!(
        r#"CREATE TABLE {} (
    field_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    field_type TEXT NOT NULL,
    quick_searchable INTEGER NOT NULL DEFAULT 0,
    ordinal INTEGER NOT NULL
)"#,
        quote_ident(&typeinfo_table_name(table))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fields::FieldType;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Music CDs").unwrap(), "music_cds");
        assert_eq!(normalize_name("My DVD Collection").unwrap(), "my_dvd_collection");
        assert_eq!(normalize_name("TestAlbum").unwrap(), "testalbum");
        assert_eq!(normalize_name("Kid's Books").unwrap(), "kid's_books");
        assert_eq!(normalize_name("Bücher").unwrap(), "bücher");
        assert_eq!(normalize_name("C++ Books").unwrap(), "c++_books");
        assert_ne!(normalize_name("C++ Books").unwrap(), normalize_name("C## Books").unwrap());
    }

    #[test]
    fn test_normalize_rejects_reserved_and_empty() {
        assert!(matches!(normalize_name("   "), Err(StoreError::InvalidName(_))));
        assert!(matches!(normalize_name("Album Master"), Err(StoreError::InvalidName(_))));
        assert!(matches!(normalize_name("Old Pictures"), Err(StoreError::InvalidName(_))));
        assert!(matches!(normalize_name("sqlite_stat1"), Err(StoreError::InvalidName(_))));
    }

    #[test]
    fn test_validate_field_name() {
        assert!(validate_field_name("Book Title").is_ok());
        assert!(validate_field_name("").is_err());
        assert!(validate_field_name(" padded").is_err());
        assert!(validate_field_name("ID").is_err());
        assert!(validate_field_name("content_version").is_err());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("Book Title"), "\"Book Title\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_item_table_columns_follow_field_types() {
        let fields = vec![
            MetaField::new("Title", FieldType::Text),
            MetaField::new("Price", FieldType::Decimal),
            MetaField::new("Rating", FieldType::StarRating),
        ];
        let sql = create_item_table_sql("dvds", &fields);
        assert!(sql.starts_with("CREATE TABLE \"dvds\""));
        assert!(sql.contains("\"Title\" TEXT"));
        assert!(sql.contains("\"Price\" REAL"));
        assert!(sql.contains("\"Rating\" INTEGER"));
    }
}
