//! Types for albums, their field schema, items and pictures.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use super::fields::{FieldType, Value};

/// Column holding the item id in every item table.
pub const ID_COLUMN: &str = "id";
/// Column holding the item content version in every item table.
pub const CONTENT_VERSION_COLUMN: &str = "content_version";

/// Schema-level description of one album field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaField {
    pub name: String,
    pub field_type: FieldType,
    pub quick_searchable: bool,
    /// Position in display order, dense from zero.
    pub ordinal: usize,
}

impl MetaField {
    /// A new field; its ordinal is assigned when it joins an album.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            quick_searchable: false,
            ordinal: 0,
        }
    }

    pub fn quick_searchable(mut self, quick_searchable: bool) -> Self {
        self.quick_searchable = quick_searchable;
        self
    }

    /// True for the id and content-version columns.
    pub fn is_system(&self) -> bool {
        matches!(self.field_type, FieldType::Id | FieldType::Uuid)
    }
}

/// An album with its current schema.
#[derive(Debug, Clone, Serialize)]
pub struct Album {
    pub id: i64,
    pub name: String,
    /// Normalised identifier of the item table.
    pub table_name: String,
    pub fields: Vec<MetaField>,
    pub pictures_enabled: bool,
    pub schema_version: Uuid,
}

impl Album {
    pub fn field(&self, name: &str) -> Option<&MetaField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn pictures_table(&self) -> String {
        super::schema::pictures_table_name(&self.table_name)
    }

    pub fn typeinfo_table(&self) -> String {
        super::schema::typeinfo_table_name(&self.table_name)
    }
}

/// An image attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Picture {
    /// `None` until the picture is persisted.
    pub id: Option<i64>,
    pub original_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub album: String,
    pub item_id: Option<i64>,
}

impl Picture {
    pub fn new(
        original_path: impl Into<PathBuf>,
        thumbnail_path: impl Into<PathBuf>,
        album: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            original_path: original_path.into(),
            thumbnail_path: thumbnail_path.into(),
            album: album.into(),
            item_id: None,
        }
    }
}

/// One catalogue entry of an album.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    /// `None` until the item is added to its album.
    pub id: Option<i64>,
    pub album: String,
    pub values: BTreeMap<String, Value>,
    pub content_version: Uuid,
    pub pictures: Vec<Picture>,
}

impl Item {
    pub fn new(album: impl Into<String>) -> Self {
        Self {
            id: None,
            album: album.into(),
            values: BTreeMap::new(),
            content_version: Uuid::new_v4(),
            pictures: Vec::new(),
        }
    }

    pub fn with_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn with_picture(mut self, picture: Picture) -> Self {
        self.pictures.push(picture);
        self
    }

    pub fn set_value(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Text content of a field, if it holds text or a URL.
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.values.get(field) {
            Some(Value::Text(s)) | Some(Value::Url(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_builder() {
        let item = Item::new("Books")
            .with_value("Book Title", "Clean Code")
            .with_value("Price", 29.9)
            .with_picture(Picture::new("/a.jpg", "/a_thumb.jpg", "Books"));

        assert_eq!(item.text("Book Title"), Some("Clean Code"));
        assert_eq!(item.value("Price"), Some(&Value::Decimal(29.9)));
        assert_eq!(item.pictures.len(), 1);
        assert!(item.id.is_none());
    }

    #[test]
    fn test_album_field_lookup_ignores_case() {
        let album = Album {
            id: 1,
            name: "Music CDs".to_string(),
            table_name: "music_cds".to_string(),
            fields: vec![MetaField::new("Artist", FieldType::Text)],
            pictures_enabled: false,
            schema_version: Uuid::nil(),
        };
        assert!(album.field("artist").is_some());
        assert_eq!(album.pictures_table(), "music_cds_pictures");
        assert_eq!(album.typeinfo_table(), "music_cds_typeinfo");
    }
}
