//! Album catalog: creation, lookup and deletion of albums and their
//! field schema.

use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::albums::{Album, MetaField, CONTENT_VERSION_COLUMN, ID_COLUMN};
use super::events::StoreEvent;
use super::fields::FieldType;
use super::migrate::{plan_create_album, plan_delete_album};
use super::schema::{normalize_name, pictures_table_name, quote_ident, typeinfo_table_name};
use super::{count_rows, table_exists, Database, Result};
use crate::error::StoreError;

/// Load an album and its ordered fields by user-facing name.
pub(crate) fn load_album(conn: &Connection, name: &str) -> Result<Album> {
    let not_found = || StoreError::AlbumNotFound(name.to_string());
    let table = normalize_name(name).map_err(|_| not_found())?;

    let row = conn
        .query_row(
            "SELECT id, album_name, table_name, pictures_enabled, schema_version
             FROM album_master WHERE table_name = ?1",
            [&table],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    let (id, album_name, table_name, pictures_enabled, version) = row.ok_or_else(not_found)?;

    let schema_version = Uuid::parse_str(&version)
        .map_err(|e| StoreError::CorruptStore(format!("album '{}' schema version: {}", album_name, e)))?;

    Ok(Album {
        id,
        fields: load_fields(conn, &table_name)?,
        name: album_name,
        table_name,
        pictures_enabled,
        schema_version,
    })
}

fn load_fields(conn: &Connection, table: &str) -> Result<Vec<MetaField>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT field_name, field_type, quick_searchable, ordinal FROM {} ORDER BY ordinal",
        quote_ident(&typeinfo_table_name(table))
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, bool>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut fields = Vec::new();
    for row in rows {
        let (name, type_name, quick_searchable, ordinal) = row?;
        let field_type = FieldType::from_str(&type_name).ok_or_else(|| {
            StoreError::CorruptStore(format!("unknown type '{}' for field '{}'", type_name, name))
        })?;
        fields.push(MetaField {
            name,
            field_type,
            quick_searchable,
            ordinal: ordinal as usize,
        });
    }
    Ok(fields)
}

impl Database {
    /// Create an album with the given fields, in order.
    ///
    /// Returns the catalog id of the new album.
    pub fn create_album(&mut self, name: &str, fields: Vec<MetaField>, pictures_enabled: bool) -> Result<i64> {
        let name = name.trim();
        let table = normalize_name(name)?;
        let taken = [table.clone(), pictures_table_name(&table), typeinfo_table_name(&table)];
        for t in &taken {
            if table_exists(&self.conn, t)? {
                return Err(StoreError::DuplicateAlbumName(name.to_string()));
            }
        }

        let migration = plan_create_album(name, &table, fields, pictures_enabled)?;
        self.apply_migration(&migration)?;

        let id = self.album(name)?.id;
        tracing::info!(album = %name, table = %table, pictures_enabled, "Created album");
        self.publish(StoreEvent::AlbumCreated { album: name.to_string() });
        Ok(id)
    }

    /// Drop an album together with its items, pictures and field schema.
    pub fn delete_album(&mut self, name: &str) -> Result<()> {
        let album = self.album(name)?;
        self.apply_migration(&plan_delete_album(&album))?;
        tracing::info!(album = %album.name, "Deleted album");
        self.publish(StoreEvent::AlbumDeleted { album: album.name });
        Ok(())
    }

    pub fn album(&self, name: &str) -> Result<Album> {
        load_album(&self.conn, name)
    }

    /// All album names, alphabetically.
    pub fn list_albums(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT album_name FROM album_master ORDER BY album_name COLLATE NOCASE")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn album_exists(&self, name: &str) -> Result<bool> {
        match self.album(name) {
            Ok(_) => Ok(true),
            Err(StoreError::AlbumNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_picture_album(&self, name: &str) -> Result<bool> {
        Ok(self.album(name)?.pictures_enabled)
    }

    /// User fields in display order.
    pub fn get_fields(&self, album: &str) -> Result<Vec<MetaField>> {
        Ok(self.album(album)?.fields)
    }

    /// User fields followed by the id and content-version columns.
    pub fn get_fields_with_system_columns(&self, album: &str) -> Result<Vec<MetaField>> {
        let mut fields = self.get_fields(album)?;
        let n = fields.len();
        fields.push(MetaField {
            ordinal: n,
            ..MetaField::new(ID_COLUMN, FieldType::Id)
        });
        fields.push(MetaField {
            ordinal: n + 1,
            ..MetaField::new(CONTENT_VERSION_COLUMN, FieldType::Uuid)
        });
        Ok(fields)
    }

    pub fn get_field_names(&self, album: &str) -> Result<Vec<String>> {
        Ok(self.get_fields(album)?.into_iter().map(|f| f.name).collect())
    }

    /// Fields keyed by ordinal.
    pub fn get_meta_map(&self, album: &str) -> Result<BTreeMap<usize, MetaField>> {
        Ok(self
            .get_fields(album)?
            .into_iter()
            .map(|f| (f.ordinal, f))
            .collect())
    }

    /// Ordinals keyed by field name.
    pub fn get_name_map(&self, album: &str) -> Result<BTreeMap<String, usize>> {
        Ok(self
            .get_fields(album)?
            .into_iter()
            .map(|f| (f.name, f.ordinal))
            .collect())
    }

    pub fn get_item_count(&self, album: &str) -> Result<i64> {
        let album = self.album(album)?;
        count_rows(&self.conn, &album.table_name)
    }

    pub fn get_picture_count(&self, album: &str) -> Result<i64> {
        let album = self.album(album)?;
        count_rows(&self.conn, &album.pictures_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;

    fn music_fields() -> Vec<MetaField> {
        vec![
            MetaField::new("Artist", FieldType::Text).quick_searchable(true),
            MetaField::new("Album Title", FieldType::Text),
            MetaField::new("Year", FieldType::Integer),
        ]
    }

    #[test]
    fn test_create_album_registers_three_tables() {
        let mut db = Database::open_in_memory().unwrap();

        let id = db.create_album("Music CDs", music_fields(), false).unwrap();

        assert!(id > 0);
        assert!(db.table_exists("music_cds").unwrap());
        assert!(db.table_exists("music_cds_pictures").unwrap());
        assert!(db.table_exists("music_cds_typeinfo").unwrap());
        assert_eq!(db.list_albums().unwrap(), vec!["Music CDs".to_string()]);
        assert!(!db.is_picture_album("Music CDs").unwrap());
        assert_eq!(db.get_item_count("Music CDs").unwrap(), 0);
    }

    #[test]
    fn test_create_album_duplicate_name_is_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_album("Music CDs", music_fields(), false).unwrap();

        let result = db.create_album("music cds", music_fields(), true);

        assert!(matches!(result, Err(StoreError::DuplicateAlbumName(_))));
        assert_eq!(db.list_albums().unwrap().len(), 1);
    }

    #[test]
    fn test_create_album_validates_fields() {
        let mut db = Database::open_in_memory().unwrap();

        let dup = db.create_album(
            "Games",
            vec![
                MetaField::new("Title", FieldType::Text),
                MetaField::new("title", FieldType::Text),
            ],
            false,
        );
        assert!(matches!(dup, Err(StoreError::DuplicateFieldName { .. })));

        let reserved = db.create_album("Games", vec![MetaField::new("Key", FieldType::Uuid)], false);
        assert!(matches!(reserved, Err(StoreError::ReservedFieldType(FieldType::Uuid))));

        let invalid = db.create_album("  ", music_fields(), false);
        assert!(matches!(invalid, Err(StoreError::InvalidName(_))));

        assert!(db.list_albums().unwrap().is_empty());
        assert!(!db.table_exists("games").unwrap());
    }

    #[test]
    fn test_names_differing_only_in_non_ascii_letters_are_distinct() {
        let mut db = Database::open_in_memory().unwrap();

        db.create_album("Bücher", music_fields(), false).unwrap();
        db.create_album("Bächer", music_fields(), true).unwrap();
        db.create_album("C++ Books", music_fields(), false).unwrap();
        db.create_album("C## Books", music_fields(), false).unwrap();

        assert_eq!(db.list_albums().unwrap().len(), 4);
        assert!(db.table_exists("bücher_typeinfo").unwrap());
        assert!(db.is_picture_album("BÄCHER").unwrap());
        assert!(!db.is_picture_album("bücher").unwrap());
    }

    #[test]
    fn test_fields_keep_declared_order() {
        let db = fixtures::populated();

        let names = db.get_field_names("DVDs").unwrap();

        assert_eq!(
            names,
            vec!["Title", "Actors", "Director", "Release Year", "Rating", "Seen"]
        );
    }

    #[test]
    fn test_system_columns_follow_user_fields() {
        let db = fixtures::populated();

        let fields = db.get_fields_with_system_columns("Music CDs").unwrap();

        assert_eq!(fields.len(), 5);
        assert_eq!(fields[3].field_type, FieldType::Id);
        assert_eq!(fields[3].ordinal, 3);
        assert_eq!(fields[4].field_type, FieldType::Uuid);
        assert_eq!(fields[4].ordinal, 4);
    }

    #[test]
    fn test_meta_and_name_maps_are_inverse() {
        let db = fixtures::populated();

        let meta = db.get_meta_map("Books").unwrap();
        let names = db.get_name_map("Books").unwrap();

        assert_eq!(meta.len(), names.len());
        for (ordinal, field) in &meta {
            assert_eq!(names[&field.name], *ordinal);
        }
    }

    #[test]
    fn test_album_lookup_uses_normalised_name() {
        let db = fixtures::populated();

        assert!(db.album_exists("music cds").unwrap());
        assert!(db.album_exists("DVDS").unwrap());
        assert!(!db.album_exists("Comics").unwrap());
        assert!(matches!(db.album("Comics"), Err(StoreError::AlbumNotFound(_))));
    }

    #[test]
    fn test_delete_album_drops_everything() {
        let mut db = fixtures::populated();
        let rx = db.subscribe();

        db.delete_album("DVDs").unwrap();

        assert!(!db.album_exists("DVDs").unwrap());
        assert!(!db.table_exists("dvds").unwrap());
        assert!(!db.table_exists("dvds_pictures").unwrap());
        assert!(!db.table_exists("dvds_typeinfo").unwrap());
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::AlbumDeleted { album: "DVDs".into() }
        );

        db.create_album("DVDs", vec![MetaField::new("Title", FieldType::Text)], true)
            .unwrap();
        assert_eq!(db.get_item_count("DVDs").unwrap(), 0);
    }
}
