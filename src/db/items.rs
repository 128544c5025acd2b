//! Item store: typed CRUD over album items and their pictures.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use super::albums::{Album, Item, MetaField, Picture, CONTENT_VERSION_COLUMN, ID_COLUMN};
use super::events::StoreEvent;
use super::fields::Value;
use super::schema::quote_ident;
use super::{Database, Result};
use crate::error::StoreError;

/// Match supplied values to the album schema.
///
/// Every user field gets a value: supplied values are type-checked, missing
/// ones take the field type's default.
fn resolve_values(album: &Album, values: &BTreeMap<String, Value>) -> Result<Vec<(MetaField, Value)>> {
    for (name, value) in values {
        let field = album
            .field(name)
            .ok_or_else(|| StoreError::unknown_field(&album.name, name))?;
        value
            .check(field.field_type)
            .map_err(|reason| StoreError::mismatch(&field.name, field.field_type, reason))?;
    }

    Ok(album
        .fields
        .iter()
        .map(|field| {
            let value = values
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&field.name))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| field.field_type.default_value());
            (field.clone(), value)
        })
        .collect())
}

fn check_pictures(album: &Album, item: &Item) -> Result<()> {
    if !album.pictures_enabled && !item.pictures.is_empty() {
        return Err(StoreError::PicturesDisabled(album.name.clone()));
    }
    Ok(())
}

fn insert_pictures(conn: &Connection, album: &Album, item_id: i64, pictures: &[Picture]) -> Result<()> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (item_id, original_path, thumbnail_path, position) VALUES (?1, ?2, ?3, ?4)",
        quote_ident(&album.pictures_table())
    ))?;
    for (position, picture) in pictures.iter().enumerate() {
        stmt.execute(params![
            item_id,
            picture.original_path.to_string_lossy(),
            picture.thumbnail_path.to_string_lossy(),
            position as i64
        ])?;
    }
    Ok(())
}

fn delete_pictures(conn: &Connection, album: &Album, item_id: i64) -> Result<()> {
    conn.execute(
        &format!("DELETE FROM {} WHERE item_id = ?1", quote_ident(&album.pictures_table())),
        [item_id],
    )?;
    Ok(())
}

pub(crate) fn load_pictures(conn: &Connection, album: &Album, item_id: i64) -> Result<Vec<Picture>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, original_path, thumbnail_path FROM {} WHERE item_id = ?1 ORDER BY position, id",
        quote_ident(&album.pictures_table())
    ))?;
    let pictures = stmt
        .query_map([item_id], |row| {
            Ok(Picture {
                id: Some(row.get(0)?),
                original_path: PathBuf::from(row.get::<_, String>(1)?),
                thumbnail_path: PathBuf::from(row.get::<_, String>(2)?),
                album: album.name.clone(),
                item_id: Some(item_id),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pictures)
}

/// Load one item with its pictures against an already loaded schema.
pub(crate) fn load_item(conn: &Connection, album: &Album, id: i64) -> Result<Option<Item>> {
    let mut columns = vec![quote_ident(CONTENT_VERSION_COLUMN)];
    columns.extend(album.fields.iter().map(|f| quote_ident(&f.name)));
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        columns.join(", "),
        quote_ident(&album.table_name),
        quote_ident(ID_COLUMN)
    );

    let raw: Option<Vec<SqlValue>> = conn
        .query_row(&sql, [id], |row| {
            (0..columns.len())
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };

    let content_version = match &raw[0] {
        SqlValue::Text(s) => Uuid::parse_str(s).ok(),
        _ => None,
    }
    .ok_or_else(|| {
        StoreError::CorruptStore(format!("item {} of '{}' has no valid content version", id, album.name))
    })?;

    let mut values = BTreeMap::new();
    for (field, stored) in album.fields.iter().zip(&raw[1..]) {
        let value = Value::from_sql(field.field_type, stored.into())
            .map_err(|reason| StoreError::mismatch(&field.name, field.field_type, reason))?;
        values.insert(field.name.clone(), value);
    }

    let pictures = if album.pictures_enabled {
        load_pictures(conn, album, id)?
    } else {
        Vec::new()
    };

    Ok(Some(Item {
        id: Some(id),
        album: album.name.clone(),
        values,
        content_version,
        pictures,
    }))
}

impl Database {
    /// Add an item to its album and return the new id.
    ///
    /// `ItemAdded` is published only when `add_to_result_set` is set, so bulk
    /// loaders can stay silent.
    pub fn add_item(&mut self, item: &Item, add_to_result_set: bool) -> Result<i64> {
        let album = self.album(&item.album)?;
        let values = resolve_values(&album, &item.values)?;
        check_pictures(&album, item)?;

        let mut columns = vec![quote_ident(CONTENT_VERSION_COLUMN)];
        columns.extend(values.iter().map(|(f, _)| quote_ident(&f.name)));
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&album.table_name),
            columns.join(", "),
            placeholders.join(", ")
        );

        let version = Value::Text(item.content_version.to_string());
        let tx = self.conn.transaction()?;
        tx.execute(
            &sql,
            params_from_iter(std::iter::once(&version).chain(values.iter().map(|(_, v)| v))),
        )?;
        let id = tx.last_insert_rowid();
        insert_pictures(&tx, &album, id, &item.pictures)?;
        tx.commit()?;

        tracing::debug!(album = %album.name, id, pictures = item.pictures.len(), "Added item");
        if add_to_result_set {
            self.publish(StoreEvent::ItemAdded { album: album.name, id });
        }
        Ok(id)
    }

    /// Replace an item's values and pictures.
    ///
    /// Returns the item's new content version. Unsaved items (no id) are
    /// reported as `ItemNotFound` with id 0.
    pub fn update_item(&mut self, item: &Item) -> Result<Uuid> {
        let album = self.album(&item.album)?;
        let id = item.id.ok_or_else(|| StoreError::ItemNotFound {
            album: album.name.clone(),
            id: 0,
        })?;
        let values = resolve_values(&album, &item.values)?;
        check_pictures(&album, item)?;

        let mut assignments = vec![format!("{} = ?1", quote_ident(CONTENT_VERSION_COLUMN))];
        assignments.extend(
            values
                .iter()
                .enumerate()
                .map(|(i, (f, _))| format!("{} = ?{}", quote_ident(&f.name), i + 2)),
        );
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_ident(&album.table_name),
            assignments.join(", "),
            quote_ident(ID_COLUMN),
            assignments.len() + 1
        );

        let new_version = Uuid::new_v4();
        let version = Value::Text(new_version.to_string());
        let id_value = Value::Integer(id);
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            &sql,
            params_from_iter(
                std::iter::once(&version)
                    .chain(values.iter().map(|(_, v)| v))
                    .chain(std::iter::once(&id_value)),
            ),
        )?;
        if changed == 0 {
            return Err(StoreError::ItemNotFound { album: album.name, id });
        }
        delete_pictures(&tx, &album, id)?;
        insert_pictures(&tx, &album, id, &item.pictures)?;
        tx.commit()?;

        tracing::debug!(album = %album.name, id, "Updated item");
        self.publish(StoreEvent::ItemUpdated { album: album.name, id });
        Ok(new_version)
    }

    /// Delete an item and its pictures. Deleting a missing item is not an
    /// error; the return value tells whether anything was removed.
    pub fn delete_item(&mut self, album: &str, id: i64) -> Result<bool> {
        let album = self.album(album)?;

        let tx = self.conn.transaction()?;
        delete_pictures(&tx, &album, id)?;
        let deleted = tx.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                quote_ident(&album.table_name),
                quote_ident(ID_COLUMN)
            ),
            [id],
        )?;
        tx.commit()?;

        if deleted > 0 {
            tracing::debug!(album = %album.name, id, "Deleted item");
            self.publish(StoreEvent::ItemDeleted { album: album.name, id });
        }
        Ok(deleted > 0)
    }

    pub fn get_item(&self, album: &str, id: i64) -> Result<Option<Item>> {
        let album = self.album(album)?;
        load_item(&self.conn, &album, id)
    }

    /// Every item of an album in id order.
    pub fn get_all_items(&self, album: &str) -> Result<Vec<Item>> {
        self.select_all(album)?.collect()
    }

    pub fn get_pictures(&self, album: &str, id: i64) -> Result<Vec<Picture>> {
        let album = self.album(album)?;
        load_pictures(&self.conn, &album, id)
    }

    /// An unsaved item holding every field's default value.
    pub fn empty_item(&self, album: &str) -> Result<Item> {
        let album = self.album(album)?;
        let mut item = Item::new(&album.name);
        for field in &album.fields {
            item.set_value(field.name.clone(), field.field_type.default_value());
        }
        Ok(item)
    }
}
