//! Schema changes as planned step lists applied inside one transaction.
//!
//! Every structural operation first builds a [`Migration`] from the current
//! [`Album`] without touching storage. Applying it runs each step in a
//! single transaction, checks that row counts the migration promises to
//! keep are unchanged, and commits. Any failure rolls the whole store back
//! to its prior state.

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::albums::{Album, MetaField, ID_COLUMN};
use super::events::StoreEvent;
use super::fields::{FieldType, Value};
use super::schema::{
    self, create_item_table_sql, create_pictures_table_sql, create_typeinfo_table_sql,
    pictures_table_name, quote_ident, typeinfo_table_name, ALBUM_MASTER,
};
use super::{count_rows, Database, Result};
use crate::error::StoreError;

const CONVERT_COLUMN: &str = "__collector_convert";
const RENAME_COLUMN: &str = "__collector_rename";

/// One storage-level action of a migration.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStep {
    CreateItemTable { table: String, fields: Vec<MetaField> },
    CreatePicturesTable { table: String },
    CreateTypeInfoTable { table: String },
    RegisterAlbum { name: String, table: String, pictures_enabled: bool },
    AddColumn { table: String, field: MetaField },
    /// Set a column to the same value in every row.
    Backfill { table: String, column: String, value: Value },
    DropColumn { table: String, column: String },
    RenameColumn { table: String, from: String, to: String },
    /// Rewrite every value of a column as another field type.
    ConvertColumn { table: String, column: String, from: FieldType, to: FieldType },
    InsertTypeInfo { table: String, field: MetaField },
    UpdateTypeInfo { table: String, old_name: String, field: MetaField },
    DeleteTypeInfo { table: String, field: String },
    /// Rewrite all ordinals so `order[i]` gets ordinal `i`.
    SetOrdinals { table: String, order: Vec<String> },
    RenameTable { from: String, to: String },
    UpdateAlbumEntry { table: String, name: String, new_table: String },
    SetPicturesEnabled { table: String, enabled: bool },
    DeleteAllPictures { table: String },
    DropTable { table: String },
    UnregisterAlbum { table: String },
    BumpSchemaVersion { table: String },
}

/// Row counts a migration must leave unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Preserves {
    pub table_before: String,
    pub table_after: String,
    pub items: bool,
    pub pictures: bool,
}

/// A planned schema change.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub name: String,
    pub steps: Vec<MigrationStep>,
    pub preserves: Option<Preserves>,
}

impl Migration {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            preserves: None,
        }
    }

    fn step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    fn preserving(mut self, before: &str, after: &str, items: bool, pictures: bool) -> Self {
        self.preserves = Some(Preserves {
            table_before: before.to_string(),
            table_after: after.to_string(),
            items,
            pictures,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Validate a new field list and assign dense ordinals.
pub(crate) fn prepare_fields(album: &str, fields: Vec<MetaField>) -> Result<Vec<MetaField>> {
    let mut prepared: Vec<MetaField> = Vec::with_capacity(fields.len());
    for (ordinal, mut field) in fields.into_iter().enumerate() {
        check_new_field(album, &prepared, &field)?;
        field.ordinal = ordinal;
        prepared.push(field);
    }
    Ok(prepared)
}

fn check_new_field(album: &str, existing: &[MetaField], field: &MetaField) -> Result<()> {
    schema::validate_field_name(&field.name)?;
    if field.field_type.is_reserved() {
        return Err(StoreError::ReservedFieldType(field.field_type));
    }
    if existing.iter().any(|f| f.name.eq_ignore_ascii_case(&field.name)) {
        return Err(StoreError::DuplicateFieldName {
            album: album.to_string(),
            field: field.name.clone(),
        });
    }
    Ok(())
}

fn find_field<'a>(album: &'a Album, name: &str) -> Result<&'a MetaField> {
    album
        .field(name)
        .ok_or_else(|| StoreError::field_not_found(&album.name, name))
}

pub fn plan_create_album(
    name: &str,
    table: &str,
    fields: Vec<MetaField>,
    pictures_enabled: bool,
) -> Result<Migration> {
    let fields = prepare_fields(name, fields)?;
    let mut migration = Migration::new(format!("create album '{}'", name))
        .step(MigrationStep::CreateItemTable {
            table: table.to_string(),
            fields: fields.clone(),
        })
        .step(MigrationStep::CreatePicturesTable { table: table.to_string() })
        .step(MigrationStep::CreateTypeInfoTable { table: table.to_string() });
    for field in fields {
        migration = migration.step(MigrationStep::InsertTypeInfo {
            table: table.to_string(),
            field,
        });
    }
    Ok(migration.step(MigrationStep::RegisterAlbum {
        name: name.to_string(),
        table: table.to_string(),
        pictures_enabled,
    }))
}

pub fn plan_delete_album(album: &Album) -> Migration {
    let table = &album.table_name;
    Migration::new(format!("delete album '{}'", album.name))
        .step(MigrationStep::DropTable { table: pictures_table_name(table) })
        .step(MigrationStep::DropTable { table: typeinfo_table_name(table) })
        .step(MigrationStep::DropTable { table: table.clone() })
        .step(MigrationStep::UnregisterAlbum { table: table.clone() })
}

pub fn plan_append_field(album: &Album, field: MetaField) -> Result<Migration> {
    check_new_field(&album.name, &album.fields, &field)?;
    let table = &album.table_name;
    let field = MetaField {
        ordinal: album.fields.len(),
        ..field
    };
    let default = field.field_type.default_value();

    let mut migration = Migration::new(format!("append field '{}' to '{}'", field.name, album.name))
        .step(MigrationStep::AddColumn {
            table: table.clone(),
            field: field.clone(),
        });
    if !default.is_null() {
        migration = migration.step(MigrationStep::Backfill {
            table: table.clone(),
            column: field.name.clone(),
            value: default,
        });
    }
    Ok(migration
        .step(MigrationStep::InsertTypeInfo {
            table: table.clone(),
            field,
        })
        .step(MigrationStep::BumpSchemaVersion { table: table.clone() })
        .preserving(table, table, true, true))
}

pub fn plan_remove_field(album: &Album, name: &str) -> Result<Migration> {
    let field = find_field(album, name)?;
    let table = &album.table_name;
    let order = album
        .fields
        .iter()
        .filter(|f| f.name != field.name)
        .map(|f| f.name.clone())
        .collect();

    Ok(Migration::new(format!("remove field '{}' from '{}'", field.name, album.name))
        .step(MigrationStep::DropColumn {
            table: table.clone(),
            column: field.name.clone(),
        })
        .step(MigrationStep::DeleteTypeInfo {
            table: table.clone(),
            field: field.name.clone(),
        })
        .step(MigrationStep::SetOrdinals {
            table: table.clone(),
            order,
        })
        .step(MigrationStep::BumpSchemaVersion { table: table.clone() })
        .preserving(table, table, true, true))
}

/// Rename and/or retype a field, keeping its position.
pub fn plan_rename_field(album: &Album, old_name: &str, new_field: MetaField) -> Result<Migration> {
    let old = find_field(album, old_name)?;
    let others: Vec<MetaField> = album
        .fields
        .iter()
        .filter(|f| f.name != old.name)
        .cloned()
        .collect();
    check_new_field(&album.name, &others, &new_field)?;

    let table = &album.table_name;
    let new_field = MetaField {
        ordinal: old.ordinal,
        ..new_field
    };
    let mut migration = Migration::new(format!(
        "rename field '{}' to '{}' in '{}'",
        old.name, new_field.name, album.name
    ));

    if old.name != new_field.name {
        migration = migration.step(MigrationStep::RenameColumn {
            table: table.clone(),
            from: old.name.clone(),
            to: new_field.name.clone(),
        });
    }
    if old.field_type != new_field.field_type {
        migration = migration.step(MigrationStep::ConvertColumn {
            table: table.clone(),
            column: new_field.name.clone(),
            from: old.field_type,
            to: new_field.field_type,
        });
    }
    Ok(migration
        .step(MigrationStep::UpdateTypeInfo {
            table: table.clone(),
            old_name: old.name.clone(),
            field: new_field,
        })
        .step(MigrationStep::BumpSchemaVersion { table: table.clone() })
        .preserving(table, table, true, true))
}

/// Move a field to sit immediately after `after`, or first when `after` is
/// `None`. Returns an empty migration when the order would not change.
pub fn plan_reorder_field(album: &Album, name: &str, after: Option<&str>) -> Result<Migration> {
    let moving = find_field(album, name)?.name.clone();
    let anchor = after.map(|a| find_field(album, a)).transpose()?;

    let current: Vec<String> = album.fields.iter().map(|f| f.name.clone()).collect();
    let mut order: Vec<String> = current.iter().filter(|n| **n != moving).cloned().collect();
    let insert_at = match anchor {
        None => 0,
        Some(a) if a.name == moving => return Ok(Migration::new("reorder (no change)")),
        Some(a) => order.iter().position(|n| *n == a.name).map_or(order.len(), |i| i + 1),
    };
    order.insert(insert_at, moving.clone());

    if order == current {
        return Ok(Migration::new("reorder (no change)"));
    }

    let table = &album.table_name;
    Ok(Migration::new(format!("move field '{}' in '{}'", moving, album.name))
        .step(MigrationStep::SetOrdinals {
            table: table.clone(),
            order,
        })
        .step(MigrationStep::BumpSchemaVersion { table: table.clone() })
        .preserving(table, table, true, true))
}

pub fn plan_rename_album(album: &Album, new_name: &str, new_table: &str) -> Migration {
    let table = &album.table_name;
    let mut migration = Migration::new(format!("rename album '{}' to '{}'", album.name, new_name));
    if table != new_table {
        migration = migration
            .step(MigrationStep::RenameTable {
                from: table.clone(),
                to: new_table.to_string(),
            })
            .step(MigrationStep::RenameTable {
                from: pictures_table_name(table),
                to: pictures_table_name(new_table),
            })
            .step(MigrationStep::RenameTable {
                from: typeinfo_table_name(table),
                to: typeinfo_table_name(new_table),
            });
    }
    migration
        .step(MigrationStep::UpdateAlbumEntry {
            table: table.clone(),
            name: new_name.to_string(),
            new_table: new_table.to_string(),
        })
        .step(MigrationStep::BumpSchemaVersion { table: new_table.to_string() })
        .preserving(table, new_table, true, true)
}

/// Turning pictures off discards every stored picture of the album.
pub fn plan_set_pictures(album: &Album, enabled: bool) -> Migration {
    let table = &album.table_name;
    if album.pictures_enabled == enabled {
        return Migration::new("set pictures (no change)");
    }
    let mut migration = Migration::new(format!(
        "{} pictures for '{}'",
        if enabled { "enable" } else { "disable" },
        album.name
    ));
    if !enabled {
        migration = migration.step(MigrationStep::DeleteAllPictures { table: table.clone() });
    }
    migration
        .step(MigrationStep::SetPicturesEnabled {
            table: table.clone(),
            enabled,
        })
        .step(MigrationStep::BumpSchemaVersion { table: table.clone() })
        .preserving(table, table, true, enabled)
}

pub fn plan_update_quick_searchable(album: &Album, name: &str, quick_searchable: bool) -> Result<Migration> {
    let field = find_field(album, name)?;
    let table = &album.table_name;
    Ok(Migration::new(format!("mark '{}' quick-searchable={}", field.name, quick_searchable))
        .step(MigrationStep::UpdateTypeInfo {
            table: table.clone(),
            old_name: field.name.clone(),
            field: field.clone().quick_searchable(quick_searchable),
        })
        .preserving(table, table, true, true))
}

// ============================================================================
// Execution
// ============================================================================

impl MigrationStep {
    fn execute(&self, conn: &Connection) -> Result<()> {
        match self {
            MigrationStep::CreateItemTable { table, fields } => {
                conn.execute_batch(&create_item_table_sql(table, fields))?;
            }
            MigrationStep::CreatePicturesTable { table } => {
                conn.execute_batch(&create_pictures_table_sql(table))?;
            }
            MigrationStep::CreateTypeInfoTable { table } => {
                conn.execute_batch(&create_typeinfo_table_sql(table))?;
            }
            MigrationStep::RegisterAlbum {
                name,
                table,
                pictures_enabled,
            } => {
                conn.execute(
                    &format!(
                        "INSERT INTO {} (album_name, table_name, pictures_enabled, schema_version)
                         VALUES (?1, ?2, ?3, ?4)",
                        ALBUM_MASTER
                    ),
                    params![name, table, pictures_enabled, Uuid::new_v4().to_string()],
                )?;
            }
            MigrationStep::AddColumn { table, field } => {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(table),
                    quote_ident(&field.name),
                    field.field_type.sql_type()
                ))?;
            }
            MigrationStep::Backfill { table, column, value } => {
                conn.execute(
                    &format!("UPDATE {} SET {} = ?1", quote_ident(table), quote_ident(column)),
                    [value],
                )?;
            }
            MigrationStep::DropColumn { table, column } => {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    quote_ident(table),
                    quote_ident(column)
                ))?;
            }
            MigrationStep::RenameColumn { table, from, to } => {
                // SQLite compares column names case-insensitively, so a
                // case-only rename goes through a scratch name.
                if from.eq_ignore_ascii_case(to) {
                    rename_column(conn, table, from, RENAME_COLUMN)?;
                    rename_column(conn, table, RENAME_COLUMN, to)?;
                } else {
                    rename_column(conn, table, from, to)?;
                }
            }
            MigrationStep::ConvertColumn {
                table,
                column,
                from,
                to,
            } => convert_column(conn, table, column, *from, *to)?,
            MigrationStep::InsertTypeInfo { table, field } => {
                conn.execute(
                    &format!(
                        "INSERT INTO {} (field_name, field_type, quick_searchable, ordinal)
                         VALUES (?1, ?2, ?3, ?4)",
                        quote_ident(&typeinfo_table_name(table))
                    ),
                    params![
                        field.name,
                        field.field_type.as_str(),
                        field.quick_searchable,
                        field.ordinal as i64
                    ],
                )?;
            }
            MigrationStep::UpdateTypeInfo {
                table,
                old_name,
                field,
            } => {
                conn.execute(
                    &format!(
                        "UPDATE {} SET field_name = ?1, field_type = ?2, quick_searchable = ?3
                         WHERE field_name = ?4",
                        quote_ident(&typeinfo_table_name(table))
                    ),
                    params![field.name, field.field_type.as_str(), field.quick_searchable, old_name],
                )?;
            }
            MigrationStep::DeleteTypeInfo { table, field } => {
                conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE field_name = ?1",
                        quote_ident(&typeinfo_table_name(table))
                    ),
                    [field],
                )?;
            }
            MigrationStep::SetOrdinals { table, order } => {
                let mut stmt = conn.prepare(&format!(
                    "UPDATE {} SET ordinal = ?1 WHERE field_name = ?2",
                    quote_ident(&typeinfo_table_name(table))
                ))?;
                for (ordinal, name) in order.iter().enumerate() {
                    stmt.execute(params![ordinal as i64, name])?;
                }
            }
            MigrationStep::RenameTable { from, to } => {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote_ident(from),
                    quote_ident(to)
                ))?;
            }
            MigrationStep::UpdateAlbumEntry {
                table,
                name,
                new_table,
            } => {
                conn.execute(
                    &format!(
                        "UPDATE {} SET album_name = ?1, table_name = ?2, updated_at = CURRENT_TIMESTAMP
                         WHERE table_name = ?3",
                        ALBUM_MASTER
                    ),
                    params![name, new_table, table],
                )?;
            }
            MigrationStep::SetPicturesEnabled { table, enabled } => {
                conn.execute(
                    &format!(
                        "UPDATE {} SET pictures_enabled = ?1 WHERE table_name = ?2",
                        ALBUM_MASTER
                    ),
                    params![enabled, table],
                )?;
            }
            MigrationStep::DeleteAllPictures { table } => {
                conn.execute_batch(&format!(
                    "DELETE FROM {}",
                    quote_ident(&pictures_table_name(table))
                ))?;
            }
            MigrationStep::DropTable { table } => {
                conn.execute_batch(&format!("DROP TABLE {}", quote_ident(table)))?;
            }
            MigrationStep::UnregisterAlbum { table } => {
                conn.execute(
                    &format!("DELETE FROM {} WHERE table_name = ?1", ALBUM_MASTER),
                    [table],
                )?;
            }
            MigrationStep::BumpSchemaVersion { table } => {
                conn.execute(
                    &format!(
                        "UPDATE {} SET schema_version = ?1, updated_at = CURRENT_TIMESTAMP
                         WHERE table_name = ?2",
                        ALBUM_MASTER
                    ),
                    params![Uuid::new_v4().to_string(), table],
                )?;
            }
        }
        Ok(())
    }
}

fn rename_column(conn: &Connection, table: &str, from: &str, to: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(from),
        quote_ident(to)
    ))?;
    Ok(())
}

/// Values that cannot be read as `from` or converted to `to` become the
/// target type's default.
fn convert_column(conn: &Connection, table: &str, column: &str, from: FieldType, to: FieldType) -> Result<()> {
    let t = quote_ident(table);
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        t,
        quote_ident(CONVERT_COLUMN),
        to.sql_type()
    ))?;

    let rows: Vec<(i64, rusqlite::types::Value)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM {}",
            quote_ident(ID_COLUMN),
            quote_ident(column),
            t
        ))?;
        let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        mapped.collect::<rusqlite::Result<_>>()?
    };

    let mut update = conn.prepare(&format!(
        "UPDATE {} SET {} = ?1 WHERE {} = ?2",
        t,
        quote_ident(CONVERT_COLUMN),
        quote_ident(ID_COLUMN)
    ))?;
    for (id, raw) in &rows {
        let converted = Value::from_sql(from, raw.into())
            .map(|v| v.convert_to(to))
            .unwrap_or_else(|_| to.default_value());
        update.execute(params![converted, id])?;
    }
    drop(update);

    conn.execute_batch(&format!("ALTER TABLE {} DROP COLUMN {}", t, quote_ident(column)))?;
    rename_column(conn, table, CONVERT_COLUMN, column)?;
    tracing::debug!(table, column, %from, %to, rows = rows.len(), "Converted column");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct RowCounts {
    items: i64,
    pictures: i64,
}

fn row_counts(conn: &Connection, table: &str) -> Result<RowCounts> {
    Ok(RowCounts {
        items: count_rows(conn, table)?,
        pictures: count_rows(conn, &pictures_table_name(table))?,
    })
}

fn run_steps(conn: &Connection, migration: &Migration) -> Result<()> {
    let before = match &migration.preserves {
        Some(p) => Some(row_counts(conn, &p.table_before)?),
        None => None,
    };

    for step in &migration.steps {
        tracing::trace!(?step, "Migration step");
        step.execute(conn)?;
    }

    if let (Some(p), Some(before)) = (&migration.preserves, before) {
        let after = row_counts(conn, &p.table_after)?;
        let violated = |what: &str, b: i64, a: i64| StoreError::InvariantViolated {
            migration: migration.name.clone(),
            detail: format!("{} count changed from {} to {}", what, b, a),
        };
        if p.items && before.items != after.items {
            return Err(violated("item", before.items, after.items));
        }
        if p.pictures && before.pictures != after.pictures {
            return Err(violated("picture", before.pictures, after.pictures));
        }
    }
    Ok(())
}

impl Database {
    /// Apply a planned migration atomically.
    pub fn apply_migration(&mut self, migration: &Migration) -> Result<()> {
        if migration.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        match run_steps(&tx, migration) {
            Ok(()) => {
                tx.commit()?;
                tracing::info!(migration = %migration.name, steps = migration.steps.len(), "Applied migration");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                tracing::warn!(migration = %migration.name, error = %e, "Migration rolled back");
                Err(e)
            }
        }
    }

    /// Add a field at the end of the album's field order.
    ///
    /// Existing items get the type's default: `UNKNOWN` for options, zero
    /// stars for ratings, empty for everything else.
    pub fn append_field(&mut self, album: &str, field: MetaField) -> Result<()> {
        let current = self.album(album)?;
        let migration = plan_append_field(&current, field)?;
        self.apply_migration(&migration)?;
        self.publish(StoreEvent::SchemaChanged { album: current.name });
        Ok(())
    }

    /// Delete a field and its data from every item.
    pub fn remove_field(&mut self, album: &str, field: &str) -> Result<()> {
        let current = self.album(album)?;
        let migration = plan_remove_field(&current, field)?;
        self.apply_migration(&migration)?;
        self.publish(StoreEvent::SchemaChanged { album: current.name });
        Ok(())
    }

    /// Change a field's name, type or quick-search flag in place.
    pub fn rename_field(&mut self, album: &str, old_name: &str, new_field: MetaField) -> Result<()> {
        let current = self.album(album)?;
        let migration = plan_rename_field(&current, old_name, new_field)?;
        self.apply_migration(&migration)?;
        self.publish(StoreEvent::SchemaChanged { album: current.name });
        Ok(())
    }

    /// Place `field` directly after `after`, or first when `after` is `None`.
    pub fn reorder_field(&mut self, album: &str, field: &str, after: Option<&str>) -> Result<()> {
        let current = self.album(album)?;
        let migration = plan_reorder_field(&current, field, after)?;
        if migration.is_empty() {
            return Ok(());
        }
        self.apply_migration(&migration)?;
        self.publish(StoreEvent::SchemaChanged { album: current.name });
        Ok(())
    }

    pub fn rename_album(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        let current = self.album(old_name)?;
        let new_table = schema::normalize_name(new_name)?;
        if new_table != current.table_name && self.table_exists(&new_table)? {
            return Err(StoreError::DuplicateAlbumName(new_name.to_string()));
        }

        let migration = plan_rename_album(&current, new_name, &new_table);
        self.apply_migration(&migration)?;
        self.publish(StoreEvent::AlbumRenamed {
            from: current.name,
            to: new_name.to_string(),
        });
        Ok(())
    }

    /// Enable or disable pictures. Disabling deletes all stored pictures.
    pub fn set_picture_functionality(&mut self, album: &str, enabled: bool) -> Result<()> {
        let current = self.album(album)?;
        let migration = plan_set_pictures(&current, enabled);
        if migration.is_empty() {
            return Ok(());
        }
        self.apply_migration(&migration)?;
        self.publish(StoreEvent::SchemaChanged { album: current.name });
        Ok(())
    }

    pub fn update_quick_searchable(&mut self, album: &str, field: &str, quick_searchable: bool) -> Result<()> {
        let current = self.album(album)?;
        let migration = plan_update_quick_searchable(&current, field, quick_searchable)?;
        self.apply_migration(&migration)?;
        self.publish(StoreEvent::SchemaChanged { album: current.name });
        Ok(())
    }
}
