//! Catalog — the persistent record of every known source file, one column
//! per plugin-valid key, keyed by `(src_path, src_inode)`.
//!
//! Grounded on `business_logic.py`'s `add_entry`/`remove_entry`/
//! `update_column`/`check_tables`/`get_srcfilename_by_inode`/
//! `get_all_src_names`, plus the `defaults`/`views` magic-row handling in
//! `setup_db`/`get_magix_from_db`.

use std::collections::HashMap;

use libfs_core::{normalize_value, CatalogRow, Magic, View, UNKNOWN};

use crate::backend::{Backend, Param};
use crate::error::{Result, StorageError};

const FILES_TABLE: &str = "files";
const VIEWS_TABLE: &str = "views";
const MAGIC_TABLE: &str = "defaults";
const SRC_PATH_KEY: &str = "src_path";
const SRC_INODE_KEY: &str = "src_inode";

pub struct Catalog {
    backend: Backend,
    pub magic: Magic,
    ordered_columns: Vec<String>,
}

impl Catalog {
    /// Opens an existing library, or creates a new one when `magic` is
    /// supplied and no library exists yet at `connection_string`. Mirrors
    /// `BusinessLogic.__init__`'s `do_setup_db` branch.
    pub async fn open(connection_string: &str, magic: Option<Magic>) -> Result<Self> {
        let backend = Backend::open(connection_string).await?;

        let existing = backend
            .execute(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?",
                &[Param::from(MAGIC_TABLE)],
            )
            .await?;

        let magic = if existing.is_empty() {
            let magic = magic.ok_or_else(|| {
                StorageError::InvalidPath(
                    "library does not exist and no magic was supplied to create one".into(),
                )
            })?;
            Self::bootstrap(&backend, &magic).await?;
            magic
        } else {
            Self::check_db(&backend).await?;
            Self::load_magic(&backend).await?
        };

        let ordered_columns = backend.columns(FILES_TABLE).await?;
        Self::check_tables(&ordered_columns, &magic)?;

        Ok(Self {
            backend,
            magic,
            ordered_columns,
        })
    }

    /// Creates `defaults`, `views` and `files` and seeds the default view.
    /// Mirrors `business_logic.py::setup_db`.
    async fn bootstrap(backend: &Backend, magic: &Magic) -> Result<()> {
        backend
            .execute(&format!("CREATE TABLE {MAGIC_TABLE} (json TEXT)"), &[])
            .await?;
        let magic_json = serde_json::to_string(magic)?;
        backend
            .execute(
                &format!("INSERT INTO {MAGIC_TABLE} (json) VALUES (?)"),
                &[Param::from(magic_json)],
            )
            .await?;

        backend
            .execute(
                &format!("CREATE TABLE {VIEWS_TABLE} (name TEXT UNIQUE, json TEXT)"),
                &[],
            )
            .await?;
        let view_json = serde_json::to_string(&magic.default_view)?;
        backend
            .execute(
                &format!("INSERT INTO {VIEWS_TABLE} (name, json) VALUES ('default', ?)"),
                &[Param::from(view_json)],
            )
            .await?;

        let mut columns = vec![
            format!("{SRC_PATH_KEY} TEXT UNIQUE"),
            format!("{SRC_INODE_KEY} INTEGER UNIQUE"),
        ];
        for key in &magic.valid_keys {
            columns.push(format!("`{key}` TEXT"));
        }
        backend
            .execute(
                &format!("CREATE TABLE {FILES_TABLE} ({})", columns.join(", ")),
                &[],
            )
            .await?;

        backend.commit().await
    }

    async fn load_magic(backend: &Backend) -> Result<Magic> {
        let rows = backend
            .execute(&format!("SELECT json FROM {MAGIC_TABLE}"), &[])
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| StorageError::DatabaseError("defaults table is empty".into()))?;
        Ok(serde_json::from_str(&row[0])?)
    }

    /// Mirrors `check_db`: the `views` and `files` tables must exist.
    async fn check_db(backend: &Backend) -> Result<()> {
        let rows = backend
            .execute("SELECT name FROM sqlite_master WHERE type='table'", &[])
            .await?;
        let tables: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        for required in [VIEWS_TABLE, FILES_TABLE] {
            if !tables.contains(&required) {
                return Err(StorageError::DatabaseError(format!(
                    "table {required} does not exist; delete and recreate the library"
                )));
            }
        }
        Ok(())
    }

    /// Mirrors `check_tables`: `files`'s column set must equal
    /// `valid_keys ∪ {src_path, src_inode}` exactly, order-insensitive.
    fn check_tables(ordered_columns: &[String], magic: &Magic) -> Result<()> {
        for mandatory in [SRC_PATH_KEY, SRC_INODE_KEY] {
            if !ordered_columns.iter().any(|c| c == mandatory) {
                return Err(StorageError::DatabaseError(format!(
                    "mandatory column {mandatory} missing from files table"
                )));
            }
        }
        for column in ordered_columns {
            if column == SRC_PATH_KEY || column == SRC_INODE_KEY {
                continue;
            }
            if !magic.valid_keys.iter().any(|k| k == column) {
                return Err(StorageError::DatabaseError(format!(
                    "column {column} is not a valid key for plugin {}",
                    magic.plugin
                )));
            }
        }
        for key in &magic.valid_keys {
            if !ordered_columns.iter().any(|c| c == key) {
                return Err(StorageError::DatabaseError(format!(
                    "valid key {key} has no corresponding files column"
                )));
            }
        }
        Ok(())
    }

    pub fn valid_keys(&self) -> &[String] {
        &self.magic.valid_keys
    }

    /// `add_entry` — insert with every valid-key column; on
    /// `UniqueViolation`, fall back to updating every column keyed on
    /// `src_path`. Empty values are coerced to `"Unknown"` first.
    pub async fn add_entry(
        &self,
        src_path: &str,
        src_inode: u64,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let mut values: Vec<Param> = vec![Param::from(src_path), Param::from(src_inode)];
        for key in &self.magic.valid_keys {
            let v = metadata.get(key).map(|s| s.as_str()).unwrap_or(UNKNOWN);
            values.push(Param::from(normalize_value(v)));
        }

        let placeholders = vec!["?"; 2 + self.magic.valid_keys.len()].join(", ");
        let insert_sql = format!("INSERT INTO {FILES_TABLE} VALUES ({placeholders})");
        match self.backend.execute(&insert_sql, &values).await {
            Ok(_) => {}
            Err(StorageError::UniqueViolation(_)) => {
                let mut set_clause = format!("{SRC_PATH_KEY} = ?, {SRC_INODE_KEY} = ?");
                for key in &self.magic.valid_keys {
                    set_clause.push_str(&format!(", `{key}` = ?"));
                }
                let update_sql =
                    format!("UPDATE {FILES_TABLE} SET {set_clause} WHERE {SRC_PATH_KEY} = ?");
                let mut update_values = values;
                update_values.push(Param::from(src_path));
                self.backend.execute(&update_sql, &update_values).await?;
            }
            Err(e) => return Err(e),
        }
        self.backend.commit().await
    }

    pub async fn remove_entry(&self, src_path: &str) -> Result<()> {
        self.backend
            .execute(
                &format!("DELETE FROM {FILES_TABLE} WHERE {SRC_PATH_KEY} = ?"),
                &[Param::from(src_path)],
            )
            .await?;
        self.backend.commit().await
    }

    /// `update_columns` — for matching dirtree keys, sets the columns whose
    /// values differ, constrained to rows matching the unchanged prefix.
    pub async fn update_columns(
        &self,
        dirtree: &[String],
        old_values: &[String],
        new_values: &[String],
    ) -> Result<()> {
        if old_values.len() != new_values.len() {
            return Err(StorageError::InvalidMetadata(
                "update_columns requires equal-length old/new tuples".into(),
            ));
        }
        if old_values == new_values {
            return Err(StorageError::InvalidMetadata(
                "update_columns requires old != new".into(),
            ));
        }

        let mut where_clauses = Vec::new();
        let mut where_params = Vec::new();
        let mut set_clauses = Vec::new();
        let mut set_params = Vec::new();
        for (i, old) in old_values.iter().enumerate() {
            let key = &dirtree[i];
            where_clauses.push(format!("`{key}` = ?"));
            where_params.push(Param::from(old.clone()));
            if old != &new_values[i] {
                set_clauses.push(format!("`{key}` = ?"));
                set_params.push(Param::from(new_values[i].clone()));
            }
        }
        let sql = format!(
            "UPDATE {FILES_TABLE} SET {} WHERE {}",
            set_clauses.join(", "),
            where_clauses.join(" AND ")
        );
        let mut params = set_params;
        params.extend(where_params);
        self.backend.execute(&sql, &params).await?;
        self.backend.commit().await
    }

    pub async fn get_by_src_path(&self, src_path: &str) -> Result<Option<CatalogRow>> {
        let cols = self.ordered_columns.join(", ");
        let rows = self
            .backend
            .execute(
                &format!("SELECT {cols} FROM {FILES_TABLE} WHERE {SRC_PATH_KEY} = ?"),
                &[Param::from(src_path)],
            )
            .await?;
        Ok(rows.first().map(|r| self.row_from_tuple(r)))
    }

    pub async fn get_by_inode(&self, inode: u64) -> Result<Option<CatalogRow>> {
        let cols = self.ordered_columns.join(", ");
        let rows = self
            .backend
            .execute(
                &format!("SELECT {cols} FROM {FILES_TABLE} WHERE {SRC_INODE_KEY} = ?"),
                &[Param::from(inode)],
            )
            .await?;
        Ok(rows.first().map(|r| self.row_from_tuple(r)))
    }

    pub async fn get_src_path_by_inode(&self, inode: u64) -> Result<Option<String>> {
        let rows = self
            .backend
            .execute(
                &format!("SELECT {SRC_PATH_KEY} FROM {FILES_TABLE} WHERE {SRC_INODE_KEY} = ?"),
                &[Param::from(inode)],
            )
            .await?;
        Ok(rows.first().map(|r| r[0].clone()))
    }

    pub async fn all_src_paths(&self) -> Result<Vec<String>> {
        let rows = self
            .backend
            .execute(&format!("SELECT {SRC_PATH_KEY} FROM {FILES_TABLE}"), &[])
            .await?;
        Ok(rows.into_iter().map(|r| r[0].clone()).collect())
    }

    /// Rows matching every ancestor column in `dirtree[..values.len()]`.
    pub async fn rows_matching(
        &self,
        dirtree: &[String],
        values: &[String],
    ) -> Result<Vec<(u64, String)>> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (i, v) in values.iter().enumerate() {
            clauses.push(format!("`{}` = ?", dirtree[i]));
            params.push(Param::from(v.clone()));
        }
        let where_sql = if clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            clauses.join(" AND ")
        };
        let rows = self
            .backend
            .execute(
                &format!(
                    "SELECT {SRC_INODE_KEY}, {SRC_PATH_KEY} FROM {FILES_TABLE} WHERE {where_sql}"
                ),
                &params,
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r[0].parse().unwrap_or(0), r[1].clone()))
            .collect())
    }

    /// `SELECT DISTINCT dirtree_columns FROM files` — the raw tuples the
    /// view engine folds into its tree.
    pub async fn distinct_dirtree_tuples(&self, dirtree: &[String]) -> Result<Vec<Vec<String>>> {
        let quoted: Vec<String> = dirtree.iter().map(|k| format!("`{k}`")).collect();
        let rows = self
            .backend
            .execute(
                &format!(
                    "SELECT DISTINCT {} FROM {FILES_TABLE}",
                    quoted.join(", ")
                ),
                &[],
            )
            .await?;
        Ok(rows)
    }

    pub async fn get_view(&self, name: &str) -> Result<Option<View>> {
        let rows = self
            .backend
            .execute(
                &format!("SELECT json FROM {VIEWS_TABLE} WHERE name = ?"),
                &[Param::from(name)],
            )
            .await?;
        match rows.first() {
            Some(r) => Ok(Some(serde_json::from_str(&r[0])?)),
            None => Ok(None),
        }
    }

    fn row_from_tuple(&self, tuple: &[String]) -> CatalogRow {
        let mut fields = HashMap::new();
        let mut src_path = String::new();
        let mut src_inode = 0u64;
        for (col, value) in self.ordered_columns.iter().zip(tuple.iter()) {
            match col.as_str() {
                SRC_PATH_KEY => src_path = value.clone(),
                SRC_INODE_KEY => src_inode = value.parse().unwrap_or(0),
                other => {
                    fields.insert(other.to_string(), value.clone());
                }
            }
        }
        CatalogRow {
            src_path,
            src_inode,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_magic() -> Magic {
        Magic {
            valid_keys: vec!["genre".into(), "artist".into()],
            default_view: View::new(
                vec!["genre".into(), "artist".into()],
                "%{title}".to_string(),
            ),
            plugin: "audio".into(),
        }
    }

    #[tokio::test]
    async fn add_entry_then_get_by_src_path_round_trips() {
        let catalog = Catalog::open(":memory:", Some(test_magic())).await.unwrap();
        let mut metadata = HashMap::new();
        metadata.insert("genre".into(), "Rock".into());
        metadata.insert("artist".into(), "Artist A".into());
        catalog.add_entry("/a.mp3", 42, &metadata).await.unwrap();

        let row = catalog.get_by_src_path("/a.mp3").await.unwrap().unwrap();
        assert_eq!(row.src_inode, 42);
        assert_eq!(row.get("genre"), "Rock");
    }

    #[tokio::test]
    async fn add_entry_missing_key_becomes_unknown() {
        let catalog = Catalog::open(":memory:", Some(test_magic())).await.unwrap();
        let metadata = HashMap::new();
        catalog.add_entry("/b.mp3", 1, &metadata).await.unwrap();
        let row = catalog.get_by_src_path("/b.mp3").await.unwrap().unwrap();
        assert_eq!(row.get("genre"), UNKNOWN);
    }

    #[tokio::test]
    async fn add_entry_twice_updates_in_place() {
        let catalog = Catalog::open(":memory:", Some(test_magic())).await.unwrap();
        let mut metadata = HashMap::new();
        metadata.insert("genre".into(), "Rock".into());
        catalog.add_entry("/a.mp3", 1, &metadata).await.unwrap();
        metadata.insert("genre".into(), "Jazz".into());
        catalog.add_entry("/a.mp3", 1, &metadata).await.unwrap();

        let row = catalog.get_by_src_path("/a.mp3").await.unwrap().unwrap();
        assert_eq!(row.get("genre"), "Jazz");
        assert_eq!(catalog.all_src_paths().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_columns_rewrites_matching_rows() {
        let catalog = Catalog::open(":memory:", Some(test_magic())).await.unwrap();
        let mut metadata = HashMap::new();
        metadata.insert("genre".into(), "Rock".into());
        metadata.insert("artist".into(), "Old Artist".into());
        catalog.add_entry("/a.mp3", 1, &metadata).await.unwrap();

        let dirtree = vec!["genre".to_string(), "artist".to_string()];
        catalog
            .update_columns(
                &dirtree,
                &["Rock".to_string(), "Old Artist".to_string()],
                &["Rock".to_string(), "New Artist".to_string()],
            )
            .await
            .unwrap();

        let row = catalog.get_by_src_path("/a.mp3").await.unwrap().unwrap();
        assert_eq!(row.get("artist"), "New Artist");
    }
}
