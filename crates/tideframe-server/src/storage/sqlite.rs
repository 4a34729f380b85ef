//! SQLite storage backend.
//!
//! Each backend instance owns one connection; instances on the same
//! database path share the per-database readers/writers lock. Writes run
//! inside a transaction that commits on scope exit; reads take the shared
//! side of the lock.
//!
//! The schema carries a monotonically increasing `version` row. On open,
//! migration scripts from the configured directory whose file name parses
//! to an integer ≥ the current version are applied in ascending order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};
use tideframe_core::store::{
    GroupAclRow, GroupRow, PropertyRow, RosterGroupRow, RosterUserRow, UserAclRow, UserRow,
};

use super::{ProtocolStorage, StorageError, StorageFactory, lock};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    gecos TEXT NOT NULL,
    password TEXT,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);

CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    topic TEXT,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);

CREATE TABLE IF NOT EXISTS user_acls (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL REFERENCES users(name) ON DELETE CASCADE,
    acl TEXT NOT NULL,
    setter TEXT,
    reason TEXT,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    UNIQUE (name, acl)
);

CREATE TABLE IF NOT EXISTS group_acls (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL REFERENCES groups(name) ON DELETE CASCADE,
    target TEXT NOT NULL,
    acl TEXT NOT NULL,
    setter TEXT,
    reason TEXT,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    UNIQUE (name, target, acl)
);

CREATE TABLE IF NOT EXISTS user_properties (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL REFERENCES users(name) ON DELETE CASCADE,
    property TEXT NOT NULL,
    value TEXT,
    setter TEXT,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    UNIQUE (name, property)
);

CREATE TABLE IF NOT EXISTS group_properties (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL REFERENCES groups(name) ON DELETE CASCADE,
    property TEXT NOT NULL,
    value TEXT,
    setter TEXT,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    UNIQUE (name, property)
);

CREATE TABLE IF NOT EXISTS roster_users (
    id INTEGER PRIMARY KEY,
    owner TEXT NOT NULL REFERENCES users(name) ON DELETE CASCADE,
    target TEXT NOT NULL,
    alias TEXT,
    group_tag TEXT,
    pending INTEGER NOT NULL DEFAULT 0,
    blocked INTEGER NOT NULL DEFAULT 0,
    UNIQUE (owner, target)
);

CREATE TABLE IF NOT EXISTS roster_groups (
    id INTEGER PRIMARY KEY,
    owner TEXT NOT NULL REFERENCES users(name) ON DELETE CASCADE,
    target TEXT NOT NULL,
    alias TEXT,
    group_tag TEXT,
    UNIQUE (owner, target)
);

INSERT INTO version (version)
    SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM version);
"#;

const GET_USER: &str = "SELECT name, gecos, password, timestamp FROM users WHERE name = ?1";
const CREATE_USER: &str = "INSERT INTO users (name, gecos, password) VALUES (?1, ?2, ?3)";
const SET_USER: &str =
    "UPDATE users SET gecos = IFNULL(?1, gecos), password = IFNULL(?2, password) WHERE name = ?3";
const DEL_USER: &str = "DELETE FROM users WHERE name = ?1";

const GET_GROUP: &str = "SELECT name, topic, timestamp FROM groups WHERE name = ?1";
const CREATE_GROUP: &str = "INSERT INTO groups (name, topic) VALUES (?1, ?2)";
const SET_GROUP: &str = "UPDATE groups SET topic = ?1 WHERE name = ?2";
const DEL_GROUP: &str = "DELETE FROM groups WHERE name = ?1";

const GET_USER_ACL: &str =
    "SELECT acl, setter, reason, timestamp FROM user_acls WHERE name = ?1 ORDER BY acl";
const CREATE_USER_ACL: &str =
    "INSERT OR REPLACE INTO user_acls (name, acl, setter, reason) VALUES (?1, ?2, ?3, ?4)";
const DEL_USER_ACL: &str = "DELETE FROM user_acls WHERE name = ?1 AND acl = ?2";
const DEL_USER_ACL_ALL: &str = "DELETE FROM user_acls WHERE name = ?1";

const GET_GROUP_ACL: &str =
    "SELECT acl, target, setter, reason, timestamp FROM group_acls WHERE name = ?1 ORDER BY target, acl";
const CREATE_GROUP_ACL: &str =
    "INSERT OR REPLACE INTO group_acls (name, target, acl, setter, reason) VALUES (?1, ?2, ?3, ?4, ?5)";
const DEL_GROUP_ACL: &str = "DELETE FROM group_acls WHERE name = ?1 AND target = ?2 AND acl = ?3";
const DEL_GROUP_ACL_ALL: &str = "DELETE FROM group_acls WHERE name = ?1";

const GET_USER_PROPERTY: &str =
    "SELECT property, value, setter, timestamp FROM user_properties WHERE name = ?1 ORDER BY property";
const SET_USER_PROPERTY: &str =
    "INSERT OR REPLACE INTO user_properties (name, property, value, setter) VALUES (?1, ?2, ?3, ?4)";
const DEL_USER_PROPERTY: &str = "DELETE FROM user_properties WHERE name = ?1 AND property = ?2";

const GET_GROUP_PROPERTY: &str =
    "SELECT property, value, setter, timestamp FROM group_properties WHERE name = ?1 ORDER BY property";
const SET_GROUP_PROPERTY: &str =
    "INSERT OR REPLACE INTO group_properties (name, property, value, setter) VALUES (?1, ?2, ?3, ?4)";
const DEL_GROUP_PROPERTY: &str = "DELETE FROM group_properties WHERE name = ?1 AND property = ?2";

const GET_ROSTER_USER: &str =
    "SELECT target, alias, group_tag, pending, blocked FROM roster_users WHERE owner = ?1 ORDER BY target";
const CREATE_ROSTER_USER: &str =
    "INSERT OR REPLACE INTO roster_users (owner, target, alias, group_tag, pending) VALUES (?1, ?2, ?3, ?4, ?5)";
const SET_ROSTER_USER: &str = "UPDATE roster_users SET alias = IFNULL(?1, alias), \
     group_tag = IFNULL(?2, group_tag), pending = IFNULL(?3, pending), \
     blocked = IFNULL(?4, blocked) WHERE owner = ?5 AND target = ?6";
const DEL_ROSTER_USER: &str = "DELETE FROM roster_users WHERE owner = ?1 AND target = ?2";

const GET_ROSTER_GROUP: &str =
    "SELECT target, alias, group_tag FROM roster_groups WHERE owner = ?1 ORDER BY target";
const CREATE_ROSTER_GROUP: &str =
    "INSERT OR REPLACE INTO roster_groups (owner, target, alias, group_tag) VALUES (?1, ?2, ?3, ?4)";
const SET_ROSTER_GROUP: &str = "UPDATE roster_groups SET alias = IFNULL(?1, alias), \
     group_tag = IFNULL(?2, group_tag) WHERE owner = ?3 AND target = ?4";
const DEL_ROSTER_GROUP: &str = "DELETE FROM roster_groups WHERE owner = ?1 AND target = ?2";

/// Factory opening SQLite backends on one database path.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    path: PathBuf,
    migrations: Option<PathBuf>,
}

impl SqliteFactory {
    /// A factory for the given database file.
    pub fn new(path: &Path, migrations: Option<&Path>) -> Self {
        Self { path: path.to_path_buf(), migrations: migrations.map(Path::to_path_buf) }
    }
}

impl StorageFactory for SqliteFactory {
    fn open(&self) -> Result<Box<dyn ProtocolStorage>, StorageError> {
        Ok(Box::new(SqliteStorage::open(&self.path, self.migrations.as_deref())?))
    }
}

/// One SQLite connection plus the shared per-database lock.
pub struct SqliteStorage {
    conn: Connection,
    lock: Arc<lock::DatabaseLock>,
}

impl SqliteStorage {
    /// Open the database, initializing the schema and applying pending
    /// migrations.
    pub fn open(path: &Path, migrations: Option<&Path>) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db_lock = lock::for_database(path);
        let mut storage = Self { conn, lock: db_lock };
        storage.initialize(migrations)?;
        Ok(storage)
    }

    fn initialize(&mut self, migrations: Option<&Path>) -> Result<(), StorageError> {
        let _guard = self.lock.write();
        self.conn.execute_batch(SCHEMA)?;

        let Some(dir) = migrations else { return Ok(()) };
        if !dir.is_dir() {
            return Ok(());
        }

        let version: i64 =
            self.conn.query_row("SELECT version FROM version", [], |row| row.get(0))?;
        tracing::info!(version, "schema at version");

        let mut scripts: Vec<(i64, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            if let Ok(ver) = stem.parse::<i64>() {
                scripts.push((ver, path));
            }
        }
        scripts.sort();

        let mut latest = version;
        for (ver, path) in scripts {
            if ver < version {
                continue;
            }
            tracing::info!(ver, "upgrading schema");
            let sql = std::fs::read_to_string(&path)?;
            let tx = self.conn.transaction()?;
            tx.execute_batch(&sql)?;
            tx.commit()?;
            latest = ver + 1;
        }

        if latest != version {
            self.conn.execute("UPDATE version SET version = ?1", params![latest])?;
        }
        Ok(())
    }

    fn modify(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<(), rusqlite::Error>,
    ) -> Result<(), StorageError> {
        let _guard = self.lock.write();
        let tx = self.conn.transaction()?;
        f(&tx)?;
        tx.commit()?;
        Ok(())
    }
}

impl ProtocolStorage for SqliteStorage {
    fn user_add(&mut self, name: &str, gecos: &str, password: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(CREATE_USER, params![name, gecos, password]).map(|_| ()))
    }

    fn user_get(&mut self, name: &str) -> Result<Option<UserRow>, StorageError> {
        let _guard = self.lock.read();
        let row = self
            .conn
            .query_row(GET_USER, params![name], |row| {
                Ok(UserRow {
                    name: row.get(0)?,
                    gecos: row.get(1)?,
                    password: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    fn user_set(
        &mut self,
        name: &str,
        gecos: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(SET_USER, params![gecos, password, name]).map(|_| ()))
    }

    fn user_delete(&mut self, name: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_USER, params![name]).map(|_| ()))
    }

    fn group_add(&mut self, name: &str, topic: Option<&str>) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(CREATE_GROUP, params![name, topic]).map(|_| ()))
    }

    fn group_get(&mut self, name: &str) -> Result<Option<GroupRow>, StorageError> {
        let _guard = self.lock.read();
        let row = self
            .conn
            .query_row(GET_GROUP, params![name], |row| {
                Ok(GroupRow { name: row.get(0)?, topic: row.get(1)?, timestamp: row.get(2)? })
            })
            .optional()?;
        Ok(row)
    }

    fn group_set(&mut self, name: &str, topic: Option<&str>) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(SET_GROUP, params![topic, name]).map(|_| ()))
    }

    fn group_delete(&mut self, name: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_GROUP, params![name]).map(|_| ()))
    }

    fn user_acl_all(&mut self, name: &str) -> Result<Vec<UserAclRow>, StorageError> {
        let _guard = self.lock.read();
        let mut stmt = self.conn.prepare(GET_USER_ACL)?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok(UserAclRow {
                    acl: row.get(0)?,
                    setter: row.get(1)?,
                    reason: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn user_acl_add(
        &mut self,
        name: &str,
        acl: &str,
        setter: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), StorageError> {
        self.modify(|tx| {
            tx.execute(CREATE_USER_ACL, params![name, acl, setter, reason]).map(|_| ())
        })
    }

    fn user_acl_del(&mut self, name: &str, acl: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_USER_ACL, params![name, acl]).map(|_| ()))
    }

    fn user_acl_del_all(&mut self, name: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_USER_ACL_ALL, params![name]).map(|_| ()))
    }

    fn group_acl_all(&mut self, name: &str) -> Result<Vec<GroupAclRow>, StorageError> {
        let _guard = self.lock.read();
        let mut stmt = self.conn.prepare(GET_GROUP_ACL)?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok(GroupAclRow {
                    acl: row.get(0)?,
                    target: row.get(1)?,
                    setter: row.get(2)?,
                    reason: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn group_acl_add(
        &mut self,
        group: &str,
        user: &str,
        acl: &str,
        setter: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), StorageError> {
        self.modify(|tx| {
            tx.execute(CREATE_GROUP_ACL, params![group, user, acl, setter, reason]).map(|_| ())
        })
    }

    fn group_acl_del(&mut self, group: &str, user: &str, acl: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_GROUP_ACL, params![group, user, acl]).map(|_| ()))
    }

    fn group_acl_del_all(&mut self, group: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_GROUP_ACL_ALL, params![group]).map(|_| ()))
    }

    fn user_property_all(&mut self, name: &str) -> Result<Vec<PropertyRow>, StorageError> {
        let _guard = self.lock.read();
        let mut stmt = self.conn.prepare(GET_USER_PROPERTY)?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok(PropertyRow {
                    property: row.get(0)?,
                    value: row.get(1)?,
                    setter: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn user_property_set(
        &mut self,
        name: &str,
        property: &str,
        value: Option<&str>,
        setter: Option<&str>,
    ) -> Result<(), StorageError> {
        self.modify(|tx| {
            tx.execute(SET_USER_PROPERTY, params![name, property, value, setter]).map(|_| ())
        })
    }

    fn user_property_del(&mut self, name: &str, property: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_USER_PROPERTY, params![name, property]).map(|_| ()))
    }

    fn group_property_all(&mut self, name: &str) -> Result<Vec<PropertyRow>, StorageError> {
        let _guard = self.lock.read();
        let mut stmt = self.conn.prepare(GET_GROUP_PROPERTY)?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok(PropertyRow {
                    property: row.get(0)?,
                    value: row.get(1)?,
                    setter: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn group_property_set(
        &mut self,
        group: &str,
        property: &str,
        value: Option<&str>,
        setter: Option<&str>,
    ) -> Result<(), StorageError> {
        self.modify(|tx| {
            tx.execute(SET_GROUP_PROPERTY, params![group, property, value, setter]).map(|_| ())
        })
    }

    fn group_property_del(&mut self, group: &str, property: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_GROUP_PROPERTY, params![group, property]).map(|_| ()))
    }

    fn roster_user_all(&mut self, owner: &str) -> Result<Vec<RosterUserRow>, StorageError> {
        let _guard = self.lock.read();
        let mut stmt = self.conn.prepare(GET_ROSTER_USER)?;
        let rows = stmt
            .query_map(params![owner], |row| {
                Ok(RosterUserRow {
                    target: row.get(0)?,
                    alias: row.get(1)?,
                    group_tag: row.get(2)?,
                    pending: row.get(3)?,
                    blocked: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn roster_user_add(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
        pending: bool,
    ) -> Result<(), StorageError> {
        self.modify(|tx| {
            tx.execute(CREATE_ROSTER_USER, params![owner, target, alias, group_tag, pending])
                .map(|_| ())
        })
    }

    fn roster_user_set(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
        pending: Option<bool>,
        blocked: Option<bool>,
    ) -> Result<(), StorageError> {
        self.modify(|tx| {
            tx.execute(SET_ROSTER_USER, params![alias, group_tag, pending, blocked, owner, target])
                .map(|_| ())
        })
    }

    fn roster_user_del(&mut self, owner: &str, target: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_ROSTER_USER, params![owner, target]).map(|_| ()))
    }

    fn roster_group_all(&mut self, owner: &str) -> Result<Vec<RosterGroupRow>, StorageError> {
        let _guard = self.lock.read();
        let mut stmt = self.conn.prepare(GET_ROSTER_GROUP)?;
        let rows = stmt
            .query_map(params![owner], |row| {
                Ok(RosterGroupRow {
                    target: row.get(0)?,
                    alias: row.get(1)?,
                    group_tag: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn roster_group_add(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
    ) -> Result<(), StorageError> {
        self.modify(|tx| {
            tx.execute(CREATE_ROSTER_GROUP, params![owner, target, alias, group_tag]).map(|_| ())
        })
    }

    fn roster_group_set(
        &mut self,
        owner: &str,
        target: &str,
        alias: Option<&str>,
        group_tag: Option<&str>,
    ) -> Result<(), StorageError> {
        self.modify(|tx| {
            tx.execute(SET_ROSTER_GROUP, params![alias, group_tag, owner, target]).map(|_| ())
        })
    }

    fn roster_group_del(&mut self, owner: &str, target: &str) -> Result<(), StorageError> {
        self.modify(|tx| tx.execute(DEL_ROSTER_GROUP, params![owner, target]).map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = SqliteStorage::open(&dir.path().join("store.db"), None).expect("open");
        (dir, storage)
    }

    #[test]
    fn user_round_trip() {
        let (_dir, mut storage) = open_temp();

        storage.user_add("alice", "Alice", "$argon2id$fake").unwrap();
        let row = storage.user_get("alice").unwrap().unwrap();
        assert_eq!(row.name, "alice");
        assert_eq!(row.gecos, "Alice");
        assert_eq!(row.password.as_deref(), Some("$argon2id$fake"));
        assert!(row.timestamp > 0);

        storage.user_set("alice", Some("Alice L."), None).unwrap();
        let row = storage.user_get("alice").unwrap().unwrap();
        assert_eq!(row.gecos, "Alice L.");
        assert_eq!(row.password.as_deref(), Some("$argon2id$fake"));

        storage.user_delete("alice").unwrap();
        assert!(storage.user_get("alice").unwrap().is_none());
    }

    #[test]
    fn duplicate_user_is_a_database_error() {
        let (_dir, mut storage) = open_temp();
        storage.user_add("alice", "Alice", "$h").unwrap();
        assert!(matches!(
            storage.user_add("alice", "Alice", "$h"),
            Err(StorageError::Database(_))
        ));
    }

    #[test]
    fn group_acl_rows_round_trip() {
        let (_dir, mut storage) = open_temp();
        storage.group_add("#room", None).unwrap();
        storage.group_acl_add("#room", "alice", "op", Some("bob"), Some("earned it")).unwrap();
        storage.group_acl_add("#room", "alice", "grant:*", None, None).unwrap();

        let rows = storage.group_acl_all("#room").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.target == "alice"));

        storage.group_acl_del("#room", "alice", "op").unwrap();
        assert_eq!(storage.group_acl_all("#room").unwrap().len(), 1);
    }

    #[test]
    fn deleting_a_group_cascades_to_its_rows() {
        let (_dir, mut storage) = open_temp();
        storage.group_add("#room", Some("hi")).unwrap();
        storage.group_acl_add("#room", "alice", "op", None, None).unwrap();
        storage.group_property_set("#room", "private", None, None).unwrap();

        storage.group_delete("#room").unwrap();
        assert!(storage.group_acl_all("#room").unwrap().is_empty());
        assert!(storage.group_property_all("#room").unwrap().is_empty());
    }

    #[test]
    fn roster_rows_round_trip() {
        let (_dir, mut storage) = open_temp();
        storage.user_add("alice", "Alice", "$h").unwrap();
        storage.roster_user_add("alice", "bob", Some("bobby"), None, true).unwrap();
        storage.roster_group_add("alice", "#room", None, Some("work")).unwrap();

        storage.roster_user_set("alice", "bob", None, None, Some(false), Some(true)).unwrap();
        let rows = storage.roster_user_all("alice").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].alias.as_deref(), Some("bobby"));
        assert!(!rows[0].pending);
        assert!(rows[0].blocked);

        let groups = storage.roster_group_all("alice").unwrap();
        assert_eq!(groups[0].group_tag.as_deref(), Some("work"));
    }

    #[test]
    fn migrations_apply_in_order_and_bump_version() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("store.db");
        let migrations = dir.path().join("upgrade");
        std::fs::create_dir(&migrations).unwrap();
        std::fs::write(
            migrations.join("2.sql"),
            "CREATE TABLE IF NOT EXISTS two (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        std::fs::write(
            migrations.join("3.sql"),
            "CREATE TABLE IF NOT EXISTS three (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        std::fs::write(migrations.join("notes.txt"), "not a migration").unwrap();

        let storage = SqliteStorage::open(&db, Some(&migrations)).unwrap();
        let version: i64 =
            storage.conn.query_row("SELECT version FROM version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, 4);

        // Tables from both scripts exist.
        storage.conn.execute("INSERT INTO two DEFAULT VALUES", []).unwrap();
        storage.conn.execute("INSERT INTO three DEFAULT VALUES", []).unwrap();

        // Re-opening applies nothing new.
        drop(storage);
        let storage = SqliteStorage::open(&db, Some(&migrations)).unwrap();
        let version: i64 =
            storage.conn.query_row("SELECT version FROM version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, 4);
    }
}
