use anyhow::Result;
use rusqlite::{Connection, Transaction};
use std::path::Path;

pub mod groups;
pub mod memberships;
pub mod names;
pub mod users;

use names::NameMap;
use rusqlite::types::Value;

pub(crate) fn push_text(
    attrs: &mut Vec<(&'static str, Value)>,
    field: &'static str,
    value: &Option<String>,
) {
    if let Some(v) = value {
        attrs.push((field, Value::Text(v.clone())));
    }
}

pub(crate) fn push_int(
    attrs: &mut Vec<(&'static str, Value)>,
    field: &'static str,
    value: Option<i64>,
) {
    if let Some(v) = value {
        attrs.push((field, Value::Integer(v)));
    }
}

pub struct Database {
    conn: Connection,
}

const CURRENT_SCHEMA_VERSION: i32 = 1;

impl Database {
    pub fn open(path: &Path, names: &NameMap) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        conn.execute("PRAGMA foreign_keys = ON", ())?;

        Self::init_schema(&conn, names)?;

        Ok(Database { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory(names: &NameMap) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn, names)?;
        Ok(Database { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// One transaction per workflow; dropping it without commit is the
    /// rollback path.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, rusqlite::Error> {
        self.conn.transaction()
    }

    fn init_schema(conn: &Connection, names: &NameMap) -> Result<()> {
        // Create schema version table if it doesn't exist
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL,
                updated TEXT NOT NULL,
                PRIMARY KEY (version)
            )",
            (),
        )?;

        // Get current schema version
        let version = match conn.query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        ) {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                conn.execute(
                    "INSERT INTO schema_version (version, updated) VALUES (0, datetime('now'))",
                    [],
                )?;
                0
            }
            Err(e) => return Err(e.into()),
        };

        if version < CURRENT_SCHEMA_VERSION {
            Self::migrate_schema(conn, names, version)?;
        }

        Ok(())
    }

    fn migrate_schema(conn: &Connection, names: &NameMap, from_version: i32) -> Result<()> {
        match from_version {
            0 => {
                // uid and gid deliberately carry no UNIQUE constraint:
                // --non-unique legally creates duplicates.
                conn.execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS \"{user}\" (
                            \"{username}\" TEXT NOT NULL UNIQUE,
                            \"{uid}\" INTEGER,
                            \"{gid}\" INTEGER,
                            \"{gecos}\" TEXT,
                            \"{homedir}\" TEXT,
                            \"{shell}\" TEXT,
                            \"{password}\" TEXT,
                            \"{lstchg}\" INTEGER,
                            \"{mini}\" INTEGER,
                            \"{maxi}\" INTEGER,
                            \"{warn}\" INTEGER,
                            \"{inact}\" INTEGER,
                            \"{expire}\" INTEGER,
                            \"{flag}\" INTEGER
                        )",
                        user = names.table("user"),
                        username = names.field("username"),
                        uid = names.field("uid"),
                        gid = names.field("gid"),
                        gecos = names.field("gecos"),
                        homedir = names.field("homedir"),
                        shell = names.field("shell"),
                        password = names.field("password"),
                        lstchg = names.field("lstchg"),
                        mini = names.field("mini"),
                        maxi = names.field("maxi"),
                        warn = names.field("warn"),
                        inact = names.field("inact"),
                        expire = names.field("expire"),
                        flag = names.field("flag"),
                    ),
                    (),
                )?;

                conn.execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS \"{group}\" (
                            \"{name}\" TEXT NOT NULL UNIQUE,
                            \"{gid}\" INTEGER,
                            \"{password}\" TEXT
                        )",
                        group = names.table("group"),
                        name = names.field("name"),
                        gid = names.field("gid"),
                        password = names.field("password"),
                    ),
                    (),
                )?;

                conn.execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS \"{grouplist}\" (
                            \"{username}\" TEXT NOT NULL,
                            \"{gid}\" INTEGER NOT NULL
                        )",
                        grouplist = names.table("grouplist"),
                        username = names.field("username"),
                        gid = names.field("gid"),
                    ),
                    (),
                )?;

                conn.execute(
                    "INSERT INTO schema_version (version, updated) VALUES (1, datetime('now'))",
                    [],
                )?;
            }
            // Future migrations can be added here
            _ => {}
        }
        Ok(())
    }
}
