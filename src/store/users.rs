use rusqlite::{Connection, Row, params, params_from_iter, types::Value};

use super::names::NameMap;
use super::{push_int, push_text};
use crate::error::ProvisionError;

/// One row of the user table. Only `username` is ever required; every
/// other attribute may be absent, in which case it is neither written on
/// insert nor touched on update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRecord {
    pub username: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub gecos: Option<String>,
    pub homedir: Option<String>,
    pub shell: Option<String>,
    pub password: Option<String>,
    pub lstchg: Option<i64>,
    pub mini: Option<i64>,
    pub maxi: Option<i64>,
    pub warn: Option<i64>,
    pub inact: Option<i64>,
    pub expire: Option<i64>,
    pub flag: Option<i64>,
}

impl UserRecord {
    /// Present attributes in schema order as (logical field, value).
    fn attrs(&self) -> Vec<(&'static str, Value)> {
        let mut attrs = Vec::new();
        push_text(&mut attrs, "username", &self.username);
        push_int(&mut attrs, "uid", self.uid.map(i64::from));
        push_int(&mut attrs, "gid", self.gid.map(i64::from));
        push_text(&mut attrs, "gecos", &self.gecos);
        push_text(&mut attrs, "homedir", &self.homedir);
        push_text(&mut attrs, "shell", &self.shell);
        push_text(&mut attrs, "password", &self.password);
        push_int(&mut attrs, "lstchg", self.lstchg);
        push_int(&mut attrs, "mini", self.mini);
        push_int(&mut attrs, "maxi", self.maxi);
        push_int(&mut attrs, "warn", self.warn);
        push_int(&mut attrs, "inact", self.inact);
        push_int(&mut attrs, "expire", self.expire);
        push_int(&mut attrs, "flag", self.flag);
        attrs
    }
}

pub struct UserStore<'a> {
    conn: &'a Connection,
    names: &'a NameMap,
}

impl<'a> UserStore<'a> {
    pub fn new(conn: &'a Connection, names: &'a NameMap) -> Self {
        UserStore { conn, names }
    }

    fn table(&self) -> &str {
        self.names.table("user")
    }

    fn row_to_record(&self, row: &Row<'_>) -> rusqlite::Result<UserRecord> {
        let n = self.names;
        let int = |field: &str| -> rusqlite::Result<Option<i64>> { row.get(n.field(field)) };
        Ok(UserRecord {
            username: row.get(n.field("username"))?,
            uid: int("uid")?.map(|v| v as u32),
            gid: int("gid")?.map(|v| v as u32),
            gecos: row.get(n.field("gecos"))?,
            homedir: row.get(n.field("homedir"))?,
            shell: row.get(n.field("shell"))?,
            password: row.get(n.field("password"))?,
            lstchg: int("lstchg")?,
            mini: int("mini")?,
            maxi: int("maxi")?,
            warn: int("warn")?,
            inact: int("inact")?,
            expire: int("expire")?,
            flag: int("flag")?,
        })
    }

    fn get_by(
        &self,
        field: &'static str,
        value: Value,
        shown: String,
    ) -> Result<UserRecord, ProvisionError> {
        let sql = format!(
            "SELECT * FROM \"{}\" WHERE \"{}\" = ?1 LIMIT 1",
            self.table(),
            self.names.field(field)
        );
        match self
            .conn
            .query_row(&sql, params![value], |row| self.row_to_record(row))
        {
            Ok(record) => Ok(record),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(ProvisionError::RecordNotFound {
                entity: "user",
                key: field,
                value: shown,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_by_uid(&self, uid: u32) -> Result<UserRecord, ProvisionError> {
        self.get_by("uid", Value::Integer(uid as i64), uid.to_string())
    }

    pub fn get_by_username(&self, username: &str) -> Result<UserRecord, ProvisionError> {
        self.get_by(
            "username",
            Value::Text(username.to_string()),
            username.to_string(),
        )
    }

    pub fn add(&self, record: &UserRecord) -> Result<(), ProvisionError> {
        let attrs = record.attrs();
        if attrs.is_empty() {
            return Err(ProvisionError::EmptyWrite { entity: "user" });
        }
        let columns = attrs
            .iter()
            .map(|(field, _)| format!("\"{}\"", self.names.field(field)))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=attrs.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO \"{}\" ({columns}) VALUES ({placeholders})",
            self.table()
        );
        let values = attrs.into_iter().map(|(_, value)| value);
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    /// Delete a user row. Missing rows are an error, so the row is
    /// looked up first.
    pub fn remove(&self, username: &str) -> Result<(), ProvisionError> {
        self.get_by_username(username)?;
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1",
            self.table(),
            self.names.field("username")
        );
        self.conn.execute(&sql, params![username])?;
        Ok(())
    }

    /// Apply the present attributes of `delta` to the row keyed by
    /// `username_old`. Writing nothing is a no-op, not an error.
    pub fn modify(&self, username_old: &str, delta: &UserRecord) -> Result<(), ProvisionError> {
        let attrs = delta.attrs();
        if attrs.is_empty() {
            return Ok(());
        }
        self.get_by_username(username_old)?;
        let assignments = attrs
            .iter()
            .enumerate()
            .map(|(i, (field, _))| format!("\"{}\" = ?{}", self.names.field(field), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE \"{}\" SET {assignments} WHERE \"{}\" = ?{}",
            self.table(),
            self.names.field("username"),
            attrs.len() + 1
        );
        let values = attrs
            .into_iter()
            .map(|(_, value)| value)
            .chain(std::iter::once(Value::Text(username_old.to_string())));
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    /// Move every user whose primary group is `gid` over to `gid_new`.
    pub fn change_gid_all(&self, gid: u32, gid_new: u32) -> Result<usize, ProvisionError> {
        let sql = format!(
            "UPDATE \"{}\" SET \"{gid_field}\" = ?1 WHERE \"{gid_field}\" = ?2",
            self.table(),
            gid_field = self.names.field("gid")
        );
        let changed = self
            .conn
            .execute(&sql, params![gid_new as i64, gid as i64])?;
        Ok(changed)
    }

    /// Number of users with `gid` as their primary group.
    pub fn count_with_gid(&self, gid: u32) -> Result<usize, ProvisionError> {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" = ?1",
            self.table(),
            self.names.field("gid")
        );
        let count: i64 = self.conn.query_row(&sql, params![gid as i64], |row| row.get(0))?;
        Ok(count as usize)
    }
}
