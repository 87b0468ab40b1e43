use rusqlite::{Connection, Row, params, params_from_iter, types::Value};

use super::names::NameMap;
use super::{push_int, push_text};
use crate::error::ProvisionError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupRecord {
    pub name: Option<String>,
    pub gid: Option<u32>,
    pub password: Option<String>,
}

impl GroupRecord {
    fn attrs(&self) -> Vec<(&'static str, Value)> {
        let mut attrs = Vec::new();
        push_text(&mut attrs, "name", &self.name);
        push_int(&mut attrs, "gid", self.gid.map(i64::from));
        push_text(&mut attrs, "password", &self.password);
        attrs
    }
}

pub struct GroupStore<'a> {
    conn: &'a Connection,
    names: &'a NameMap,
}

impl<'a> GroupStore<'a> {
    pub fn new(conn: &'a Connection, names: &'a NameMap) -> Self {
        GroupStore { conn, names }
    }

    fn table(&self) -> &str {
        self.names.table("group")
    }

    fn row_to_record(&self, row: &Row<'_>) -> rusqlite::Result<GroupRecord> {
        Ok(GroupRecord {
            name: row.get(self.names.field("name"))?,
            gid: row
                .get::<_, Option<i64>>(self.names.field("gid"))?
                .map(|v| v as u32),
            password: row.get(self.names.field("password"))?,
        })
    }

    fn get_by(
        &self,
        field: &'static str,
        value: Value,
        shown: String,
    ) -> Result<GroupRecord, ProvisionError> {
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
                entity: "group",
                key: field,
                value: shown,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Result<GroupRecord, ProvisionError> {
        self.get_by("name", Value::Text(name.to_string()), name.to_string())
    }

    pub fn get_by_gid(&self, gid: u32) -> Result<GroupRecord, ProvisionError> {
        self.get_by("gid", Value::Integer(gid as i64), gid.to_string())
    }

    pub fn add(&self, record: &GroupRecord) -> Result<(), ProvisionError> {
        let attrs = record.attrs();
        if attrs.is_empty() {
            return Err(ProvisionError::EmptyWrite { entity: "group" });
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

    /// Delete a group row by gid. Missing rows are an error.
    pub fn remove_by_gid(&self, gid: u32) -> Result<(), ProvisionError> {
        self.get_by_gid(gid)?;
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1",
            self.table(),
            self.names.field("gid")
        );
        self.conn.execute(&sql, params![gid as i64])?;
        Ok(())
    }

    /// Apply the present attributes of `delta` to the row keyed by
    /// `name_old`. Writing nothing is a no-op.
    pub fn modify(&self, name_old: &str, delta: &GroupRecord) -> Result<(), ProvisionError> {
        let attrs = delta.attrs();
        if attrs.is_empty() {
            return Ok(());
        }
        self.get_by_name(name_old)?;
        let assignments = attrs
            .iter()
            .enumerate()
            .map(|(i, (field, _))| format!("\"{}\" = ?{}", self.names.field(field), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE \"{}\" SET {assignments} WHERE \"{}\" = ?{}",
            self.table(),
            self.names.field("name"),
            attrs.len() + 1
        );
        let values = attrs
            .into_iter()
            .map(|(_, value)| value)
            .chain(std::iter::once(Value::Text(name_old.to_string())));
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn group(name: &str, gid: u32) -> GroupRecord {
        GroupRecord {
            name: Some(name.to_string()),
            gid: Some(gid),
            password: None,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let groups = GroupStore::new(db.conn(), &names);

        groups.add(&group("testgroup", 1000)).unwrap();

        let by_name = groups.get_by_name("testgroup").unwrap();
        assert_eq!(by_name.gid, Some(1000));
        assert_eq!(by_name.password, None);
        let by_gid = groups.get_by_gid(1000).unwrap();
        assert_eq!(by_gid.name.as_deref(), Some("testgroup"));
    }

    #[test]
    fn missing_group_reports_not_found() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let groups = GroupStore::new(db.conn(), &names);

        assert!(matches!(
            groups.get_by_name("ghost").unwrap_err(),
            ProvisionError::RecordNotFound { entity: "group", key: "name", .. }
        ));
        assert!(matches!(
            groups.remove_by_gid(4711).unwrap_err(),
            ProvisionError::RecordNotFound { entity: "group", key: "gid", .. }
        ));
    }

    #[test]
    fn empty_insert_is_rejected() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let groups = GroupStore::new(db.conn(), &names);

        assert!(matches!(
            groups.add(&GroupRecord::default()).unwrap_err(),
            ProvisionError::EmptyWrite { entity: "group" }
        ));
    }

    #[test]
    fn modify_renames_and_keeps_other_attributes() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let groups = GroupStore::new(db.conn(), &names);

        groups.add(&group("staff", 1200)).unwrap();
        groups
            .modify(
                "staff",
                &GroupRecord {
                    name: Some("team".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(groups.get_by_name("staff").is_err());
        assert_eq!(groups.get_by_name("team").unwrap().gid, Some(1200));

        // empty delta touches nothing and needs no existing row
        groups.modify("ghost", &GroupRecord::default()).unwrap();
    }

    #[test]
    fn remove_deletes_the_row() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let groups = GroupStore::new(db.conn(), &names);

        groups.add(&group("tmp", 1500)).unwrap();
        groups.remove_by_gid(1500).unwrap();
        assert!(groups.get_by_gid(1500).is_err());
    }
}
