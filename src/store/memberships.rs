use rusqlite::{Connection, params};

use super::names::NameMap;
use crate::error::ProvisionError;

/// Supplementary group assignments, one (username, gid) row per pair.
/// The pair carries no uniqueness constraint.
pub struct MembershipStore<'a> {
    conn: &'a Connection,
    names: &'a NameMap,
}

impl<'a> MembershipStore<'a> {
    pub fn new(conn: &'a Connection, names: &'a NameMap) -> Self {
        MembershipStore { conn, names }
    }

    fn table(&self) -> &str {
        self.names.table("grouplist")
    }

    /// All gids the user is a supplementary member of. A user without
    /// any membership rows is an error, not an empty list.
    pub fn groups_for_user(&self, username: &str) -> Result<Vec<u32>, ProvisionError> {
        let sql = format!(
            "SELECT \"{}\" FROM \"{}\" WHERE \"{}\" = ?1",
            self.names.field("gid"),
            self.table(),
            self.names.field("username")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![username], |row| row.get::<_, i64>(0))?;
        let mut gids = Vec::new();
        for gid in rows {
            gids.push(gid? as u32);
        }
        if gids.is_empty() {
            return Err(ProvisionError::RecordNotFound {
                entity: "membership",
                key: "username",
                value: username.to_string(),
            });
        }
        Ok(gids)
    }

    pub fn add(&self, username: &str, gid: u32) -> Result<(), ProvisionError> {
        let sql = format!(
            "INSERT INTO \"{}\" (\"{}\", \"{}\") VALUES (?1, ?2)",
            self.table(),
            self.names.field("username"),
            self.names.field("gid")
        );
        self.conn.execute(&sql, params![username, gid as i64])?;
        Ok(())
    }

    /// Delete one (username, gid) pair; reports how many rows went away.
    #[allow(dead_code)]
    pub fn remove(&self, username: &str, gid: u32) -> Result<usize, ProvisionError> {
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1 AND \"{}\" = ?2",
            self.table(),
            self.names.field("username"),
            self.names.field("gid")
        );
        Ok(self.conn.execute(&sql, params![username, gid as i64])?)
    }

    /// Delete every membership of a user; reports the row count.
    pub fn remove_all(&self, username: &str) -> Result<usize, ProvisionError> {
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = ?1",
            self.table(),
            self.names.field("username")
        );
        Ok(self.conn.execute(&sql, params![username])?)
    }

    /// Migrate every membership row from one username to another.
    pub fn rename_all(&self, username: &str, username_new: &str) -> Result<usize, ProvisionError> {
        let sql = format!(
            "UPDATE \"{}\" SET \"{user}\" = ?1 WHERE \"{user}\" = ?2",
            self.table(),
            user = self.names.field("username")
        );
        Ok(self.conn.execute(&sql, params![username_new, username])?)
    }

    /// Migrate every membership row from one gid to another.
    pub fn change_gid_all(&self, gid: u32, gid_new: u32) -> Result<usize, ProvisionError> {
        let sql = format!(
            "UPDATE \"{}\" SET \"{gid_field}\" = ?1 WHERE \"{gid_field}\" = ?2",
            self.table(),
            gid_field = self.names.field("gid")
        );
        Ok(self.conn.execute(&sql, params![gid_new as i64, gid as i64])?)
    }

    /// Number of members a gid still has.
    pub fn count_for_gid(&self, gid: u32) -> Result<usize, ProvisionError> {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" = ?1",
            self.table(),
            self.names.field("gid")
        );
        let count: i64 = self
            .conn
            .query_row(&sql, params![gid as i64], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[test]
    fn add_and_list_memberships() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let members = MembershipStore::new(db.conn(), &names);

        members.add("testuser", 1000).unwrap();
        members.add("testuser", 1001).unwrap();

        let gids = members.groups_for_user("testuser").unwrap();
        assert_eq!(gids, vec![1000, 1001]);
    }

    #[test]
    fn user_without_memberships_is_an_error() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let members = MembershipStore::new(db.conn(), &names);

        assert!(matches!(
            members.groups_for_user("ghost").unwrap_err(),
            ProvisionError::RecordNotFound { entity: "membership", .. }
        ));
    }

    #[test]
    fn remove_reports_affected_rows() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let members = MembershipStore::new(db.conn(), &names);

        members.add("testuser", 1000).unwrap();
        assert_eq!(members.remove("testuser", 1000).unwrap(), 1);
        // a second delete of the same pair is not an error here; the
        // caller decides whether zero rows matter
        assert_eq!(members.remove("testuser", 1000).unwrap(), 0);
    }

    #[test]
    fn remove_all_clears_only_that_user() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let members = MembershipStore::new(db.conn(), &names);

        members.add("a", 1000).unwrap();
        members.add("a", 1001).unwrap();
        members.add("b", 1000).unwrap();

        assert_eq!(members.remove_all("a").unwrap(), 2);
        assert!(members.groups_for_user("a").is_err());
        assert_eq!(members.groups_for_user("b").unwrap(), vec![1000]);
    }

    #[test]
    fn rename_all_migrates_rows() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let members = MembershipStore::new(db.conn(), &names);

        members.add("testuser", 1000).unwrap();
        members.add("testuser", 1001).unwrap();

        assert_eq!(members.rename_all("testuser", "testuser2").unwrap(), 2);
        assert!(members.groups_for_user("testuser").is_err());
        assert_eq!(
            members.groups_for_user("testuser2").unwrap(),
            vec![1000, 1001]
        );
    }

    #[test]
    fn change_gid_all_migrates_rows() {
        let names = NameMap::default();
        let db = Database::open_in_memory(&names).unwrap();
        let members = MembershipStore::new(db.conn(), &names);

        members.add("a", 1000).unwrap();
        members.add("b", 1000).unwrap();
        members.add("c", 2000).unwrap();

        assert_eq!(members.change_gid_all(1000, 1001).unwrap(), 2);
        assert_eq!(members.count_for_gid(1000).unwrap(), 0);
        assert_eq!(members.count_for_gid(1001).unwrap(), 2);
        assert_eq!(members.groups_for_user("c").unwrap(), vec![2000]);
    }
}
