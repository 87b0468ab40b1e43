//! Provisioning workflows.
//!
//! Each workflow runs to completion inside one CLI invocation: resolve
//! identifiers, touch the filesystem where asked to, then write all
//! persistence inside a single transaction. Filesystem effects sit
//! outside that transaction; the error taxonomy says which ones survive
//! a rollback.

use chrono::NaiveDate;

use crate::alloc::{self, IdKind};
use crate::config::Config;
use crate::error::ProvisionError;
use crate::identity::IdentitySource;
use crate::store::Database;
use crate::store::groups::GroupStore;
use crate::store::memberships::MembershipStore;
use crate::store::users::UserStore;

pub mod group;
pub mod homedir;
pub mod import;
pub mod user;

pub use group::{AddGroupRequest, ModGroupRequest};
pub use import::ImportRequest;
pub use user::{AddUserRequest, DelUserRequest, ModUserRequest};

pub struct Provisioner<'a> {
    config: &'a Config,
    identity: &'a dyn IdentitySource,
    db: &'a mut Database,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a Config, identity: &'a dyn IdentitySource, db: &'a mut Database) -> Self {
        Provisioner {
            config,
            identity,
            db,
        }
    }

    /// The store backs the NSS module, so a name or id counts as taken
    /// when either the OS namespace or the database knows it.
    fn login_taken(&self, login: &str) -> Result<bool, ProvisionError> {
        if self.identity.user_by_name(login).is_some() {
            return Ok(true);
        }
        not_found_as_false(
            UserStore::new(self.db.conn(), &self.config.names)
                .get_by_username(login)
                .map(|_| ()),
        )
    }

    fn uid_taken(&self, uid: u32) -> Result<bool, ProvisionError> {
        if self.identity.uid_exists(uid) {
            return Ok(true);
        }
        not_found_as_false(
            UserStore::new(self.db.conn(), &self.config.names)
                .get_by_uid(uid)
                .map(|_| ()),
        )
    }

    fn group_name_taken(&self, name: &str) -> Result<bool, ProvisionError> {
        if self.identity.group_by_name(name).is_some() {
            return Ok(true);
        }
        not_found_as_false(
            GroupStore::new(self.db.conn(), &self.config.names)
                .get_by_name(name)
                .map(|_| ()),
        )
    }

    fn gid_taken(&self, gid: u32) -> Result<bool, ProvisionError> {
        if self.identity.gid_exists(gid) {
            return Ok(true);
        }
        not_found_as_false(
            GroupStore::new(self.db.conn(), &self.config.names)
                .get_by_gid(gid)
                .map(|_| ()),
        )
    }

    /// Gid of an existing group, looked up in the OS namespace first and
    /// the store second.
    fn resolve_group_gid(&self, name: &str) -> Result<u32, ProvisionError> {
        if let Some(group) = self.identity.group_by_name(name) {
            return Ok(group.gid);
        }
        let record = GroupStore::new(self.db.conn(), &self.config.names).get_by_name(name)?;
        record.gid.ok_or(ProvisionError::RecordNotFound {
            entity: "group",
            key: "gid",
            value: name.to_string(),
        })
    }

    /// Resolve a group token that is either a numeric gid or the name of
    /// an existing group.
    fn resolve_gid_token(&self, token: &str) -> Result<u32, ProvisionError> {
        if let Ok(gid) = token.parse::<u32>() {
            return Ok(gid);
        }
        self.resolve_group_gid(token)
    }

    fn allocate_uid(&self, system: bool, preferred: Option<u32>) -> Result<u32, ProvisionError> {
        let identity = self.identity;
        let names = &self.config.names;
        let conn = self.db.conn();
        alloc::allocate(IdKind::User, system, preferred, &self.config.defs, |id| {
            identity.uid_exists(id) || UserStore::new(conn, names).get_by_uid(id).is_ok()
        })
    }

    fn allocate_gid(&self, system: bool, preferred: Option<u32>) -> Result<u32, ProvisionError> {
        let identity = self.identity;
        let names = &self.config.names;
        let conn = self.db.conn();
        alloc::allocate(IdKind::Group, system, preferred, &self.config.defs, |id| {
            identity.gid_exists(id) || GroupStore::new(conn, names).get_by_gid(id).is_ok()
        })
    }

    /// Migrate every membership row to a new username. Used standalone;
    /// the rename inside the modify-user workflow shares that workflow's
    /// transaction instead.
    pub fn rename_all_memberships(
        &mut self,
        username: &str,
        username_new: &str,
    ) -> Result<usize, ProvisionError> {
        let names = &self.config.names;
        let tx = self.db.transaction()?;
        let changed = MembershipStore::new(&tx, names).rename_all(username, username_new)?;
        tx.commit()?;
        Ok(changed)
    }

    /// Move every user row and membership row from one gid to another.
    pub fn change_gid_globally(&mut self, gid: u32, gid_new: u32) -> Result<(), ProvisionError> {
        let names = &self.config.names;
        let tx = self.db.transaction()?;
        UserStore::new(&tx, names).change_gid_all(gid, gid_new)?;
        MembershipStore::new(&tx, names).change_gid_all(gid, gid_new)?;
        tx.commit()?;
        Ok(())
    }
}

fn not_found_as_false(result: Result<(), ProvisionError>) -> Result<bool, ProvisionError> {
    match result {
        Ok(()) => Ok(true),
        Err(ProvisionError::RecordNotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Days since 1970-01-01, the unit of the password-aging columns.
pub(crate) fn days_since_epoch(date: NaiveDate) -> i64 {
    date.signed_duration_since(NaiveDate::default()).num_days()
}

pub(crate) fn today_epoch_days() -> i64 {
    days_since_epoch(chrono::Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::testing::FakeIdentity;
    use crate::store::groups::GroupRecord;

    #[test]
    fn gid_tokens_resolve_numerically_then_by_name() {
        let config = Config::default();
        let identity = FakeIdentity::default().with_group("wheel", 998, &[]);
        let mut db = Database::open_in_memory(&config.names).unwrap();
        GroupStore::new(db.conn(), &config.names)
            .add(&GroupRecord {
                name: Some("staff".to_string()),
                gid: Some(1200),
                password: None,
            })
            .unwrap();
        let provisioner = Provisioner::new(&config, &identity, &mut db);

        assert_eq!(provisioner.resolve_gid_token("1234").unwrap(), 1234);
        assert_eq!(provisioner.resolve_gid_token("wheel").unwrap(), 998);
        assert_eq!(provisioner.resolve_gid_token("staff").unwrap(), 1200);
        assert!(matches!(
            provisioner.resolve_gid_token("nosuch").unwrap_err(),
            ProvisionError::RecordNotFound { entity: "group", .. }
        ));
    }

    #[test]
    fn change_gid_globally_rewrites_users_and_memberships() {
        let config = Config::default();
        let identity = FakeIdentity::default();
        let mut db = Database::open_in_memory(&config.names).unwrap();
        let users = UserStore::new(db.conn(), &config.names);
        users
            .add(&crate::store::users::UserRecord {
                username: Some("a".to_string()),
                uid: Some(1000),
                gid: Some(1000),
                ..Default::default()
            })
            .unwrap();
        users
            .add(&crate::store::users::UserRecord {
                username: Some("b".to_string()),
                uid: Some(1001),
                gid: Some(2000),
                ..Default::default()
            })
            .unwrap();
        let members = MembershipStore::new(db.conn(), &config.names);
        members.add("a", 1000).unwrap();
        members.add("b", 1000).unwrap();

        let mut provisioner = Provisioner::new(&config, &identity, &mut db);
        provisioner.change_gid_globally(1000, 1001).unwrap();

        let users = UserStore::new(db.conn(), &config.names);
        assert_eq!(users.get_by_username("a").unwrap().gid, Some(1001));
        assert_eq!(users.get_by_username("b").unwrap().gid, Some(2000));
        assert_eq!(users.count_with_gid(1000).unwrap(), 0);
        let members = MembershipStore::new(db.conn(), &config.names);
        assert_eq!(members.count_for_gid(1000).unwrap(), 0);
        assert_eq!(members.count_for_gid(1001).unwrap(), 2);
    }

    #[test]
    fn rename_all_memberships_moves_every_row() {
        let config = Config::default();
        let identity = FakeIdentity::default();
        let mut db = Database::open_in_memory(&config.names).unwrap();
        let members = MembershipStore::new(db.conn(), &config.names);
        members.add("old", 1000).unwrap();
        members.add("old", 1001).unwrap();

        let mut provisioner = Provisioner::new(&config, &identity, &mut db);
        assert_eq!(provisioner.rename_all_memberships("old", "new").unwrap(), 2);

        let members = MembershipStore::new(db.conn(), &config.names);
        assert!(members.groups_for_user("old").is_err());
        assert_eq!(members.groups_for_user("new").unwrap(), vec![1000, 1001]);
    }

    #[test]
    fn epoch_day_arithmetic() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 31).unwrap();
        assert_eq!(days_since_epoch(date), 30);
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(days_since_epoch(date), 19723);
    }
}
