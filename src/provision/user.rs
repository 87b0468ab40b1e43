use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::homedir;
use super::{AddGroupRequest, Provisioner, days_since_epoch, today_epoch_days};
use crate::error::ProvisionError;
use crate::store::Database;
use crate::store::memberships::MembershipStore;
use crate::store::users::{UserRecord, UserStore};
use crate::ui;

#[derive(Debug, Default)]
pub struct AddUserRequest {
    pub login: String,
    pub uid: Option<u32>,
    /// Primary group, numeric gid or group name.
    pub gid: Option<String>,
    pub gecos: Option<String>,
    pub base_dir: Option<String>,
    pub home_dir: Option<String>,
    pub shell: Option<String>,
    pub password: Option<String>,
    pub expire_date: Option<NaiveDate>,
    pub inactive: Option<i64>,
    /// Supplementary groups, numeric gids or group names.
    pub groups: Vec<String>,
    pub skel: Option<PathBuf>,
    /// None falls back to the configured policy.
    pub create_home: Option<bool>,
    /// None falls back to the configured policy.
    pub user_group: Option<bool>,
    pub non_unique: bool,
    pub system: bool,
}

#[derive(Debug, Default)]
pub struct DelUserRequest {
    pub login: String,
    /// Remove the home directory tree after the rows are gone.
    pub remove_home: bool,
    /// Ignore filesystem errors while removing the home.
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct ModUserRequest {
    pub login: String,
    pub login_new: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<String>,
    pub gecos: Option<String>,
    pub home_dir: Option<String>,
    /// Move the old home to the new location given with `home_dir`.
    pub move_home: bool,
    pub shell: Option<String>,
    pub password: Option<String>,
    pub lock: bool,
    pub unlock: bool,
    pub expire_date: Option<NaiveDate>,
    pub inactive: Option<i64>,
    /// New supplementary group set; None leaves memberships alone.
    pub groups: Option<Vec<String>>,
    /// Add to the listed groups instead of replacing the set.
    pub append: bool,
    pub non_unique: bool,
}

impl Provisioner<'_> {
    pub fn add_user(&mut self, req: &AddUserRequest) -> Result<(), ProvisionError> {
        let config = self.config;
        let defs = &config.defs;
        let defaults = &config.defaults;
        let names = &config.names;

        let uid = match req.uid {
            Some(uid) => {
                if !req.non_unique && self.uid_taken(uid)? {
                    return Err(ProvisionError::DuplicateIdentifier {
                        what: "uid",
                        value: uid.to_string(),
                    });
                }
                uid
            }
            None => self.allocate_uid(req.system, None)?,
        };

        if !req.non_unique && self.login_taken(&req.login)? {
            return Err(ProvisionError::DuplicateIdentifier {
                what: "login name",
                value: req.login.clone(),
            });
        }

        // A like-named group that already exists becomes the primary
        // group, and no group is auto-created on top of it.
        let mut make_user_group = req.user_group.unwrap_or(defaults.user_group);
        let gid = match &req.gid {
            Some(token) => self.resolve_gid_token(token)?,
            None => {
                if let Some(gid) = self.like_named_group_gid(&req.login)? {
                    make_user_group = false;
                    gid
                } else {
                    self.allocate_gid(req.system, Some(uid))?
                }
            }
        };

        let shell = req.shell.clone().unwrap_or_else(|| defaults.shell.clone());
        let base_dir = req.base_dir.clone().unwrap_or_else(|| defaults.home.clone());
        let home_dir = req.home_dir.clone().unwrap_or_else(|| {
            format!("{}/{}", base_dir.trim_end_matches('/'), req.login)
        });
        let expire = req.expire_date.map(days_since_epoch);

        // Resolve supplementary tokens before anything is written; an
        // unknown group is worth a warning, not an abort.
        let mut memberships = Vec::new();
        for token in &req.groups {
            match self.resolve_gid_token(token) {
                Ok(gid) => memberships.push(gid),
                Err(ProvisionError::RecordNotFound { .. }) => {
                    ui::warn(&format!("can't find group {token}"));
                }
                Err(e) => return Err(e),
            }
        }

        let create_home = req.create_home.unwrap_or(defaults.create_home);
        if create_home {
            let skel = req
                .skel
                .clone()
                .unwrap_or_else(|| PathBuf::from(&defaults.skel));
            homedir::materialize(Path::new(&home_dir), &skel, uid, gid, defs.umask)?;
            ui::debug(&format!("materialized home directory {home_dir}"));
        }

        let record = UserRecord {
            username: Some(req.login.clone()),
            uid: Some(uid),
            gid: Some(gid),
            gecos: req.gecos.clone(),
            homedir: Some(home_dir.clone()),
            shell: Some(shell),
            password: req.password.clone(),
            lstchg: Some(today_epoch_days()),
            mini: Some(defs.pass_min_days),
            maxi: Some(defs.pass_max_days),
            warn: Some(defs.pass_warn_days),
            inact: req.inactive,
            expire,
            flag: None,
        };

        let write = |db: &mut Database| -> Result<(), ProvisionError> {
            let tx = db.transaction()?;
            {
                UserStore::new(&tx, names).add(&record)?;
                let members = MembershipStore::new(&tx, names);
                for gid in &memberships {
                    members.add(&req.login, *gid)?;
                }
            }
            tx.commit()?;
            Ok(())
        };
        if let Err(err) = write(self.db) {
            // the home directory is already on disk and stays there
            if create_home {
                return Err(ProvisionError::PartialFailure {
                    context: err.to_string(),
                    path: PathBuf::from(home_dir),
                });
            }
            return Err(err);
        }

        if make_user_group {
            self.add_group(&AddGroupRequest {
                name: req.login.clone(),
                gid: Some(gid),
                password: None,
                system: req.system,
                non_unique: req.non_unique,
                force: false,
            })?;
        }
        Ok(())
    }

    fn like_named_group_gid(&self, login: &str) -> Result<Option<u32>, ProvisionError> {
        if let Some(group) = self.identity.group_by_name(login) {
            ui::debug(&format!(
                "adopting existing group {} (gid {})",
                group.name, group.gid
            ));
            return Ok(Some(group.gid));
        }
        match crate::store::groups::GroupStore::new(self.db.conn(), &self.config.names)
            .get_by_name(login)
        {
            Ok(record) => Ok(record.gid),
            Err(ProvisionError::RecordNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn del_user(&mut self, req: &DelUserRequest) -> Result<(), ProvisionError> {
        let names = &self.config.names;
        let record = UserStore::new(self.db.conn(), names).get_by_username(&req.login)?;

        // the OS view wins over the stored row where both exist
        let os_user = self.identity.user_by_name(&req.login);
        if let Some(user) = &os_user {
            ui::debug(&format!("deleting {} (uid {})", user.name, user.uid));
        }
        let home = os_user
            .as_ref()
            .map(|user| user.home.clone())
            .or_else(|| record.homedir.clone().map(PathBuf::from));
        let primary_gid = os_user.as_ref().map(|user| user.gid).or(record.gid);

        let tx = self.db.transaction()?;
        MembershipStore::new(&tx, names).remove_all(&req.login)?;
        UserStore::new(&tx, names).remove(&req.login)?;
        tx.commit()?;

        if req.remove_home
            && let Some(home) = &home
        {
            homedir::remove_tree(home, req.force)?;
        }

        if let Some(gid) = primary_gid {
            self.cleanup_primary_group(gid)?;
        }
        Ok(())
    }

    /// Drop the primary group of a deleted user once nothing references
    /// it anymore. Best effort; a group row that is already gone is a
    /// warning, not a failure.
    fn cleanup_primary_group(&mut self, gid: u32) -> Result<(), ProvisionError> {
        let names = &self.config.names;
        let os_members = self
            .identity
            .group_by_gid(gid)
            .map(|group| group.members.len())
            .unwrap_or(0);
        let db_members = MembershipStore::new(self.db.conn(), names).count_for_gid(gid)?;
        let owners = UserStore::new(self.db.conn(), names).count_with_gid(gid)?;
        if os_members + db_members + owners > 0 {
            return Ok(());
        }

        let tx = self.db.transaction()?;
        match crate::store::groups::GroupStore::new(&tx, names).remove_by_gid(gid) {
            Ok(()) => {
                tx.commit()?;
            }
            Err(ProvisionError::RecordNotFound { .. }) => {
                ui::warn(&format!(
                    "primary group {gid} is empty but not in the database; try groupdel"
                ));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    pub fn mod_user(&mut self, req: &ModUserRequest) -> Result<(), ProvisionError> {
        let names = &self.config.names;
        let old = UserStore::new(self.db.conn(), names).get_by_username(&req.login)?;

        if let Some(uid) = req.uid
            && !req.non_unique
            && self.uid_taken(uid)?
        {
            return Err(ProvisionError::DuplicateIdentifier {
                what: "uid",
                value: uid.to_string(),
            });
        }

        let gid = match &req.gid {
            Some(token) => Some(self.resolve_gid_token(token)?),
            None => None,
        };
        let expire = req.expire_date.map(days_since_epoch);

        let mut password = req.password.clone();
        if req.lock
            && let Some(pw) = &old.password
            && !pw.starts_with('!')
        {
            password = Some(format!("!{pw}"));
        }
        if req.unlock
            && let Some(pw) = &old.password
            && let Some(stripped) = pw.strip_prefix('!')
        {
            password = Some(stripped.to_string());
        }
        // any password write restarts the aging clock
        let lstchg = password.as_ref().map(|_| today_epoch_days());

        let resolved_groups = match &req.groups {
            Some(tokens) => {
                let mut gids = Vec::new();
                for token in tokens {
                    match self.resolve_gid_token(token) {
                        Ok(gid) => gids.push(gid),
                        Err(ProvisionError::RecordNotFound { .. }) => {
                            ui::warn(&format!("can't find group {token}"));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Some(gids)
            }
            None => None,
        };
        let current_groups = if req.append {
            match MembershipStore::new(self.db.conn(), names).groups_for_user(&req.login) {
                Ok(gids) => gids,
                Err(ProvisionError::RecordNotFound { .. }) => Vec::new(),
                Err(e) => return Err(e),
            }
        } else {
            Vec::new()
        };

        let delta = UserRecord {
            username: req.login_new.clone(),
            uid: req.uid,
            gid,
            gecos: req.gecos.clone(),
            homedir: req.home_dir.clone(),
            shell: req.shell.clone(),
            password,
            lstchg,
            inact: req.inactive,
            expire,
            ..Default::default()
        };

        let tx = self.db.transaction()?;
        {
            UserStore::new(&tx, names).modify(&req.login, &delta)?;
            let members = MembershipStore::new(&tx, names);
            if let Some(login_new) = &req.login_new {
                members.rename_all(&req.login, login_new)?;
            }
            let login_now = req.login_new.as_deref().unwrap_or(&req.login);
            if let Some(gids) = &resolved_groups {
                if req.append {
                    for gid in gids {
                        if !current_groups.contains(gid) {
                            members.add(login_now, *gid)?;
                        }
                    }
                } else {
                    members.remove_all(login_now)?;
                    for gid in gids {
                        members.add(login_now, *gid)?;
                    }
                }
            }
        }

        // The move happens before the commit: a denied move must take
        // the row updates down with it.
        let home_src = self
            .identity
            .user_by_name(&req.login)
            .map(|user| user.home)
            .or_else(|| old.homedir.clone().map(PathBuf::from));
        let mut moved_to = None;
        if req.move_home
            && let Some(new_home) = &req.home_dir
            && let Some(old_home) = &home_src
        {
            if let Err(e) = homedir::move_home(old_home, Path::new(new_home)) {
                drop(tx);
                return Err(e);
            }
            moved_to = Some(PathBuf::from(new_home));
        }
        match tx.commit() {
            Ok(()) => Ok(()),
            Err(e) => match moved_to {
                Some(path) => Err(ProvisionError::PartialFailure {
                    context: e.to_string(),
                    path,
                }),
                None => Err(e.into()),
            },
        }
    }
}
