use super::Provisioner;
use crate::error::ProvisionError;
use crate::store::groups::{GroupRecord, GroupStore};
use crate::store::memberships::MembershipStore;
use crate::store::users::UserStore;
use crate::ui;

#[derive(Debug, Default)]
pub struct AddGroupRequest {
    pub name: String,
    pub gid: Option<u32>,
    pub password: Option<String>,
    pub system: bool,
    pub non_unique: bool,
    /// Succeed when the group already exists and fall back to
    /// allocation when the requested gid is taken.
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct ModGroupRequest {
    pub name: String,
    pub new_name: Option<String>,
    pub gid: Option<u32>,
    pub password: Option<String>,
    pub non_unique: bool,
}

impl Provisioner<'_> {
    pub fn add_group(&mut self, req: &AddGroupRequest) -> Result<(), ProvisionError> {
        let names = &self.config.names;

        let gid = match req.gid {
            Some(gid) => {
                if !req.non_unique && self.gid_taken(gid)? {
                    if !req.force {
                        return Err(ProvisionError::DuplicateIdentifier {
                            what: "gid",
                            value: gid.to_string(),
                        });
                    }
                    self.allocate_gid(req.system, None)?
                } else {
                    gid
                }
            }
            None => self.allocate_gid(req.system, None)?,
        };

        if self.group_name_taken(&req.name)? {
            if req.force {
                ui::debug(&format!("group {} already exists", req.name));
                return Ok(());
            }
            return Err(ProvisionError::DuplicateIdentifier {
                what: "group name",
                value: req.name.clone(),
            });
        }

        let tx = self.db.transaction()?;
        GroupStore::new(&tx, names).add(&GroupRecord {
            name: Some(req.name.clone()),
            gid: Some(gid),
            password: req.password.clone(),
        })?;
        tx.commit()?;
        Ok(())
    }

    pub fn mod_group(&mut self, req: &ModGroupRequest) -> Result<(), ProvisionError> {
        let names = &self.config.names;
        let old_gid = self.resolve_group_gid(&req.name)?;

        if let Some(gid) = req.gid
            && !req.non_unique
            && self.gid_taken(gid)?
        {
            return Err(ProvisionError::DuplicateIdentifier {
                what: "gid",
                value: gid.to_string(),
            });
        }

        let tx = self.db.transaction()?;
        {
            // a gid change drags every user and membership row along
            if let Some(gid_new) = req.gid {
                MembershipStore::new(&tx, names).change_gid_all(old_gid, gid_new)?;
                UserStore::new(&tx, names).change_gid_all(old_gid, gid_new)?;
            }
            GroupStore::new(&tx, names).modify(
                &req.name,
                &GroupRecord {
                    name: req.new_name.clone(),
                    gid: req.gid,
                    password: req.password.clone(),
                },
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn del_group(&mut self, name: &str) -> Result<(), ProvisionError> {
        let gid = self.resolve_group_gid(name)?;
        let names = &self.config.names;

        let tx = self.db.transaction()?;
        GroupStore::new(&tx, names).remove_by_gid(gid)?;
        tx.commit()?;
        Ok(())
    }
}
