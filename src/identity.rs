//! Lookups against the OS identity namespace.
//!
//! The store this tool writes to sits behind an NSS/PAM module, so in
//! production `getent` sees both the local passwd/group files and the
//! database rows. The workflows only depend on the trait, which keeps
//! them testable without a configured NSS stack.

use std::path::PathBuf;
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsGroup {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

pub trait IdentitySource {
    fn user_by_name(&self, name: &str) -> Option<OsUser>;
    fn user_by_uid(&self, uid: u32) -> Option<OsUser>;
    fn group_by_name(&self, name: &str) -> Option<OsGroup>;
    fn group_by_gid(&self, gid: u32) -> Option<OsGroup>;

    fn uid_exists(&self, uid: u32) -> bool {
        self.user_by_uid(uid).is_some()
    }

    fn gid_exists(&self, gid: u32) -> bool {
        self.group_by_gid(gid).is_some()
    }
}

/// Identity lookups through getent(1).
pub struct Getent;

fn getent(database: &str, key: &str) -> Option<String> {
    let output = Command::new("getent").arg(database).arg(key).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

fn parse_passwd_line(line: &str) -> Option<OsUser> {
    let mut fields = line.trim().split(':');
    let name = fields.next()?.to_string();
    let _password = fields.next()?;
    let uid = fields.next()?.parse().ok()?;
    let gid = fields.next()?.parse().ok()?;
    let _gecos = fields.next()?;
    let home = PathBuf::from(fields.next()?);
    Some(OsUser {
        name,
        uid,
        gid,
        home,
    })
}

fn parse_group_line(line: &str) -> Option<OsGroup> {
    let mut fields = line.trim().split(':');
    let name = fields.next()?.to_string();
    let _password = fields.next()?;
    let gid = fields.next()?.parse().ok()?;
    let members = fields
        .next()
        .map(|m| {
            m.split(',')
                .filter(|member| !member.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(OsGroup { name, gid, members })
}

impl IdentitySource for Getent {
    fn user_by_name(&self, name: &str) -> Option<OsUser> {
        parse_passwd_line(&getent("passwd", name)?)
    }

    fn user_by_uid(&self, uid: u32) -> Option<OsUser> {
        parse_passwd_line(&getent("passwd", &uid.to_string())?)
    }

    fn group_by_name(&self, name: &str) -> Option<OsGroup> {
        parse_group_line(&getent("group", name)?)
    }

    fn group_by_gid(&self, gid: u32) -> Option<OsGroup> {
        parse_group_line(&getent("group", &gid.to_string())?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory identity namespace for workflow tests.
    #[derive(Default)]
    pub struct FakeIdentity {
        pub users: Vec<OsUser>,
        pub groups: Vec<OsGroup>,
    }

    impl FakeIdentity {
        pub fn with_user(mut self, name: &str, uid: u32, gid: u32, home: &str) -> Self {
            self.users.push(OsUser {
                name: name.to_string(),
                uid,
                gid,
                home: PathBuf::from(home),
            });
            self
        }

        pub fn with_group(mut self, name: &str, gid: u32, members: &[&str]) -> Self {
            self.groups.push(OsGroup {
                name: name.to_string(),
                gid,
                members: members.iter().map(|m| m.to_string()).collect(),
            });
            self
        }
    }

    impl IdentitySource for FakeIdentity {
        fn user_by_name(&self, name: &str) -> Option<OsUser> {
            self.users.iter().find(|u| u.name == name).cloned()
        }

        fn user_by_uid(&self, uid: u32) -> Option<OsUser> {
            self.users.iter().find(|u| u.uid == uid).cloned()
        }

        fn group_by_name(&self, name: &str) -> Option<OsGroup> {
            self.groups.iter().find(|g| g.name == name).cloned()
        }

        fn group_by_gid(&self, gid: u32) -> Option<OsGroup> {
            self.groups.iter().find(|g| g.gid == gid).cloned()
        }
    }
}
