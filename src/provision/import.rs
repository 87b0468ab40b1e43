//! Bulk import of existing accounts from passwd/shadow style files.
//!
//! Records are filtered to an inclusive id range and written in one
//! transaction per batch; a single malformed line fails the whole batch
//! so a partial import never commits.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::Provisioner;
use crate::error::ProvisionError;
use crate::store::groups::{GroupRecord, GroupStore};
use crate::store::memberships::MembershipStore;
use crate::store::users::{UserRecord, UserStore};

#[derive(Debug)]
pub struct ImportRequest {
    pub lower: u32,
    pub upper: u32,
    /// Store `!` instead of the hash from the shadow file.
    pub ignore_passwords: bool,
    /// passwd or group file.
    pub source: PathBuf,
    /// Matching shadow or gshadow file.
    pub shadow: PathBuf,
}

struct PasswdEntry {
    name: String,
    uid: u32,
    gid: Option<i64>,
    gecos: Option<String>,
    home: Option<String>,
    shell: Option<String>,
}

struct GroupEntry {
    name: String,
    gid: u32,
    members: Vec<String>,
}

fn opt(field: &str) -> Option<String> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number(
    field: &str,
    file: &Path,
    line: usize,
) -> Result<Option<i64>, ProvisionError> {
    match opt(field) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ProvisionError::MalformedRecord {
                file: file.to_path_buf(),
                line,
            }),
    }
}

fn parse_passwd_file(
    path: &Path,
    lower: u32,
    upper: u32,
) -> Result<HashMap<String, PasswdEntry>, ProvisionError> {
    let raw = fs::read_to_string(path)?;
    let mut entries = HashMap::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 7 {
            return Err(ProvisionError::MalformedRecord {
                file: path.to_path_buf(),
                line: idx + 1,
            });
        }
        let uid = parse_number(fields[2], path, idx + 1)?.ok_or_else(|| {
            ProvisionError::MalformedRecord {
                file: path.to_path_buf(),
                line: idx + 1,
            }
        })? as u32;
        if uid < lower || uid > upper {
            continue;
        }
        entries.insert(
            fields[0].to_string(),
            PasswdEntry {
                name: fields[0].to_string(),
                uid,
                gid: parse_number(fields[3], path, idx + 1)?,
                gecos: opt(fields[4]),
                home: opt(fields[5]),
                shell: opt(fields[6]),
            },
        );
    }
    Ok(entries)
}

fn parse_group_file(
    path: &Path,
    lower: u32,
    upper: u32,
) -> Result<HashMap<String, GroupEntry>, ProvisionError> {
    let raw = fs::read_to_string(path)?;
    let mut entries = HashMap::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 4 {
            return Err(ProvisionError::MalformedRecord {
                file: path.to_path_buf(),
                line: idx + 1,
            });
        }
        let gid = parse_number(fields[2], path, idx + 1)?.ok_or_else(|| {
            ProvisionError::MalformedRecord {
                file: path.to_path_buf(),
                line: idx + 1,
            }
        })? as u32;
        if gid < lower || gid > upper {
            continue;
        }
        let members = fields[3]
            .split(',')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .map(str::to_string)
            .collect();
        entries.insert(
            fields[0].to_string(),
            GroupEntry {
                name: fields[0].to_string(),
                gid,
                members,
            },
        );
    }
    Ok(entries)
}

impl Provisioner<'_> {
    /// Returns the number of imported user records.
    pub fn import_users(&mut self, req: &ImportRequest) -> Result<usize, ProvisionError> {
        let names = &self.config.names;
        let users = parse_passwd_file(&req.source, req.lower, req.upper)?;
        let shadow = fs::read_to_string(&req.shadow)?;

        let mut imported = 0;
        let tx = self.db.transaction()?;
        {
            let store = UserStore::new(&tx, names);
            for (idx, line) in shadow.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let fields: Vec<&str> = line.split(':').collect();
                let Some(entry) = users.get(fields[0]) else {
                    continue;
                };
                if fields.len() != 9 {
                    return Err(ProvisionError::MalformedRecord {
                        file: req.shadow.clone(),
                        line: idx + 1,
                    });
                }
                let password = if req.ignore_passwords {
                    Some("!".to_string())
                } else {
                    opt(fields[1])
                };
                store.add(&UserRecord {
                    username: Some(entry.name.clone()),
                    uid: Some(entry.uid),
                    gid: entry.gid.map(|gid| gid as u32),
                    gecos: entry.gecos.clone(),
                    homedir: entry.home.clone(),
                    shell: entry.shell.clone(),
                    password,
                    lstchg: parse_number(fields[2], &req.shadow, idx + 1)?,
                    mini: parse_number(fields[3], &req.shadow, idx + 1)?,
                    maxi: parse_number(fields[4], &req.shadow, idx + 1)?,
                    warn: parse_number(fields[5], &req.shadow, idx + 1)?,
                    inact: parse_number(fields[6], &req.shadow, idx + 1)?,
                    expire: parse_number(fields[7], &req.shadow, idx + 1)?,
                    flag: parse_number(fields[8], &req.shadow, idx + 1)?,
                })?;
                imported += 1;
            }
        }
        tx.commit()?;
        Ok(imported)
    }

    /// Returns the number of imported group records.
    pub fn import_groups(&mut self, req: &ImportRequest) -> Result<usize, ProvisionError> {
        let names = &self.config.names;
        let groups = parse_group_file(&req.source, req.lower, req.upper)?;
        let gshadow = fs::read_to_string(&req.shadow)?;

        let mut imported = 0;
        let tx = self.db.transaction()?;
        {
            let store = GroupStore::new(&tx, names);
            let members = MembershipStore::new(&tx, names);
            for (idx, line) in gshadow.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let fields: Vec<&str> = line.split(':').collect();
                let Some(entry) = groups.get(fields[0]) else {
                    continue;
                };
                if fields.len() != 4 {
                    return Err(ProvisionError::MalformedRecord {
                        file: req.shadow.clone(),
                        line: idx + 1,
                    });
                }
                let password = if req.ignore_passwords {
                    Some("!".to_string())
                } else {
                    opt(fields[1])
                };
                store.add(&GroupRecord {
                    name: Some(entry.name.clone()),
                    gid: Some(entry.gid),
                    password,
                })?;
                for member in &entry.members {
                    members.add(member, entry.gid)?;
                }
                imported += 1;
            }
        }
        tx.commit()?;
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::identity::testing::FakeIdentity;
    use crate::store::Database;
    use tempfile::TempDir;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
alice:x:1000:1000:Alice:/home/alice:/bin/bash
bob:x:1001:1001::/home/bob:
";

    const SHADOW: &str = "\
root:$6$roothash:19000:0:99999:7:::
daemon:*:19000:0:99999:7:::
alice:$6$alicehash:19100:0:99999:7:::
bob::19100:0:99999:7:::
";

    fn write_sources(dir: &TempDir, source: &str, shadow: &str) -> (PathBuf, PathBuf) {
        let source_path = dir.path().join("source");
        let shadow_path = dir.path().join("shadow");
        fs::write(&source_path, source).unwrap();
        fs::write(&shadow_path, shadow).unwrap();
        (source_path, shadow_path)
    }

    #[test]
    fn imports_only_users_inside_the_id_range() {
        let dir = TempDir::new().unwrap();
        let (source, shadow) = write_sources(&dir, PASSWD, SHADOW);
        let config = Config::default();
        let identity = FakeIdentity::default();
        let mut db = Database::open_in_memory(&config.names).unwrap();

        let mut provisioner = Provisioner::new(&config, &identity, &mut db);
        let imported = provisioner
            .import_users(&ImportRequest {
                lower: 1000,
                upper: 60000,
                ignore_passwords: false,
                source,
                shadow,
            })
            .unwrap();
        assert_eq!(imported, 2);

        let users = UserStore::new(db.conn(), &config.names);
        assert!(users.get_by_username("root").is_err());
        assert!(users.get_by_username("daemon").is_err());

        let alice = users.get_by_username("alice").unwrap();
        assert_eq!(alice.uid, Some(1000));
        assert_eq!(alice.password.as_deref(), Some("$6$alicehash"));
        assert_eq!(alice.lstchg, Some(19100));
        assert_eq!(alice.maxi, Some(99999));
        assert_eq!(alice.expire, None);

        // empty fields import as absent
        let bob = users.get_by_username("bob").unwrap();
        assert_eq!(bob.gecos, None);
        assert_eq!(bob.shell, None);
        assert_eq!(bob.password, None);
    }

    #[test]
    fn redacts_passwords_on_request() {
        let dir = TempDir::new().unwrap();
        let (source, shadow) = write_sources(&dir, PASSWD, SHADOW);
        let config = Config::default();
        let identity = FakeIdentity::default();
        let mut db = Database::open_in_memory(&config.names).unwrap();

        let mut provisioner = Provisioner::new(&config, &identity, &mut db);
        provisioner
            .import_users(&ImportRequest {
                lower: 0,
                upper: 0,
                ignore_passwords: true,
                source,
                shadow,
            })
            .unwrap();

        let root = UserStore::new(db.conn(), &config.names)
            .get_by_username("root")
            .unwrap();
        assert_eq!(root.password.as_deref(), Some("!"));
    }

    #[test]
    fn a_malformed_line_fails_the_whole_batch() {
        let dir = TempDir::new().unwrap();
        let (source, shadow) = write_sources(
            &dir,
            "alice:x:1000:1000:Alice:/home/alice:/bin/bash\nbroken:x:notanid:1000::/:\n",
            SHADOW,
        );
        let config = Config::default();
        let identity = FakeIdentity::default();
        let mut db = Database::open_in_memory(&config.names).unwrap();

        let mut provisioner = Provisioner::new(&config, &identity, &mut db);
        let err = provisioner
            .import_users(&ImportRequest {
                lower: 0,
                upper: 60000,
                ignore_passwords: false,
                source,
                shadow,
            })
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedRecord { line: 2, .. }));

        // nothing was committed
        assert!(
            UserStore::new(db.conn(), &config.names)
                .get_by_username("alice")
                .is_err()
        );
    }

    #[test]
    fn imports_groups_with_their_members() {
        let dir = TempDir::new().unwrap();
        let (source, shadow) = write_sources(
            &dir,
            "root:x:0:\nstaff:x:1000:alice,bob\nwheel:x:998:alice\n",
            "root:*::\nstaff:!::alice,bob\nwheel:!::alice\n",
        );
        let config = Config::default();
        let identity = FakeIdentity::default();
        let mut db = Database::open_in_memory(&config.names).unwrap();

        let mut provisioner = Provisioner::new(&config, &identity, &mut db);
        let imported = provisioner
            .import_groups(&ImportRequest {
                lower: 500,
                upper: 60000,
                ignore_passwords: false,
                source,
                shadow,
            })
            .unwrap();
        assert_eq!(imported, 2);

        let groups = GroupStore::new(db.conn(), &config.names);
        assert!(groups.get_by_name("root").is_err());
        assert_eq!(groups.get_by_name("staff").unwrap().gid, Some(1000));
        assert_eq!(groups.get_by_name("wheel").unwrap().gid, Some(998));

        let members = MembershipStore::new(db.conn(), &config.names);
        assert_eq!(members.groups_for_user("alice").unwrap(), vec![1000, 998]);
        assert_eq!(members.groups_for_user("bob").unwrap(), vec![1000]);
    }
}
