use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::alloc::{IdKind, IdRange};
use crate::store::names::NameMap;

/// Tool configuration, loaded once in `main` and passed by reference
/// everywhere. Nothing in here is mutated after the CLI layer applied
/// its `-K` overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(flatten)]
    pub names: NameMap,
    pub defs: Defs,
    pub defaults: Defaults,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite database backing the authentication module.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "/var/lib/usrdb/auth.db".to_string(),
        }
    }
}

/// Id ranges, password-aging defaults and the creation umask, the
/// equivalent of the interesting subset of login.defs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Defs {
    pub uid_min: u32,
    pub uid_max: u32,
    pub sys_uid_min: u32,
    /// Defaults to `uid_min` when unset.
    pub sys_uid_max: Option<u32>,
    pub gid_min: u32,
    pub gid_max: u32,
    pub sys_gid_min: u32,
    /// Defaults to `gid_min` when unset.
    pub sys_gid_max: Option<u32>,
    pub pass_min_days: i64,
    pub pass_max_days: i64,
    pub pass_warn_days: i64,
    pub umask: u32,
}

impl Default for Defs {
    fn default() -> Self {
        Defs {
            uid_min: 1000,
            uid_max: 60000,
            sys_uid_min: 101,
            sys_uid_max: None,
            gid_min: 1000,
            gid_max: 60000,
            sys_gid_min: 101,
            sys_gid_max: None,
            pass_min_days: 0,
            pass_max_days: 99999,
            pass_warn_days: 7,
            umask: 0o022,
        }
    }
}

impl Defs {
    /// Range to scan for a new id of the given kind.
    pub fn id_range(&self, kind: IdKind, system: bool) -> IdRange {
        match (kind, system) {
            (IdKind::User, false) => IdRange {
                min: self.uid_min,
                max: self.uid_max,
            },
            (IdKind::User, true) => IdRange {
                min: self.sys_uid_min,
                max: self.sys_uid_max.unwrap_or(self.uid_min),
            },
            (IdKind::Group, false) => IdRange {
                min: self.gid_min,
                max: self.gid_max,
            },
            (IdKind::Group, true) => IdRange {
                min: self.sys_gid_min,
                max: self.sys_gid_max.unwrap_or(self.gid_min),
            },
        }
    }

    /// Apply a `-K KEY=VALUE` command line override. Returns false for
    /// keys this tool does not know about.
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<bool> {
        let parse = |v: &str| {
            v.parse::<u32>()
                .with_context(|| format!("invalid value for {key}: {v}"))
        };
        match key.to_ascii_uppercase().as_str() {
            "UID_MIN" => self.uid_min = parse(value)?,
            "UID_MAX" => self.uid_max = parse(value)?,
            "SYS_UID_MIN" => self.sys_uid_min = parse(value)?,
            "SYS_UID_MAX" => self.sys_uid_max = Some(parse(value)?),
            "GID_MIN" => self.gid_min = parse(value)?,
            "GID_MAX" => self.gid_max = parse(value)?,
            "SYS_GID_MIN" => self.sys_gid_min = parse(value)?,
            "SYS_GID_MAX" => self.sys_gid_max = Some(parse(value)?),
            "PASS_MIN_DAYS" => {
                self.pass_min_days = value
                    .parse()
                    .with_context(|| format!("invalid value for {key}: {value}"))?
            }
            "PASS_MAX_DAYS" => {
                self.pass_max_days = value
                    .parse()
                    .with_context(|| format!("invalid value for {key}: {value}"))?
            }
            "PASS_WARN_DAYS" => {
                self.pass_warn_days = value
                    .parse()
                    .with_context(|| format!("invalid value for {key}: {value}"))?
            }
            "UMASK" => {
                self.umask = u32::from_str_radix(value, 8)
                    .with_context(|| format!("invalid octal value for {key}: {value}"))?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Defaults applied to new accounts, the equivalent of
/// /etc/default/useradd.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Base directory for home directories.
    pub home: String,
    /// Login shell for new accounts.
    pub shell: String,
    /// Skeleton directory copied into new home directories.
    pub skel: String,
    /// Create home directories unless told otherwise.
    pub create_home: bool,
    /// Create a group named after each new user.
    pub user_group: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            home: "/home".to_string(),
            shell: "/bin/bash".to_string(),
            skel: "/etc/skel".to_string(),
            create_home: true,
            user_group: true,
        }
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("usrdb.toml"),
        PathBuf::from("/etc/usrdb.toml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("usrdb").join("config.toml"));
    }
    paths
}

impl Config {
    /// Load the config. An explicitly given path must exist; otherwise
    /// the usual locations are probed and built-in defaults apply when
    /// none of them has a file.
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => candidate_paths().into_iter().find(|p| p.exists()),
        };
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}
