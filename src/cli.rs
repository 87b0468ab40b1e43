use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::Config;
use crate::identity::Getent;
use crate::provision::{
    AddGroupRequest, AddUserRequest, DelUserRequest, ImportRequest, ModGroupRequest,
    ModUserRequest, Provisioner,
};
use crate::store::Database;
use crate::ui;

/// usrdb main parser
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file for this tool
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Activate debug mode
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new user account in the database
    Useradd(UseraddArgs),
    /// Modify an existing user account
    Usermod(UsermodArgs),
    /// Delete a user account from the database
    Userdel(UserdelArgs),
    /// Create a new group in the database
    Groupadd(GroupaddArgs),
    /// Modify an existing group
    Groupmod(GroupmodArgs),
    /// Delete a group from the database
    Groupdel(GroupdelArgs),
    /// Rewrite every user and membership row from one gid to another
    Chgid(ChgidArgs),
    /// Rewrite every membership row from one login name to another
    RenameMemberships(RenameMembershipsArgs),
    /// Import users from passwd/shadow style files
    ImportUsers(ImportUsersArgs),
    /// Import groups from group/gshadow style files
    ImportGroups(ImportGroupsArgs),
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date {s}: {e}"))
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {s}"))
}

#[derive(Args, Debug)]
pub struct UseraddArgs {
    /// Login name of the new account
    pub login: String,

    /// Base directory for the home directory of the new account
    #[arg(short, long, value_name = "BASE_DIR", value_hint = ValueHint::DirPath)]
    pub basedir: Option<String>,

    /// GECOS field of the new account
    #[arg(short, long, value_name = "COMMENT")]
    pub comment: Option<String>,

    /// Home directory of the new account
    #[arg(short = 'd', long, value_name = "HOME_DIR", value_hint = ValueHint::DirPath)]
    pub home_dir: Option<String>,

    /// Expiration date of the new account (YYYY-MM-DD)
    #[arg(short, long, value_name = "EXPIRE_DATE", value_parser = parse_date)]
    pub expiredate: Option<NaiveDate>,

    /// Password inactivity period of the new account, in days
    #[arg(short = 'f', long, value_name = "INACTIVE")]
    pub inactive: Option<i64>,

    /// Name or id of the primary group of the new account
    #[arg(short, long, value_name = "GROUP")]
    pub gid: Option<String>,

    /// Comma-separated list of supplementary groups of the new account
    #[arg(short = 'G', long, value_delimiter = ',', value_name = "GROUPS")]
    pub groups: Vec<String>,

    /// Use this alternative skeleton directory
    #[arg(short = 'k', long, value_name = "SKEL_DIR", value_hint = ValueHint::DirPath)]
    pub skel: Option<PathBuf>,

    /// Override configured defaults (e.g. UID_MIN=2000)
    #[arg(short = 'K', long = "key", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub keys: Vec<(String, String)>,

    /// Do not create the user's home directory
    #[arg(short = 'M', long, conflicts_with = "create_home")]
    pub no_create_home: bool,

    /// Create the user's home directory
    #[arg(short = 'm', long)]
    pub create_home: bool,

    /// Do not create a group with the same name as the user
    #[arg(short = 'N', long, conflicts_with = "user_group")]
    pub no_user_group: bool,

    /// Create a group with the same name as the user
    #[arg(short = 'U', long)]
    pub user_group: bool,

    /// Allow creating a user with a duplicate (non-unique) uid
    #[arg(short = 'o', long)]
    pub non_unique: bool,

    /// Encrypted password of the new account
    #[arg(short, long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Create a system account
    #[arg(short = 'r', long)]
    pub system: bool,

    /// Login shell of the new account
    #[arg(short, long, value_name = "SHELL")]
    pub shell: Option<String>,

    /// User id of the new account
    #[arg(short, long, value_name = "UID")]
    pub uid: Option<u32>,
}

impl UseraddArgs {
    fn into_request(self) -> AddUserRequest {
        let create_home = if self.no_create_home {
            Some(false)
        } else if self.create_home {
            Some(true)
        } else {
            None
        };
        let user_group = if self.no_user_group {
            Some(false)
        } else if self.user_group {
            Some(true)
        } else {
            None
        };
        AddUserRequest {
            login: self.login,
            uid: self.uid,
            gid: self.gid,
            gecos: self.comment,
            base_dir: self.basedir,
            home_dir: self.home_dir,
            shell: self.shell,
            password: self.password,
            expire_date: self.expiredate,
            inactive: self.inactive,
            groups: self.groups,
            skel: self.skel,
            create_home,
            user_group,
            non_unique: self.non_unique,
            system: self.system,
        }
    }
}

#[derive(Args, Debug)]
pub struct UsermodArgs {
    /// Login name of the account to modify
    pub login: String,

    /// New value of the GECOS field
    #[arg(short, long, value_name = "COMMENT")]
    pub comment: Option<String>,

    /// New home directory for the user account
    #[arg(short = 'd', long, value_name = "HOME_DIR", value_hint = ValueHint::DirPath)]
    pub home_dir: Option<String>,

    /// Set account expiration date (YYYY-MM-DD)
    #[arg(short, long, value_name = "EXPIRE_DATE", value_parser = parse_date)]
    pub expiredate: Option<NaiveDate>,

    /// Set password inactivity period after expiration, in days
    #[arg(short = 'f', long, value_name = "INACTIVE")]
    pub inactive: Option<i64>,

    /// Name or id of the new primary group
    #[arg(short, long, value_name = "GROUP")]
    pub gid: Option<String>,

    /// New comma-separated list of supplementary groups
    #[arg(short = 'G', long, value_delimiter = ',', value_name = "GROUPS")]
    pub groups: Option<Vec<String>>,

    /// Append the user to the groups given with -G instead of replacing
    /// the current set
    #[arg(short, long)]
    pub append: bool,

    /// New value of the login name
    #[arg(short = 'l', long = "login", value_name = "NEW_LOGIN")]
    pub login_new: Option<String>,

    /// Lock the user account
    #[arg(short = 'L', long, conflicts_with = "unlock")]
    pub lock: bool,

    /// Unlock the user account
    #[arg(short = 'U', long)]
    pub unlock: bool,

    /// Move contents of the home directory to the new location (use
    /// only with -d)
    #[arg(short = 'm', long, default_value_t = true)]
    pub move_home: bool,

    /// Allow using a duplicate (non-unique) uid
    #[arg(short = 'o', long)]
    pub non_unique: bool,

    /// New encrypted password for the account
    #[arg(short, long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// New login shell for the user account
    #[arg(short, long, value_name = "SHELL")]
    pub shell: Option<String>,

    /// New uid for the user account
    #[arg(short, long, value_name = "UID")]
    pub uid: Option<u32>,
}

impl UsermodArgs {
    fn into_request(self) -> ModUserRequest {
        ModUserRequest {
            login: self.login,
            login_new: self.login_new,
            uid: self.uid,
            gid: self.gid,
            gecos: self.comment,
            home_dir: self.home_dir,
            move_home: self.move_home,
            shell: self.shell,
            password: self.password,
            lock: self.lock,
            unlock: self.unlock,
            expire_date: self.expiredate,
            inactive: self.inactive,
            groups: self.groups,
            append: self.append,
            non_unique: self.non_unique,
        }
    }
}

#[derive(Args, Debug)]
pub struct UserdelArgs {
    /// Login name of the account to delete
    pub login: String,

    /// Force removal of files, even if not owned by the user
    #[arg(short, long)]
    pub force: bool,

    /// Remove home directory and mail spool
    #[arg(short, long)]
    pub remove: bool,
}

#[derive(Args, Debug)]
pub struct GroupaddArgs {
    /// Name of the new group
    pub group: String,

    /// Exit successfully if the group already exists, and cancel -g if
    /// the gid is already used
    #[arg(short, long)]
    pub force: bool,

    /// Use this gid for the new group
    #[arg(short, long, value_name = "GID")]
    pub gid: Option<u32>,

    /// Override configured defaults (e.g. GID_MIN=2000)
    #[arg(short = 'K', long = "key", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub keys: Vec<(String, String)>,

    /// Allow creating a group with a duplicate (non-unique) gid
    #[arg(short = 'o', long)]
    pub non_unique: bool,

    /// Encrypted password of the new group
    #[arg(short, long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Create a system group
    #[arg(short = 'r', long)]
    pub system: bool,
}

#[derive(Args, Debug)]
pub struct GroupmodArgs {
    /// Name of the group to modify
    pub group: String,

    /// Change the group id to this gid
    #[arg(short, long, value_name = "GID")]
    pub gid: Option<u32>,

    /// Change the name of the group
    #[arg(short, long, value_name = "NEW_GROUP")]
    pub new_name: Option<String>,

    /// Allow using a duplicate (non-unique) gid
    #[arg(short = 'o', long)]
    pub non_unique: bool,

    /// Change the group password to this (encrypted) value
    #[arg(short, long, value_name = "PASSWORD")]
    pub password: Option<String>,
}

#[derive(Args, Debug)]
pub struct GroupdelArgs {
    /// Name of the group to delete
    pub group: String,
}

#[derive(Args, Debug)]
pub struct ChgidArgs {
    /// Current gid
    pub old_gid: u32,

    /// Replacement gid
    pub new_gid: u32,
}

#[derive(Args, Debug)]
pub struct RenameMembershipsArgs {
    /// Current login name
    pub old_login: String,

    /// Replacement login name
    pub new_login: String,
}

#[derive(Args, Debug)]
pub struct ImportUsersArgs {
    /// Lowest uid to import
    pub lower: u32,

    /// Highest uid to import
    pub upper: u32,

    /// Don't import passwords
    #[arg(short, long)]
    pub ignore_password: bool,

    /// passwd file to read accounts from
    #[arg(long, default_value = "/etc/passwd", value_hint = ValueHint::FilePath)]
    pub passwd_file: PathBuf,

    /// shadow file to read password entries from
    #[arg(long, default_value = "/etc/shadow", value_hint = ValueHint::FilePath)]
    pub shadow_file: PathBuf,
}

#[derive(Args, Debug)]
pub struct ImportGroupsArgs {
    /// Lowest gid to import
    pub lower: u32,

    /// Highest gid to import
    pub upper: u32,

    /// Don't import passwords
    #[arg(short, long)]
    pub ignore_password: bool,

    /// group file to read groups from
    #[arg(long, default_value = "/etc/group", value_hint = ValueHint::FilePath)]
    pub group_file: PathBuf,

    /// gshadow file to read password entries from
    #[arg(long, default_value = "/etc/gshadow", value_hint = ValueHint::FilePath)]
    pub gshadow_file: PathBuf,
}

fn apply_keys(config: &mut Config, keys: &[(String, String)]) -> Result<()> {
    for (key, value) in keys {
        if !config.defs.apply_override(key, value)? {
            ui::warn(&format!("ignoring unknown key {key}"));
        }
    }
    Ok(())
}

pub fn run(cli: Cli) -> Result<()> {
    ui::set_debug_mode(cli.debug);

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    match &cli.command {
        Commands::Useradd(args) => apply_keys(&mut config, &args.keys)?,
        Commands::Groupadd(args) => apply_keys(&mut config, &args.keys)?,
        _ => {}
    }

    let db_path = config.database_path();
    let mut db = Database::open(&db_path, &config.names)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let identity = Getent;
    let mut provisioner = Provisioner::new(&config, &identity, &mut db);

    match cli.command {
        Commands::Useradd(args) => {
            let login = args.login.clone();
            provisioner.add_user(&args.into_request())?;
            ui::success(&format!("created user {login}"));
        }
        Commands::Usermod(args) => {
            let login = args.login.clone();
            provisioner.mod_user(&args.into_request())?;
            ui::success(&format!("updated user {login}"));
        }
        Commands::Userdel(args) => {
            provisioner.del_user(&DelUserRequest {
                login: args.login.clone(),
                remove_home: args.remove,
                force: args.force,
            })?;
            ui::success(&format!("deleted user {}", args.login));
        }
        Commands::Groupadd(args) => {
            provisioner.add_group(&AddGroupRequest {
                name: args.group.clone(),
                gid: args.gid,
                password: args.password,
                system: args.system,
                non_unique: args.non_unique,
                force: args.force,
            })?;
            ui::success(&format!("created group {}", args.group));
        }
        Commands::Groupmod(args) => {
            provisioner.mod_group(&ModGroupRequest {
                name: args.group.clone(),
                new_name: args.new_name,
                gid: args.gid,
                password: args.password,
                non_unique: args.non_unique,
            })?;
            ui::success(&format!("updated group {}", args.group));
        }
        Commands::Groupdel(args) => {
            provisioner.del_group(&args.group)?;
            ui::success(&format!("deleted group {}", args.group));
        }
        Commands::Chgid(args) => {
            provisioner.change_gid_globally(args.old_gid, args.new_gid)?;
            ui::success(&format!("moved gid {} to {}", args.old_gid, args.new_gid));
        }
        Commands::RenameMemberships(args) => {
            let changed =
                provisioner.rename_all_memberships(&args.old_login, &args.new_login)?;
            ui::info(&format!("renamed {changed} membership rows"));
        }
        Commands::ImportUsers(args) => {
            let imported = provisioner.import_users(&ImportRequest {
                lower: args.lower,
                upper: args.upper,
                ignore_passwords: args.ignore_password,
                source: args.passwd_file,
                shadow: args.shadow_file,
            })?;
            ui::info(&format!("imported {imported} users"));
        }
        Commands::ImportGroups(args) => {
            let imported = provisioner.import_groups(&ImportRequest {
                lower: args.lower,
                upper: args.upper,
                ignore_passwords: args.ignore_password,
                source: args.group_file,
                shadow: args.gshadow_file,
            })?;
            ui::info(&format!("imported {imported} groups"));
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }
    Ok(())
}
