use anyhow::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Scratch environment for driving the binary: its own config file,
/// database, skeleton and home base, far away from the host's accounts.
pub struct TestEnvironment {
    temp: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let env = TestEnvironment { temp };

        std::fs::create_dir_all(env.skel_dir())?;
        std::fs::write(env.skel_dir().join(".bashrc"), "export EDITOR=vi\n")?;
        std::fs::create_dir_all(env.home_base())?;

        // id ranges far above anything the host namespace uses
        let config = format!(
            r#"
[database]
path = "{db}"

[defs]
uid_min = 51000
uid_max = 52000
gid_min = 51000
gid_max = 52000

[defaults]
home = "{home}"
skel = "{skel}"
"#,
            db = env.db_path().display(),
            home = env.home_base().display(),
            skel = env.skel_dir().display(),
        );
        std::fs::write(env.config_path(), config)?;
        Ok(env)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.temp.path().join("usrdb.toml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp.path().join("auth.db")
    }

    pub fn home_base(&self) -> PathBuf {
        self.temp.path().join("home")
    }

    pub fn skel_dir(&self) -> PathBuf {
        self.temp.path().join("skel")
    }

    /// Run the binary with --config pointing at this environment.
    pub fn run(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new(env!("CARGO_BIN_EXE_usrdb"))
            .arg("--config")
            .arg(self.config_path())
            .args(args)
            .output()?;
        Ok(output)
    }

    pub fn db(&self) -> Result<Connection> {
        Ok(Connection::open(self.db_path())?)
    }

    pub fn user_count(&self, username: &str) -> Result<i64> {
        let conn = self.db()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM user WHERE username = ?1",
            [username],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn group_gid(&self, name: &str) -> Result<Option<i64>> {
        let conn = self.db()?;
        match conn.query_row(
            "SELECT gid FROM \"group\" WHERE name = ?1",
            [name],
            |row| row.get(0),
        ) {
            Ok(gid) => Ok(Some(gid)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn membership_gids(&self, username: &str) -> Result<Vec<i64>> {
        let conn = self.db()?;
        let mut stmt = conn.prepare("SELECT gid FROM grouplist WHERE username = ?1")?;
        let rows = stmt.query_map([username], |row| row.get(0))?;
        let mut gids = Vec::new();
        for gid in rows {
            gids.push(gid?);
        }
        Ok(gids)
    }
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
