//! Host-side files the preset writes before a container is requested.
//!
//! [`Environment`] is passed into [`crate::mssql::run_with`] so tests can record
//! writes instead of touching the real home directory.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::info;

use crate::error::{Error, Result};

pub const PROPERTIES_FILE_NAME: &str = ".testcontainers.properties";
pub const REAPER_DISABLED: &str = "ryuk.disabled=true\n";

pub const SQL_AGENT_CONF_FILE_NAME: &str = "mssql.conf";
pub const SQL_AGENT_CONF: &str = "[sqlagent]\nenabled = true\n";

pub trait Environment {
    /// Persist the process-wide opt-out of the container reaper. Overwrites any
    /// previous content.
    fn disable_reaper(&self) -> Result<()>;

    /// Create a fresh `mssql.conf` that enables the SQL Agent and return its
    /// host path. Every call yields a distinct file.
    fn create_sql_agent_conf(&self) -> Result<PathBuf>;
}

/// Writes into the user home directory and the system temp directory.
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
    home_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
}

impl HostEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `dir` instead of the user home directory.
    pub fn with_home_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.home_dir = Some(dir.into());
        self
    }

    /// Create configuration directories under `dir` instead of the system
    /// temp directory.
    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn properties_path(&self) -> Result<PathBuf> {
        let home = match &self.home_dir {
            Some(home) => home.clone(),
            None => home::home_dir().ok_or(Error::HomeDirNotFound)?,
        };
        Ok(home.join(PROPERTIES_FILE_NAME))
    }
}

impl Environment for HostEnvironment {
    fn disable_reaper(&self) -> Result<()> {
        let path = self.properties_path()?;
        fs::write(&path, REAPER_DISABLED).map_err(|source| Error::DisableReaper {
            path: path.clone(),
            source,
        })?;
        info!("Reaper disabled in {}", path.display());
        Ok(())
    }

    fn create_sql_agent_conf(&self) -> Result<PathBuf> {
        let path = write_sql_agent_conf(self.temp_dir.as_deref())
            .map_err(|source| Error::SqlAgentConfig { source })?;
        info!("SQL Agent configuration generated at {}", path.display());
        Ok(path)
    }
}

fn write_sql_agent_conf(parent: Option<&Path>) -> io::Result<PathBuf> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("mssql-conf-");
    let dir = match parent {
        Some(parent) => builder.tempdir_in(parent)?,
        None => builder.tempdir()?,
    };
    // the directory outlives this call: the container reads the file after start
    let dir = dir.keep();

    let path = dir.join(SQL_AGENT_CONF_FILE_NAME);
    let mut file = fs::File::create(&path)?;
    file.write_all(SQL_AGENT_CONF.as_bytes())?;
    file.sync_all()?;
    set_world_readable(&path)?;
    Ok(path)
}

#[cfg(unix)]
fn set_world_readable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_world_readable(_path: &Path) -> io::Result<()> {
    Ok(())
}
