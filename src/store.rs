//! Durable storage for the login session.
//!
//! The session lives in a small TOML file so that it survives the process
//! exiting between starting a login and completing it from the redirect:
//!
//! ```toml
//! client_id = "0123456789abcdef0123456789abcdef"
//! access_token = "..."
//! ```
//!
//! Every write replaces the whole file.

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::error::{Error, Result};

/// Persisted login state.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize, Redact)]
pub struct Session {
    pub client_id: Option<String>,

    /// Present only while a login round-trip is in flight.
    #[redact]
    pub code_verifier: Option<String>,

    #[redact]
    pub access_token: Option<String>,
}

/// Named slots of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    ClientId,
    CodeVerifier,
    AccessToken,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientId => write!(f, "client id"),
            Self::CodeVerifier => write!(f, "code verifier"),
            Self::AccessToken => write!(f, "access token"),
        }
    }
}

#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    session: Session,
}

impl SessionStore {
    /// Session files are tiny; anything larger is not ours.
    const MAX_FILE_SIZE: u64 = 4096;

    /// Opens the session file at `path`, starting empty if it does not exist
    /// yet.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file exists but is too large, unreadable or
    /// not valid TOML.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let session = match fs::metadata(path) {
            Ok(attributes) => {
                // Prevent out-of-memory condition: the file should be small.
                if attributes.len() > Self::MAX_FILE_SIZE {
                    return Err(Error::invalid_argument(format!(
                        "{} is too large",
                        path.display()
                    )));
                }

                let contents = fs::read_to_string(path)?;
                toml::from_str(&contents).map_err(|e| {
                    Error::invalid_argument(format!("{} format is invalid: {e}", path.display()))
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no session at {}, starting fresh", path.display());
                Session::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            session,
        })
    }

    /// A store that forgets everything when dropped.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            session: Session::default(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::ClientId => self.session.client_id.as_deref(),
            Slot::CodeVerifier => self.session.code_verifier.as_deref(),
            Slot::AccessToken => self.session.access_token.as_deref(),
        }
    }

    /// Stores `value` in `slot` and writes the session to disk.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the session cannot be written. The slot keeps
    /// its previous value in that case.
    pub fn set(&mut self, slot: Slot, value: &str) -> Result<()> {
        let previous = self.slot_mut(slot).replace(value.to_owned());
        if let Err(e) = self.persist() {
            *self.slot_mut(slot) = previous;
            return Err(e);
        }

        Ok(())
    }

    /// Empties `slot` and writes the session to disk.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the session cannot be written. The slot is
    /// emptied in memory regardless, so that a rejected token is not used
    /// again by this process.
    pub fn clear(&mut self, slot: Slot) -> Result<()> {
        if self.slot_mut(slot).take().is_none() {
            return Ok(());
        }
        self.persist()
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<String> {
        match slot {
            Slot::ClientId => &mut self.session.client_id,
            Slot::CodeVerifier => &mut self.session.code_verifier,
            Slot::AccessToken => &mut self.session.access_token,
        }
    }

    /// Replaces the session file with the current session.
    ///
    /// Writes a sibling file first and renames it over the old one, so the
    /// file on disk is always either the old or the new session.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = toml::to_string(&self.session)?;

        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        // Start from a fresh file, so it gets the permissions below.
        match fs::remove_file(&staging) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            // The file holds a bearer token.
            options.mode(0o600);
        }

        let mut file = options.open(&staging)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&staging, path)?;
        trace!("session written to {}", path.display());

        Ok(())
    }
}
