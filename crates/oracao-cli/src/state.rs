//! Registration persisted between runs.
//!
//! Each invocation of the CLI is a short-lived host; the registration
//! (which generation is active or waiting) is kept in
//! `~/.cache/oracao-sw/registration.json` so the next run picks up where the
//! previous one left off.

use std::path::PathBuf;

use anyhow::{Context, Result};
use oracao_core::lifecycle::Registration;

/// Registration file name in cache directory
const REGISTRATION_FILE: &str = "registration.json";

pub struct RegistrationStore {
    cache_dir: PathBuf,
}

impl RegistrationStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Load the saved registration, if any
    pub fn load(&self) -> Result<Option<Registration>> {
        let path = self.registration_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read registration file")?;
        let registration = serde_json::from_str(&contents)
            .context("Failed to parse registration file")?;
        Ok(Some(registration))
    }

    pub fn save(&self, registration: &Registration) -> Result<()> {
        let path = self.registration_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(registration)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let path = self.registration_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn registration_path(&self) -> PathBuf {
        self.cache_dir.join(REGISTRATION_FILE)
    }
}
