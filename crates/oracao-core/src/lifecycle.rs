//! Registration state: which generation is installing, waiting or active,
//! and which generation controls each open page.
//!
//! ```text
//! Registration (scope)
//!     ├── installing  (Generation)
//!     ├── waiting     (Generation)
//!     ├── active      (Generation)
//!     └── clients     (open pages → controlling version)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Installing,
    /// Installed, waiting for activation.
    Installed,
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced by a newer generation, or its install failed.
    Redundant,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// One worker version and its cache bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub version: String,
    pub cache_name: String,
    pub state: WorkerState,
    pub state_changed_at: DateTime<Utc>,
}

impl Generation {
    pub fn new(version: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            cache_name: cache_name.into(),
            state: WorkerState::Installing,
            state_changed_at: Utc::now(),
        }
    }

    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Utc::now();
    }
}

/// An open page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub url: Url,
    /// Version of the generation controlling this page, if any.
    pub controller: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub scope: Url,
    pub installing: Option<Generation>,
    pub waiting: Option<Generation>,
    pub active: Option<Generation>,
    #[serde(default)]
    pub clients: Vec<Client>,
    /// Set by skip-waiting; cleared once the waiting generation activates.
    #[serde(default)]
    pub skip_waiting: bool,
    #[serde(default)]
    pub navigation_preload_enabled: bool,
    #[serde(default)]
    next_client_id: u64,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            clients: Vec::new(),
            skip_waiting: false,
            navigation_preload_enabled: false,
            next_client_id: 1,
        }
    }

    pub fn active_version(&self) -> Option<&str> {
        self.active.as_ref().map(|g| g.version.as_str())
    }

    pub fn is_controlled(&self) -> bool {
        self.active.is_some()
    }

    /// Start installing a new generation, replacing any unfinished install.
    /// A skip-waiting request made for an earlier generation does not carry
    /// over.
    pub fn begin_install(&mut self, generation: Generation) {
        self.skip_waiting = false;
        if let Some(mut stale) = self.installing.replace(generation) {
            stale.set_state(WorkerState::Redundant);
        }
    }

    /// Move the installing generation to waiting. A previously waiting
    /// generation that never activated becomes redundant.
    pub fn install_complete(&mut self) {
        if let Some(mut generation) = self.installing.take() {
            generation.set_state(WorkerState::Installed);
            if let Some(mut superseded) = self.waiting.replace(generation) {
                superseded.set_state(WorkerState::Redundant);
            }
        }
    }

    pub fn install_failed(&mut self) {
        if let Some(mut generation) = self.installing.take() {
            generation.set_state(WorkerState::Redundant);
        }
    }

    /// Request that the waiting generation activate without waiting for
    /// the pages of the current one to close. Returns false, and records
    /// nothing, when no generation is waiting.
    pub fn request_skip_waiting(&mut self) -> bool {
        if self.waiting.is_none() {
            return false;
        }
        self.skip_waiting = true;
        true
    }

    /// Pages still controlled by the active generation.
    pub fn clients_of_active(&self) -> usize {
        match self.active_version() {
            Some(version) => self
                .clients
                .iter()
                .filter(|c| c.controller.as_deref() == Some(version))
                .count(),
            None => 0,
        }
    }

    /// A waiting generation may activate when skip-waiting was requested or
    /// no page is controlled by the current active generation.
    pub fn can_activate(&self) -> bool {
        self.waiting.is_some() && (self.skip_waiting || self.clients_of_active() == 0)
    }

    /// Promote the waiting generation; the old active one becomes redundant.
    /// Returns false if nothing was waiting.
    pub fn begin_activate(&mut self) -> bool {
        let Some(mut generation) = self.waiting.take() else {
            return false;
        };
        generation.set_state(WorkerState::Activating);
        if let Some(mut old) = self.active.replace(generation) {
            old.set_state(WorkerState::Redundant);
        }
        self.skip_waiting = false;
        true
    }

    pub fn activate_complete(&mut self) {
        if let Some(ref mut generation) = self.active {
            generation.set_state(WorkerState::Activated);
        }
    }

    /// Make the active generation control every open page. Returns how many
    /// pages changed controller.
    pub fn claim(&mut self) -> usize {
        let Some(version) = self.active_version().map(str::to_string) else {
            return 0;
        };
        let mut claimed = 0;
        for client in &mut self.clients {
            if client.controller.as_deref() != Some(version.as_str()) {
                client.controller = Some(version.clone());
                claimed += 1;
            }
        }
        claimed
    }

    /// Register an open page. New pages are controlled by the active
    /// generation, if there is one.
    pub fn open_client(&mut self, url: Url) -> String {
        let id = format!("client-{}", self.next_client_id);
        self.next_client_id += 1;
        let controller = self.active_version().map(str::to_string);
        self.clients.push(Client {
            id: id.clone(),
            url,
            controller,
        });
        id
    }

    pub fn close_client(&mut self, id: &str) -> Option<Client> {
        let index = self.clients.iter().position(|c| c.id == id)?;
        Some(self.clients.remove(index))
    }

    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }
}
