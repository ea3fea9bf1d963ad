//! Local companion server for a browser-hosted editor.
//!
//! Exposes the host filesystem, a handful of diagnostic commands, webpage
//! extraction and a local language model to the editor over one WebSocket
//! session per client, plus a small HTTP surface for static assets and
//! uploads.

pub mod ai;
pub mod config;
pub mod error;
pub mod exec;
pub mod handlers;
pub mod host;
pub mod routes;
pub mod scrape;
pub mod workspace;
pub mod ws;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use config::Config;
pub use error::{CapabilityError, HttpError};
pub use workspace::Workspace;

use ws::{Dispatcher, WsHub};

/// Directory under the root that receives uploads before they are moved.
pub const TEMP_DIR_NAME: &str = "temp";

/// Directory under the root the editor keeps its projects in.
pub const HOME_DIR_NAME: &str = "Home";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Sandboxed root for static files, uploads and session operations
    pub workspace: Workspace,
    /// Configuration
    pub config: Arc<Config>,
    /// Live realtime sessions
    pub hub: Arc<WsHub>,
    /// Request router for realtime sessions
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Create state rooted at `root_dir`, which must exist.
    pub fn new(
        root_dir: impl AsRef<Path>,
        config: Config,
        local_ip: impl Into<String>,
    ) -> std::io::Result<Self> {
        let workspace = Workspace::new(root_dir)?;
        let dispatcher = Dispatcher::new(&config, workspace.clone(), local_ip);
        Ok(Self {
            workspace,
            config: Arc::new(config),
            hub: Arc::new(WsHub::new()),
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn root_dir(&self) -> &Path {
        self.workspace.root()
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root_dir().join(TEMP_DIR_NAME)
    }

    /// Create the temp and home directories if they are missing.
    pub async fn ensure_directories(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.temp_dir()).await?;
        tokio::fs::create_dir_all(self.root_dir().join(HOME_DIR_NAME)).await?;
        Ok(())
    }
}
