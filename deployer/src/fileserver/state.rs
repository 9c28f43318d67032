//! File server state

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::fileserver::listener::KillSwitch;
use crate::filesys::file::File;

/// State shared by the pull handlers of one running server
pub struct ServerState {
    /// Backing artifact, read-only while serving
    pub file: File,

    /// Decoded pull name the handler answers to
    pub name: String,

    /// Completed transfers, outlives the server
    pub fetches: Arc<AtomicU64>,

    /// Thrown when the server is torn down; aborts in-flight transfers
    pub kill: Arc<KillSwitch>,
}

impl ServerState {
    pub fn new(
        file: File,
        name: String,
        fetches: Arc<AtomicU64>,
        kill: Arc<KillSwitch>,
    ) -> Self {
        Self {
            file,
            name,
            fetches,
            kill,
        }
    }
}
