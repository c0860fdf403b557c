//! Current-user signal.
//!
//! The identity collaborator is a watch channel carrying `Some(user_id)` or
//! `None` for signed-out; the scheduler halts while signed out. The CLI has
//! no real authentication service behind it, so it derives a stable local
//! user id the first time it runs.

use std::path::Path;

use tokio::sync::watch;
use uuid::Uuid;

pub type UserId = String;

const USER_ID_FILE: &str = "user_id.txt";

/// Sender half, owned by whatever manages authentication.
pub struct IdentityHandle {
    tx: watch::Sender<Option<UserId>>,
}

impl IdentityHandle {
    pub fn sign_in(&self, user_id: UserId) {
        let _ = self.tx.send(Some(user_id));
    }

    pub fn sign_out(&self) {
        let _ = self.tx.send(None);
    }
}

/// Create an identity channel, initially signed out.
pub fn identity_channel() -> (IdentityHandle, watch::Receiver<Option<UserId>>) {
    let (tx, rx) = watch::channel(None);
    (IdentityHandle { tx }, rx)
}

/// Get or create the local user id stored under `dir` (uuid v4, one per
/// machine).
pub fn local_user_id_at(dir: &Path) -> Result<UserId, std::io::Error> {
    let path = dir.join(USER_ID_FILE);
    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let id = content.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }

    let id = Uuid::new_v4().to_string();
    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, format!("{id}\n"))?;
    Ok(id)
}
