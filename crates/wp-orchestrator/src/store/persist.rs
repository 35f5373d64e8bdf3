//! JSON snapshot on disk
//!
//! Writes go to `<file>.tmp` and are renamed over the destination, so a crash
//! mid-write never leaves a truncated snapshot behind.

use std::path::{Path, PathBuf};

use wp_core::{PersistenceHealth, SystemState};

use super::patch::normalize;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write the snapshot
pub(crate) async fn save(path: &Path, state: &SystemState) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(state)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &json).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Load a snapshot, falling back to defaults when missing or unreadable.
///
/// Tunnel fields never survive a restart and persistence bookkeeping starts
/// fresh for the new process.
pub(crate) async fn load(path: &Path) -> SystemState {
    let mut state = match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<SystemState>(&bytes) {
            Ok(state) => {
                tracing::info!("Loaded state snapshot from {:?}", path);
                state
            }
            Err(e) => {
                tracing::warn!("Ignoring corrupt state snapshot {:?}: {}", path, e);
                SystemState::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No state snapshot at {:?}", path);
            SystemState::default()
        }
        Err(e) => {
            tracing::warn!("Failed to read state snapshot {:?}: {}", path, e);
            SystemState::default()
        }
    };

    state.tunnel_url = None;
    state.tunnel_provider = None;
    state.persistence_health = PersistenceHealth::Healthy;
    state.persistence_failures = 0;
    normalize(&mut state);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use wp_core::ConnectionState;

    #[test]
    fn test_tmp_path_is_sibling() {
        let tmp = tmp_path(Path::new("/var/lib/wp/state.json"));
        assert_eq!(tmp, PathBuf::from("/var/lib/wp/state.json.tmp"));
    }

    #[tokio::test]
    async fn test_load_discards_tunnel_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = SystemState {
            connection_state: ConnectionState::Connected,
            tunnel_url: Some("https://abc.lhr.life".to_string()),
            tunnel_provider: Some("localhost.run".to_string()),
            ap_password: Some("abcdefgh1234".to_string()),
            ..SystemState::default()
        };
        save(&path, &state).await.unwrap();
        assert!(!tmp_path(&path).exists());

        let loaded = load(&path).await;
        assert_eq!(loaded.connection_state, ConnectionState::Connected);
        assert_eq!(loaded.ap_password.as_deref(), Some("abcdefgh1234"));
        assert!(loaded.tunnel_url.is_none());
        assert!(loaded.tunnel_provider.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        assert_eq!(load(&path).await, SystemState::default());
    }
}
