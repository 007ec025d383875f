use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rode_types::SpeedProfile;

/// Where calibrated windlass speeds go after every update.
///
/// Called from inside the control tick, so implementations must not block.
pub trait SpeedStore: Send {
    fn save(&mut self, profile: &SpeedProfile);
}

/// Load the persisted speed profile. Returns defaults if the file is missing or corrupt.
pub async fn load_speed_profile(path: &Path) -> SpeedProfile {
    if !path.exists() {
        info!("No {} found, using default windlass speeds", path.display());
        return SpeedProfile::default();
    }

    match fs::read_to_string(path).await {
        Ok(data) => match serde_json::from_str::<SpeedProfile>(&data) {
            Ok(profile) => {
                let profile = profile.sanitized();
                info!(
                    "Loaded windlass speeds (up {:.0} ms/m, down {:.0} ms/m)",
                    profile.up_ms_per_meter, profile.down_ms_per_meter
                );
                profile
            }
            Err(e) => {
                warn!("Failed to parse {}: {e}, using default speeds", path.display());
                SpeedProfile::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {e}, using default speeds", path.display());
            SpeedProfile::default()
        }
    }
}

pub async fn save_speed_profile(path: &Path, profile: &SpeedProfile) -> Result<()> {
    let json = serde_json::to_string_pretty(profile)?;
    fs::write(path, json).await?;
    Ok(())
}

/// Hands profiles to [`run_speed_writer`] over a channel.
pub struct ChannelSpeedStore {
    tx: mpsc::UnboundedSender<SpeedProfile>,
}

impl ChannelSpeedStore {
    pub fn new(tx: mpsc::UnboundedSender<SpeedProfile>) -> Self {
        Self { tx }
    }
}

impl SpeedStore for ChannelSpeedStore {
    fn save(&mut self, profile: &SpeedProfile) {
        if self.tx.send(*profile).is_err() {
            warn!("Speed writer is gone, calibration not persisted");
        }
    }
}

/// Writer task: persists every profile it receives, newest wins.
pub async fn run_speed_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<SpeedProfile>) {
    while let Some(mut profile) = rx.recv().await {
        // Collapse a burst of updates into one write.
        while let Ok(newer) = rx.try_recv() {
            profile = newer;
        }
        match save_speed_profile(&path, &profile).await {
            Ok(()) => debug!("Saved windlass speeds to {}", path.display()),
            Err(e) => warn!("Failed to save windlass speeds: {e}"),
        }
    }
}

/// Keeps the last saved profile in memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySpeedStore {
    saved: Arc<Mutex<Vec<SpeedProfile>>>,
}

impl MemorySpeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> Vec<SpeedProfile> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SpeedStore for MemorySpeedStore {
    fn save(&mut self, profile: &SpeedProfile) {
        if let Ok(mut saved) = self.saved.lock() {
            saved.push(*profile);
        }
    }
}
