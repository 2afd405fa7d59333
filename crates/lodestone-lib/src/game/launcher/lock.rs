/// Advisory per-version launch lock
use crate::error::LaunchError;
use crate::layout::DataLayout;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Holds `versions/<id>/.lock` for the duration of a launch. The file
/// stores the owner pid; a lock whose owner is no longer alive counts as
/// stale and gets reclaimed. Released on drop, so a normal process exit
/// always frees it.
#[derive(Debug)]
pub struct LaunchLock {
    path: PathBuf,
}

impl LaunchLock {
    pub fn acquire(layout: &DataLayout, version_id: &str) -> Result<Self, LaunchError> {
        let path = layout.launch_lock_path(version_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                if pid_alive(pid) {
                    return Err(LaunchError::AlreadyRunning {
                        version: version_id.to_string(),
                        pid,
                    });
                }
                log::info!(
                    "Reclaiming stale launch lock for {} (pid {} is gone)",
                    version_id,
                    pid
                );
            }
            let _ = std::fs::remove_file(&path);
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Lost the race against another launcher process.
                let pid = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(0);
                return Err(LaunchError::AlreadyRunning {
                    version: version_id.to_string(),
                    pid,
                });
            }
            Err(e) => return Err(e.into()),
        };

        write!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }
}

impl Drop for LaunchLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to release launch lock {}: {}", self.path.display(), e);
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system.process(target).is_some()
}
