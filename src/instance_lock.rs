use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock next to the registry file, so two trackers never write the
/// same state
pub struct InstanceLock {
    lock_file: File,
    lock_path: PathBuf,
}

impl InstanceLock {
    /// Lock the registry stored at `state_path` (lock file: `<state_path>.lock`)
    pub fn for_state_file(state_path: &Path) -> Result<Self> {
        let lock_path = Self::lock_path(state_path);

        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    anyhow::bail!(
                        "Another tracker is already using {}. Lock file: {}",
                        state_path.display(),
                        lock_path.display()
                    );
                }
                return Err(err).context("Failed to acquire lock");
            }
        }

        // Only truncate once the lock is ours, or we would wipe the holder's PID
        lock_file.set_len(0).context("Failed to reset lock file")?;
        let pid = std::process::id();
        let mut writer = lock_file
            .try_clone()
            .context("Failed to clone file handle")?;
        writeln!(writer, "{}", pid).context("Failed to write PID to lock file")?;

        info!("Acquired instance lock at {}", lock_path.display());
        debug!("Process ID: {}", pid);

        Ok(Self {
            lock_file,
            lock_path,
        })
    }

    fn lock_path(state_path: &Path) -> PathBuf {
        let mut name = state_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.lock_file.as_raw_fd();
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
        }

        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            eprintln!("Failed to remove lock file: {}", e);
        } else {
            debug!("Released instance lock at {}", self.lock_path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_sits_next_to_state() {
        let path = InstanceLock::lock_path(Path::new("/var/lib/farewatch/state.json"));
        assert_eq!(path, PathBuf::from("/var/lib/farewatch/state.json.lock"));
    }

    #[cfg(unix)]
    #[test]
    fn test_second_lock_fails_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");

        let first = InstanceLock::for_state_file(&state).unwrap();
        assert!(first.path().exists());
        let err = InstanceLock::for_state_file(&state).err().unwrap();
        assert!(err.to_string().contains("Another tracker"));

        drop(first);
        assert!(!dir.path().join("state.json.lock").exists());
        let again = InstanceLock::for_state_file(&state);
        assert!(again.is_ok());
    }
}
