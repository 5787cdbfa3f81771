use chrono::Local;
use log::{info, warn};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// One operator log file, opened at session start.
struct SessionLog {
    file: File,
    path: PathBuf,
}

impl SessionLog {
    fn create(dir: &Path) -> io::Result<Self> {
        let name = format!("log_{}.txt", Local::now().format("%Y-%m-%d_%H-%M-%S"));
        let path = dir.join(name);
        let file = File::create(&path)?;
        Ok(Self { file, path })
    }

    fn append(&mut self, message: &str) -> io::Result<()> {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(self.file, "{} - {}", ts, message)?;
        self.file.flush()
    }
}

/// Shared handle to the current session's log. Appending while no
/// session is open is a no-op.
#[derive(Clone, Default)]
pub struct SessionLogger {
    inner: Arc<Mutex<Option<SessionLog>>>,
}

impl SessionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Option<SessionLog>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Open a fresh file in `dir`, closing any previous one.
    pub fn open(&self, dir: &Path) -> io::Result<PathBuf> {
        let log = SessionLog::create(dir)?;
        let path = log.path.clone();
        *self.guard() = Some(log);
        info!("Log file created: {}", path.display());
        Ok(path)
    }

    pub fn close(&self) {
        self.guard().take();
    }

    pub fn log(&self, message: &str) {
        if let Some(log) = self.guard().as_mut() {
            if let Err(e) = log.append(message) {
                warn!("session log write to {} failed: {}", log.path.display(), e);
            }
        }
    }
}
