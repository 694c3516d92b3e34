use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use super::StoreError;

/// Number of `.bak{N}` copies kept for a store file that could not be parsed.
pub(crate) const BACKUP_RETENTION: usize = 3;

/// One JSON snapshot file on disk.
///
/// A file that exists but does not parse is loaded as empty and marked for
/// backup; the backup is taken right before the first rewrite so the
/// unreadable contents are never lost.
#[derive(Debug)]
pub(crate) struct SnapshotFile {
    path: PathBuf,
    pending_backup: bool,
}

impl SnapshotFile {
    /// Load the snapshot at `path`. Missing or empty files load as
    /// `T::default()`.
    pub(crate) fn load<T>(path: PathBuf) -> (Self, T)
    where
        T: DeserializeOwned + Default,
    {
        let (value, pending_backup) = read_snapshot(&path);
        (
            Self {
                path,
                pending_backup,
            },
            value,
        )
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file on disk failed to parse and has not been backed up
    /// yet.
    pub(crate) fn is_damaged(&self) -> bool {
        self.pending_backup
    }

    pub(crate) fn save<T>(&mut self, value: &T) -> Result<(), StoreError>
    where
        T: Serialize,
    {
        if self.pending_backup {
            let backup =
                backup_with_rotation(&self.path).map_err(|source| StoreError::Backup {
                    path: self.path.clone(),
                    source,
                })?;
            tracing::warn!(
                path = %self.path.display(),
                backup = %backup.display(),
                "saved a copy of the unreadable store before rewriting it"
            );
            self.pending_backup = false;
        }
        write_atomic(&self.path, value)
    }
}

/// Returns the parsed value and whether the file exists but is unparseable.
fn read_snapshot<T>(path: &Path) -> (T, bool)
where
    T: DeserializeOwned + Default,
{
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return (T::default(), false),
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "failed to read store; starting empty");
            return (T::default(), false);
        }
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return (T::default(), false);
    }
    match serde_json::from_slice(&data) {
        Ok(value) => (value, false),
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "store is corrupt; starting empty");
            (T::default(), true)
        }
    }
}

/// Copy `path` to `<path>.bak1`, shifting older copies up to
/// [`BACKUP_RETENTION`].
pub(crate) fn backup_with_rotation(path: &Path) -> std::io::Result<PathBuf> {
    for idx in (1..=BACKUP_RETENTION).rev() {
        let src = backup_path(path, idx);
        if !src.exists() {
            continue;
        }
        if idx == BACKUP_RETENTION {
            fs::remove_file(&src)?;
        } else {
            fs::rename(&src, backup_path(path, idx + 1))?;
        }
    }
    let bak1 = backup_path(path, 1);
    fs::copy(path, &bak1)?;
    Ok(bak1)
}

pub(crate) fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".bak{index}"));
    PathBuf::from(name)
}

/// Rewrite the whole snapshot: serialise into a temp file next to the
/// target, flush it, then rename it over the target.
pub(crate) fn write_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize,
{
    let data = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let write = || -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    };
    write().map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}
