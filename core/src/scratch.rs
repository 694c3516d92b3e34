//! Per-request scratch storage for downloaded and decoded receipt artifacts.

use std::io;
use std::path::Path;
use std::path::PathBuf;

use tempfile::TempDir;
use uuid::Uuid;

use crate::identifier::UserKey;

/// A private directory owned by one in-flight request.
///
/// The directory and everything in it is removed when the value is dropped,
/// so early returns and errors release it as well.
#[derive(Debug)]
pub struct Scratch {
    request_id: Uuid,
    dir: TempDir,
}

impl Scratch {
    pub fn create(root: &Path, user: &UserKey) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let request_id = Uuid::new_v4();
        let prefix = format!("{}-{request_id}-", sanitize(user.as_str()));
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(root)?;
        Ok(Self { request_id, dir })
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Keeps user-controlled names from escaping the scratch root.
fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(32)
        .collect();
    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned
    }
}
