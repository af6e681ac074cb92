use super::blob::BlobStore;
use super::document::{DocKey, DocumentStore};
use crate::error::{PixaError, Result};
use crate::model::BlobKey;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const BLOB_DIR: &str = "blobs";
const BLOB_EXT: &str = ".bin";

/// Filesystem backend.
///
/// ```text
/// <root>/
/// ├── records.json
/// ├── pending.json
/// ├── favorites.json
/// └── blobs/
///     └── img%3A<id>%3A<index>.bin
/// ```
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_dir(&self) -> PathBuf {
        self.root.join(BLOB_DIR)
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.blob_dir()
            .join(format!("{}{}", encode_key(key.as_str()), BLOB_EXT))
    }

    fn ensure_dir(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).map_err(PixaError::Io)?;
        }
        Ok(())
    }

    /// Write to a temp file in the same directory, then rename over the target.
    fn write_atomic(&self, dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(dir)?;
        let tmp = dir.join(format!(".pixa-{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, bytes).map_err(PixaError::Io)?;
        fs::rename(&tmp, target).map_err(PixaError::Io)?;
        Ok(())
    }
}

impl DocumentStore for FsBackend {
    fn read_document(&self, key: DocKey) -> Result<Option<String>> {
        let path = self.root.join(key.file_name());
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(PixaError::Io)?;
        Ok(Some(content))
    }

    fn write_document(&self, key: DocKey, json: &str) -> Result<()> {
        let target = self.root.join(key.file_name());
        self.write_atomic(&self.root, &target, json.as_bytes())
    }
}

impl BlobStore for FsBackend {
    fn put(&self, key: &BlobKey, bytes: &[u8]) -> Result<()> {
        self.write_atomic(&self.blob_dir(), &self.blob_path(key), bytes)
    }

    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path).map_err(PixaError::Io)?;
        Ok(Some(bytes))
    }

    fn delete(&self, key: &BlobKey) -> Result<()> {
        let path = self.blob_path(key);
        if path.exists() {
            fs::remove_file(path).map_err(PixaError::Io)?;
        }
        Ok(())
    }

    fn list_keys(&self) -> Result<BTreeSet<BlobKey>> {
        let dir = self.blob_dir();
        if !dir.exists() {
            return Ok(BTreeSet::new());
        }

        let mut keys = BTreeSet::new();
        for entry in fs::read_dir(&dir).map_err(PixaError::Io)? {
            let path = entry.map_err(PixaError::Io)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            // Leftover temp files from an interrupted write are not blobs.
            if name.starts_with('.') {
                continue;
            }
            if let Some(stem) = name.strip_suffix(BLOB_EXT) {
                if let Some(raw) = decode_key(stem) {
                    keys.insert(BlobKey::from_raw(raw));
                }
            }
        }
        Ok(keys)
    }

    fn contains(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.blob_path(key).is_file())
    }
}

/// Percent-escapes the characters that are unsafe in file names.
fn encode_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            _ => out.push(c),
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let mut out = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        let c = match code {
            "25" => '%',
            "3A" => ':',
            "2F" => '/',
            "5C" => '\\',
            _ => return None,
        };
        out.push(c);
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}
