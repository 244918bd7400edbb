//! SQLite-backed gallery of enrolled identities.
//!
//! Each identity owns one or more reference encodings, stored as
//! little-endian `f32` blobs. The daemon loads the whole table into an
//! in-memory [`Gallery`] at start and on reload.

use chrono::Local;
use ponto_core::matcher::{Gallery, GalleryError};
use ponto_core::types::{Encoding, Identity};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA_SQL: &str = "
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS identities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    enrolled_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS encodings (
    row_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    dimension   INTEGER NOT NULL,
    data        BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_encodings_identity ON encodings(identity_id);
";

const BACKUP_PREFIX: &str = "gallery_backup_";
const BACKUP_SUFFIX: &str = ".db";

#[derive(Error, Debug)]
pub enum GalleryStoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("no encodings given for identity {0}")]
    NoEncodings(String),
    #[error("encoding has {got} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("stored encoding for {identity} is corrupt ({bytes} bytes)")]
    CorruptEncoding { identity: String, bytes: usize },
}

/// One row of [`GalleryStore::list`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnrolledIdentity {
    pub id: String,
    pub name: String,
    pub enrolled_at: String,
    pub encodings: usize,
}

pub struct GalleryStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl GalleryStore {
    /// Open or create the gallery database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GalleryStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = %path.display(), "gallery database opened");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn in_memory() -> Result<Self, GalleryStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Enroll `identity` with the given captures, replacing any previous
    /// references. With `average`, the captures are stored as one mean encoding.
    ///
    /// Returns the number of reference encodings stored.
    pub fn enroll(
        &mut self,
        identity: &Identity,
        captures: &[Encoding],
        average: bool,
    ) -> Result<usize, GalleryStoreError> {
        if captures.is_empty() {
            return Err(GalleryStoreError::NoEncodings(identity.id.clone()));
        }
        let references = if average {
            let first = captures[0].len();
            let mean = Encoding::mean(captures).ok_or_else(|| GalleryStoreError::DimensionMismatch {
                expected: first,
                got: captures.iter().map(Encoding::len).find(|&n| n != first).unwrap_or(0),
            })?;
            vec![mean]
        } else {
            captures.to_vec()
        };

        let expected = match self.dimension_excluding(&identity.id)? {
            Some(dim) => dim,
            None => references[0].len(),
        };
        for encoding in &references {
            if encoding.is_empty() {
                return Err(GalleryError::EmptyEncoding(identity.id.clone()).into());
            }
            if encoding.len() != expected {
                return Err(GalleryStoreError::DimensionMismatch {
                    expected,
                    got: encoding.len(),
                });
            }
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO identities (id, name, enrolled_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, enrolled_at = excluded.enrolled_at",
            params![identity.id, identity.name, Local::now().to_rfc3339()],
        )?;
        tx.execute("DELETE FROM encodings WHERE identity_id = ?1", params![identity.id])?;
        for encoding in &references {
            tx.execute(
                "INSERT INTO encodings (identity_id, dimension, data) VALUES (?1, ?2, ?3)",
                params![identity.id, encoding.len() as i64, encode_blob(encoding)],
            )?;
        }
        tx.commit()?;

        tracing::info!(
            employee_id = %identity.id,
            employee_name = %identity.name,
            references = references.len(),
            "identity enrolled"
        );
        Ok(references.len())
    }

    /// Dimension used by the rest of the gallery, ignoring `identity_id`.
    fn dimension_excluding(&self, identity_id: &str) -> Result<Option<usize>, GalleryStoreError> {
        let dim: Option<i64> = self
            .conn
            .query_row(
                "SELECT dimension FROM encodings WHERE identity_id != ?1 LIMIT 1",
                params![identity_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dim.map(|d| d as usize))
    }

    pub fn list(&self) -> Result<Vec<EnrolledIdentity>, GalleryStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.enrolled_at, COUNT(e.row_id)
             FROM identities i LEFT JOIN encodings e ON e.identity_id = i.id
             GROUP BY i.id ORDER BY i.name, i.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EnrolledIdentity {
                id: row.get(0)?,
                name: row.get(1)?,
                enrolled_at: row.get(2)?,
                encodings: row.get::<_, i64>(3)? as usize,
            })
        })?;
        let listed = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(listed)
    }

    /// Remove an identity and its encodings. Returns false if it was not enrolled.
    pub fn remove(&mut self, identity_id: &str) -> Result<bool, GalleryStoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM identities WHERE id = ?1", params![identity_id])?;
        if removed > 0 {
            tracing::info!(employee_id = identity_id, "identity removed");
        }
        Ok(removed > 0)
    }

    /// Load every reference encoding into an in-memory gallery.
    pub fn load_gallery(&self) -> Result<Gallery, GalleryStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, e.data
             FROM encodings e JOIN identities i ON i.id = e.identity_id
             ORDER BY e.row_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, name, blob) = row?;
            let encoding = decode_blob(&blob).ok_or_else(|| GalleryStoreError::CorruptEncoding {
                identity: id.clone(),
                bytes: blob.len(),
            })?;
            entries.push((Identity::new(id, name), encoding));
        }

        let gallery = Gallery::from_entries(entries)?;
        tracing::info!(
            identities = gallery.identity_count(),
            references = gallery.len(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Copy the database into `dir` and keep only the `max_backups` newest copies.
    pub fn backup(&self, dir: &Path, max_backups: usize) -> Result<PathBuf, GalleryStoreError> {
        std::fs::create_dir_all(dir)?;
        let name = format!(
            "{BACKUP_PREFIX}{}{BACKUP_SUFFIX}",
            Local::now().format("%Y%m%d_%H%M%S_%3f")
        );
        let target = dir.join(name);
        self.conn.backup(DatabaseName::Main, &target, None)?;
        tracing::debug!(path = %target.display(), "gallery backup created");

        prune_backups(dir, max_backups)?;
        Ok(target)
    }
}

/// Delete all but the `keep` newest backups in `dir`. Returns how many were removed.
pub fn prune_backups(dir: &Path, keep: usize) -> Result<usize, GalleryStoreError> {
    let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(BACKUP_SUFFIX))
        })
        .collect();
    // Names embed a sortable timestamp; newest first.
    backups.sort();
    backups.reverse();

    let mut removed = 0;
    for stale in backups.iter().skip(keep) {
        match std::fs::remove_file(stale) {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(path = %stale.display(), error = %err, "failed to remove old backup"),
        }
    }
    if removed > 0 {
        tracing::debug!(removed, keep, "old gallery backups pruned");
    }
    Ok(removed)
}

fn encode_blob(encoding: &Encoding) -> Vec<u8> {
    encoding.values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_blob(blob: &[u8]) -> Option<Encoding> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return None;
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some(Encoding::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ponto-gallery-{tag}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn enc(values: &[f32]) -> Encoding {
        Encoding::new(values.to_vec())
    }

    #[test]
    fn test_enroll_list_load() {
        let mut store = GalleryStore::in_memory().unwrap();
        let ana = Identity::new("E1", "Ana");
        let bia = Identity::new("E2", "Bia");
        assert_eq!(store.enroll(&ana, &[enc(&[0.1, 0.2]), enc(&[0.3, 0.4])], false).unwrap(), 2);
        assert_eq!(store.enroll(&bia, &[enc(&[1.0, 1.0])], false).unwrap(), 1);

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!((listed[0].id.as_str(), listed[0].encodings), ("E1", 2));
        assert_eq!((listed[1].id.as_str(), listed[1].encodings), ("E2", 1));

        let gallery = store.load_gallery().unwrap();
        assert_eq!(gallery.len(), 3);
        assert_eq!(gallery.identity_count(), 2);
        assert_eq!(gallery.dimension(), 2);
        assert_eq!(gallery.identity(2).unwrap().name, "Bia");
        assert!((gallery.encodings()[[1, 1]] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_enroll_average_and_replace() {
        let mut store = GalleryStore::in_memory().unwrap();
        let ana = Identity::new("E1", "Ana");
        store.enroll(&ana, &[enc(&[0.0, 0.0])], false).unwrap();
        let stored = store
            .enroll(&Identity::new("E1", "Ana Maria"), &[enc(&[0.0, 2.0]), enc(&[2.0, 0.0])], true)
            .unwrap();
        assert_eq!(stored, 1);

        let gallery = store.load_gallery().unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.identity(0).unwrap().name, "Ana Maria");
        assert_eq!(gallery.encodings().row(0).to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_enroll_rejects_bad_input() {
        let mut store = GalleryStore::in_memory().unwrap();
        let ana = Identity::new("E1", "Ana");
        assert!(matches!(store.enroll(&ana, &[], false), Err(GalleryStoreError::NoEncodings(_))));

        store.enroll(&ana, &[enc(&[0.0, 0.0])], false).unwrap();
        let bia = Identity::new("E2", "Bia");
        assert!(matches!(
            store.enroll(&bia, &[enc(&[0.0, 0.0, 0.0])], false),
            Err(GalleryStoreError::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert!(matches!(
            store.enroll(&bia, &[enc(&[0.0, 0.0]), enc(&[0.0])], true),
            Err(GalleryStoreError::DimensionMismatch { .. })
        ));
        // The sole identity may change dimension when re-enrolled.
        assert_eq!(store.enroll(&ana, &[enc(&[0.0, 0.0, 0.0])], false).unwrap(), 1);
    }

    #[test]
    fn test_remove_cascades() {
        let mut store = GalleryStore::in_memory().unwrap();
        store.enroll(&Identity::new("E1", "Ana"), &[enc(&[0.5])], false).unwrap();
        assert!(store.remove("E1").unwrap());
        assert!(!store.remove("E1").unwrap());
        assert!(store.load_gallery().unwrap().is_empty());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_blob_roundtrip_and_corruption() {
        let original = enc(&[-0.5, 1.25, f32::MIN_POSITIVE]);
        assert_eq!(decode_blob(&encode_blob(&original)), Some(original));
        assert_eq!(decode_blob(&[0, 1, 2]), None);
        assert_eq!(decode_blob(&[]), None);
    }

    #[test]
    fn test_backup_rotation() {
        let dir = temp_dir("backup");
        let mut store = GalleryStore::open(dir.join("gallery.db")).unwrap();
        store.enroll(&Identity::new("E1", "Ana"), &[enc(&[0.5, 0.5])], false).unwrap();

        for i in 0..3 {
            std::fs::write(dir.join(format!("{BACKUP_PREFIX}20200101_00000{i}_000{BACKUP_SUFFIX}")), b"old").unwrap();
        }
        let latest = store.backup(&dir, 2).unwrap();
        assert!(latest.exists());

        let mut remaining: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok()?.file_name().into_string().ok())
            .filter(|n| n.starts_with(BACKUP_PREFIX))
            .collect();
        remaining.sort();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0], format!("{BACKUP_PREFIX}20200101_000002_000{BACKUP_SUFFIX}"));

        let restored = GalleryStore::open(&latest).unwrap().load_gallery().unwrap();
        assert_eq!(restored.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
