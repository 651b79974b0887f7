//! Catalog snapshot storage.
//!
//! The snapshot is written once per data directory and is the unit of
//! idempotence across restarts: a rerun loads it instead of querying the
//! catalog source again.

use std::{fs, io, path::PathBuf};

use crate::envelope::{Envelope, EnvelopeError};
use crate::model::RepoDescriptor;

use super::{Result, Storage, StorageError, atomic};

const CATALOG_FILENAME: &str = "repos.json";

impl Storage {
    /// The snapshot path: `<data-dir>/repos.json`.
    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILENAME)
    }

    /// Whether a snapshot has been written for this data directory.
    pub fn has_catalog(&self) -> bool {
        self.catalog_path().is_file()
    }

    /// Loads the snapshot in its stored order.
    pub fn load_catalog(&self) -> Result<Vec<RepoDescriptor>> {
        let path = self.catalog_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::CatalogMissing(path));
            }
            Err(e) => return Err(e.into()),
        };
        let envelopes: Vec<Envelope> =
            serde_json::from_slice(&bytes).map_err(EnvelopeError::from)?;
        Ok(envelopes
            .into_iter()
            .map(Envelope::decode_as::<RepoDescriptor>)
            .collect::<core::result::Result<_, _>>()?)
    }

    /// Writes the snapshot atomically, replacing any previous one.
    pub fn save_catalog(&self, descriptors: &[RepoDescriptor]) -> Result<()> {
        let envelopes = descriptors
            .iter()
            .map(Envelope::encode)
            .collect::<core::result::Result<Vec<_>, _>>()?;
        let bytes = serde_json::to_vec_pretty(&envelopes).map_err(EnvelopeError::from)?;
        let path = self.catalog_path();
        atomic::write_bytes(&path, &bytes)
            .map_err(|source| StorageError::AtomicWrite { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("data")).unwrap();
        (dir, storage)
    }

    fn sample_catalog() -> Vec<RepoDescriptor> {
        vec![
            RepoDescriptor::from_github_name("octo/widgets", "python", false),
            RepoDescriptor::from_github_name("octo/gadgets", "python", true),
            RepoDescriptor::from_github_name("octo/widgets", "java", false),
        ]
    }

    #[test]
    fn save_and_load_catalog_preserves_order() {
        let (_dir, storage) = test_storage();
        assert!(!storage.has_catalog());

        storage.save_catalog(&sample_catalog()).unwrap();

        assert!(storage.has_catalog());
        assert_eq!(storage.load_catalog().unwrap(), sample_catalog());
    }

    #[test]
    fn load_missing_catalog_fails() {
        let (_dir, storage) = test_storage();
        let err = storage.load_catalog().unwrap_err();
        assert!(matches!(err, StorageError::CatalogMissing(_)));
    }

    #[test]
    fn catalog_with_foreign_tag_fails() {
        let (_dir, storage) = test_storage();
        fs::write(
            storage.catalog_path(),
            r#"[{"_type": "PossibleRepo", "name": "octo/widgets"}]"#,
        )
        .unwrap();

        let err = storage.load_catalog().unwrap_err();
        assert!(matches!(
            err,
            StorageError::Envelope(EnvelopeError::UnknownVariant(_))
        ));
    }

    #[test]
    fn empty_catalog_round_trips() {
        let (_dir, storage) = test_storage();
        storage.save_catalog(&[]).unwrap();
        assert!(storage.load_catalog().unwrap().is_empty());
    }
}
