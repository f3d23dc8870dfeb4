//! Snapshots JSON locaux pour le bootstrap hors-ligne
//!
//! Deux fichiers réécrits intégralement à chaque mise à jour acceptée :
//! `songs.json` (tableau de cantiques) et `schedule.json` (tableau
//! d'entrées de programme). Pas de champ de version : le format est la
//! sérialisation directe des entités en mémoire.

use crate::model::{ScheduleItem, Song};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const SONGS_FILE: &str = "songs.json";
const SCHEDULE_FILE: &str = "schedule.json";

/// Persistance disque des snapshots du cache
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn songs_path(&self) -> PathBuf {
        self.dir.join(SONGS_FILE)
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.dir.join(SCHEDULE_FILE)
    }

    /// Charge le snapshot du recueil ; `Ok(None)` si le fichier n'existe pas
    pub fn load_songs(&self) -> Result<Option<Vec<Song>>> {
        load_array(&self.songs_path())
    }

    /// Charge le snapshot du programme ; `Ok(None)` si le fichier n'existe pas
    pub fn load_schedule(&self) -> Result<Option<Vec<ScheduleItem>>> {
        load_array(&self.schedule_path())
    }

    /// Réécrit intégralement le snapshot du recueil
    pub fn save_songs(&self, songs: &[Song]) -> Result<()> {
        save_array(&self.dir, &self.songs_path(), songs)
    }

    /// Réécrit intégralement le snapshot du programme
    pub fn save_schedule(&self, items: &[ScheduleItem]) -> Result<()> {
        save_array(&self.dir, &self.schedule_path(), items)
    }
}

fn load_array<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read(path)
        .map_err(|e| Error::Snapshot(format!("Failed to read {}: {}", path.display(), e)))?;
    let parsed = serde_json::from_slice(&data)
        .map_err(|e| Error::Snapshot(format!("Failed to parse {}: {}", path.display(), e)))?;

    Ok(Some(parsed))
}

fn save_array<T: serde::Serialize>(dir: &Path, path: &Path, values: &[T]) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::Snapshot(format!("Failed to create {}: {}", dir.display(), e)))?;

    let json = serde_json::to_vec_pretty(values)
        .map_err(|e| Error::Snapshot(format!("Failed to serialize snapshot: {}", e)))?;
    fs::write(path, json)
        .map_err(|e| Error::Snapshot(format!("Failed to write {}: {}", path.display(), e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    #[test]
    fn test_missing_files_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path());

        assert!(snapshots.load_songs().unwrap().is_none());
        assert!(snapshots.load_schedule().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path().join("nested"));

        let songs = vec![Song {
            id: "H1".into(),
            title: "Hymn 1".into(),
            category: Category::EnglishHymns,
            slides: vec!["verse".into()],
        }];

        snapshots.save_songs(&songs).unwrap();
        assert_eq!(snapshots.load_songs().unwrap().unwrap(), songs);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path());

        fs::write(snapshots.songs_path(), b"not json").unwrap();
        assert!(matches!(
            snapshots.load_songs(),
            Err(Error::Snapshot(_))
        ));
    }
}
