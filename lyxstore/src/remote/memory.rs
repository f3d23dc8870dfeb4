//! Magasin distant en mémoire
//!
//! Implémentation de référence utilisée par les tests et comme mode
//! dégradé quand aucun projet distant n'est configuré. Reproduit les
//! traits saillants du vrai magasin : instantanés complets poussés
//! après chaque mutation, document programme absent tant que rien n'a
//! été programmé, erreurs d'écriture simulables via `set_offline`.

use super::{RemoteStore, WriteBatch, WriteOp};
use crate::model::{ScheduleItem, Song};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

struct MemoryState {
    songs: HashMap<String, Song>,
    /// `None` tant que le document programme n'a jamais été écrit
    schedule: Option<Vec<ScheduleItem>>,
}

/// Magasin distant en mémoire, partageable entre tâches
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    songs_tx: broadcast::Sender<Vec<Song>>,
    schedule_tx: broadcast::Sender<Vec<ScheduleItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (songs_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (schedule_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MemoryState {
                songs: HashMap::new(),
                schedule: None,
            }),
            offline: AtomicBool::new(false),
            songs_tx,
            schedule_tx,
        }
    }

    /// Pré-remplit la collection sans notifier les abonnés
    pub fn seed_songs(&self, songs: impl IntoIterator<Item = Song>) {
        let mut state = self.state.lock().unwrap();
        for song in songs {
            state.songs.insert(song.id.clone(), song);
        }
    }

    /// Simule une coupure réseau : toute lecture/écriture échoue
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Documents de la collection, pour inspection dans les tests
    pub fn documents(&self) -> Vec<Song> {
        let state = self.state.lock().unwrap();
        let mut songs: Vec<Song> = state.songs.values().cloned().collect();
        songs.sort_by(|a, b| crate::id::natural_cmp(&a.id, &b.id));
        songs
    }

    /// Document programme, pour inspection dans les tests
    pub fn schedule(&self) -> Option<Vec<ScheduleItem>> {
        self.state.lock().unwrap().schedule.clone()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::RemoteWrite("Remote store is offline".to_string()));
        }
        Ok(())
    }

    fn publish_songs(&self, state: &MemoryState) {
        let mut songs: Vec<Song> = state.songs.values().cloned().collect();
        songs.sort_by(|a, b| crate::id::natural_cmp(&a.id, &b.id));
        let _ = self.songs_tx.send(songs);
    }

    fn publish_schedule(&self, state: &MemoryState) {
        if let Some(items) = &state.schedule {
            let _ = self.schedule_tx.send(items.clone());
        }
    }

    fn apply_op(&self, state: &mut MemoryState, op: &WriteOp) {
        match op {
            WriteOp::SetSong(song) => {
                state.songs.insert(song.id.clone(), song.clone());
            }
            WriteOp::DeleteSong(id) => {
                state.songs.remove(id);
            }
            WriteOp::SetSchedule(items) => {
                state.schedule = Some(items.clone());
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn sign_in(&self) -> Result<()> {
        self.check_online()
            .map_err(|_| Error::Auth("Remote store is offline".to_string()))
    }

    async fn fetch_songs(&self) -> Result<Vec<Song>> {
        self.check_online()?;
        Ok(self.documents())
    }

    async fn fetch_schedule(&self) -> Result<Option<Vec<ScheduleItem>>> {
        self.check_online()?;
        Ok(self.state.lock().unwrap().schedule.clone())
    }

    async fn set_song(&self, song: &Song) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        state.songs.insert(song.id.clone(), song.clone());
        self.publish_songs(&state);
        Ok(())
    }

    async fn merge_song(&self, song: &Song) -> Result<()> {
        // Les documents cantiques sont toujours écrits entiers : le
        // merge dégénère en écriture complète
        self.set_song(song).await
    }

    async fn delete_song(&self, id: &str) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        state.songs.remove(id);
        self.publish_songs(&state);
        Ok(())
    }

    async fn set_schedule(&self, items: &[ScheduleItem]) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        state.schedule = Some(items.to_vec());
        self.publish_schedule(&state);
        Ok(())
    }

    async fn commit(&self, batch: &WriteBatch) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.lock().unwrap();
        let touches_schedule = batch
            .ops
            .iter()
            .any(|op| matches!(op, WriteOp::SetSchedule(_)));
        for op in &batch.ops {
            self.apply_op(&mut state, op);
        }
        self.publish_songs(&state);
        if touches_schedule {
            self.publish_schedule(&state);
        }
        Ok(())
    }

    fn subscribe_songs(&self) -> broadcast::Receiver<Vec<Song>> {
        self.songs_tx.subscribe()
    }

    fn subscribe_schedule(&self) -> broadcast::Receiver<Vec<ScheduleItem>> {
        self.schedule_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    fn hymn(n: u32) -> Song {
        Song {
            id: format!("H{}", n),
            title: format!("Hymn {}", n),
            category: Category::EnglishHymns,
            slides: vec![],
        }
    }

    #[tokio::test]
    async fn test_set_then_fetch() {
        let store = MemoryStore::new();
        store.set_song(&hymn(1)).await.unwrap();
        store.set_song(&hymn(2)).await.unwrap();

        let songs = store.fetch_songs().await.unwrap();
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].id, "H1");
    }

    #[tokio::test]
    async fn test_schedule_absent_until_written() {
        let store = MemoryStore::new();
        assert!(store.fetch_schedule().await.unwrap().is_none());

        store.set_schedule(&[]).await.unwrap();
        assert_eq!(store.fetch_schedule().await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_subscription_receives_snapshot() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe_songs();

        store.set_song(&hymn(1)).await.unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_applies_ops_in_order() {
        let store = MemoryStore::new();
        store.seed_songs([hymn(1), hymn(2)]);

        let batch = WriteBatch {
            ops: vec![
                WriteOp::SetSong(Song {
                    id: "H1".into(),
                    title: "Hymn 2".into(),
                    category: Category::EnglishHymns,
                    slides: vec![],
                }),
                WriteOp::DeleteSong("H2".into()),
            ],
        };
        store.commit(&batch).await.unwrap();

        let songs = store.documents();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].title, "Hymn 2");
    }

    #[tokio::test]
    async fn test_offline_rejects_writes() {
        let store = MemoryStore::new();
        store.set_offline(true);

        assert!(matches!(
            store.set_song(&hymn(1)).await,
            Err(Error::RemoteWrite(_))
        ));
        assert!(matches!(store.sign_in().await, Err(Error::Auth(_))));
    }
}
