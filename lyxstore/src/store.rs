//! Le magasin central : cache mémoire, bootstrap, mutations optimistes
//!
//! `SongStore` est l'unique écrivain du cache. Toutes les surfaces de
//! présentation lisent à travers lui et s'abonnent à ses évènements ;
//! les écritures distantes partent en arrière-plan par la
//! `CommitQueue` et ne bloquent jamais l'interface.

use crate::commit::CommitQueue;
use crate::events::StoreEvent;
use crate::id::{natural_cmp, SongId};
use crate::model::{Category, ScheduleItem, Song};
use crate::remote::{BatchPlanner, RemoteStore, WriteBatch, WriteOp, SAFE_BATCH_LIMIT};
use crate::shift::{plan_shift, repair_schedule};
use crate::snapshot::SnapshotStore;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Options de comportement du magasin
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Refuse l'ajout au programme d'un cantique déjà programmé
    pub reject_duplicate_schedule: bool,
    /// Nombre maximal de résultats retournés par une recherche
    pub search_limit: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            reject_duplicate_schedule: true,
            search_limit: 2000,
        }
    }
}

struct CacheState {
    /// Recueil complet, maintenu trié en ordre naturel
    songs: Vec<Song>,
    /// Programme du service, dans l'ordre de projection
    schedule: Vec<ScheduleItem>,
}

pub(crate) struct StoreInner {
    remote: Arc<dyn RemoteStore>,
    snapshots: SnapshotStore,
    options: StoreOptions,
    cache: Mutex<CacheState>,
    events_tx: broadcast::Sender<StoreEvent>,
    commits: CommitQueue,
    /// Un verrou par préfixe : deux suppressions du même groupe ne se
    /// chevauchent jamais, commits compris
    prefix_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    initialized: AtomicBool,
}

/// Cache local du recueil et du programme, synchronisé avec le distant
///
/// Clonable à volonté : tous les clones partagent le même état.
#[derive(Clone)]
pub struct SongStore {
    inner: Arc<StoreInner>,
}

impl SongStore {
    /// Crée le magasin avec les options par défaut
    ///
    /// Doit être appelé depuis un runtime tokio : le worker de commits
    /// démarre immédiatement.
    pub fn new(remote: Arc<dyn RemoteStore>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self::new_with_options(remote, snapshot_dir, StoreOptions::default())
    }

    pub fn new_with_options(
        remote: Arc<dyn RemoteStore>,
        snapshot_dir: impl Into<PathBuf>,
        options: StoreOptions,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                remote,
                snapshots: SnapshotStore::new(snapshot_dir),
                options,
                cache: Mutex::new(CacheState {
                    songs: Vec::new(),
                    schedule: Vec::new(),
                }),
                events_tx,
                commits: CommitQueue::start(),
                prefix_locks: Mutex::new(HashMap::new()),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Crée le magasin depuis la configuration globale
    #[cfg(feature = "lyxconfig")]
    pub fn new_configured(remote: Arc<dyn RemoteStore>) -> anyhow::Result<Self> {
        use crate::config_ext::StoreConfigExt;
        let config = lyxconfig::get_config();
        let dir = config.get_snapshot_dir()?;
        Ok(Self::new_with_options(remote, dir, config.store_options()))
    }

    /// S'abonne aux évènements de mise à jour du cache
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Séquence de démarrage : disque d'abord, réseau ensuite
    ///
    /// 1. Charge les snapshots locaux et les diffuse immédiatement
    /// 2. Authentification anonyme (au mieux)
    /// 3. S'abonne au distant puis lit l'état courant (l'abonnement ne
    ///    rejoue pas l'état initial)
    /// 4. Démarre les listeners qui réalignent le cache en continu
    ///
    /// Idempotent : les appels suivants ne font rien. Aucune étape
    /// réseau n'est fatale, l'application reste utilisable hors-ligne.
    pub async fn initialize(&self) {
        if self
            .inner
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Store already initialized, skipping");
            return;
        }

        let inner = &self.inner;

        match inner.snapshots.load_songs() {
            Ok(Some(songs)) => {
                info!("Loaded {} songs from local snapshot", songs.len());
                inner.apply_songs_snapshot(songs);
            }
            Ok(None) => debug!("No local songs snapshot"),
            Err(e) => warn!("Ignoring local songs snapshot: {}", e),
        }
        match inner.snapshots.load_schedule() {
            Ok(Some(items)) => {
                info!("Loaded {} schedule items from local snapshot", items.len());
                inner.apply_schedule_snapshot(items);
            }
            Ok(None) => debug!("No local schedule snapshot"),
            Err(e) => warn!("Ignoring local schedule snapshot: {}", e),
        }

        if let Err(e) = inner.remote.sign_in().await {
            warn!("Remote sign-in failed, continuing offline: {}", e);
        }

        // Abonnement avant lecture : rien ne peut se perdre entre les deux
        let songs_rx = inner.remote.subscribe_songs();
        let schedule_rx = inner.remote.subscribe_schedule();

        match inner.remote.fetch_songs().await {
            Ok(songs) => {
                info!("Fetched {} songs from remote", songs.len());
                inner.apply_songs_snapshot(songs);
            }
            Err(e) => warn!("Initial songs fetch failed, serving local cache: {}", e),
        }
        match inner.remote.fetch_schedule().await {
            Ok(Some(items)) => inner.apply_schedule_snapshot(items),
            Ok(None) => {
                // Premier démarrage du projet : le document programme
                // est créé vide pour que les abonnements aient une base
                info!("Creating empty remote schedule document");
                if let Err(e) = inner.remote.set_schedule(&[]).await {
                    warn!("Could not create schedule document: {}", e);
                }
            }
            Err(e) => warn!("Initial schedule fetch failed, serving local cache: {}", e),
        }

        spawn_songs_listener(self.inner.clone(), songs_rx);
        spawn_schedule_listener(self.inner.clone(), schedule_rx);
        info!("🎵 Song store initialized");
    }

    /// Recueil complet, trié en ordre naturel
    pub fn songs(&self) -> Vec<Song> {
        self.inner.cache.lock().unwrap().songs.clone()
    }

    /// Programme courant, dans l'ordre de projection
    pub fn schedule(&self) -> Vec<ScheduleItem> {
        self.inner.cache.lock().unwrap().schedule.clone()
    }

    /// Résolution d'un cantique par identifiant exact
    pub fn get_song(&self, id: &str) -> Option<Song> {
        self.inner
            .cache
            .lock()
            .unwrap()
            .songs
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Recherche locale : filtre de catégorie d'abord, containment
    /// insensible à la casse ensuite, résultats plafonnés
    pub fn search(&self, query: &str, category: Option<&Category>) -> Vec<Song> {
        let needle = query.to_lowercase();
        let cache = self.inner.cache.lock().unwrap();
        cache
            .songs
            .iter()
            .filter(|song| category.map_or(true, |c| song.category == *c))
            .filter(|song| song.matches(&needle))
            .take(self.inner.options.search_limit)
            .cloned()
            .collect()
    }

    /// Prochain identifiant libre du groupe de préfixe de la catégorie
    ///
    /// Le recueil étant dense, c'est `max + 1` (ou `<préfixe>1` pour un
    /// groupe vide). Les identifiants non standards sont ignorés.
    pub fn next_id(&self, category: &Category) -> String {
        let prefix = category.prefix();
        let cache = self.inner.cache.lock().unwrap();
        let max = cache
            .songs
            .iter()
            .filter_map(|song| SongId::try_parse(&song.id))
            .filter(|id| id.prefix == prefix)
            .map(|id| id.number)
            .max()
            .unwrap_or(0);
        SongId::new(prefix, max + 1).to_string()
    }

    /// Ajoute un cantique à la fin de son groupe de préfixe
    ///
    /// L'écriture distante est synchrone et son échec est remonté :
    /// c'est la seule mutation où l'appelant doit savoir tout de suite
    /// si le document existe. Le cache est mis à jour par le listener.
    pub async fn add_song(
        &self,
        title: impl Into<String>,
        category: Category,
        slides: Vec<String>,
    ) -> Result<Song> {
        let song = Song {
            id: self.next_id(&category),
            title: title.into(),
            category,
            slides,
        };
        info!("Adding song {} ({})", song.id, song.title);
        self.inner.remote.set_song(&song).await?;
        Ok(song)
    }

    /// Remplace le contenu d'un cantique existant (l'id ne change pas)
    pub async fn update_song(&self, song: &Song) -> Result<()> {
        if self.get_song(&song.id).is_none() {
            return Err(Error::SongNotFound(song.id.clone()));
        }
        info!("Updating song {}", song.id);
        self.inner.remote.merge_song(song).await
    }

    /// Supprime un cantique et renumérote son groupe de préfixe
    ///
    /// Le cache est mis à jour de façon optimiste et l'évènement part
    /// immédiatement ; les écritures distantes suivent en arrière-plan.
    /// Les références du programme vers les cantiques déplacés sont
    /// réécrites dans la même transaction logique.
    pub async fn delete_song(&self, id: &str) -> Result<()> {
        let Some(parsed) = SongId::try_parse(id) else {
            // Identifiant hors format : suppression simple, pas de décalage
            return self.delete_nonstandard(id);
        };

        // Sérialise les suppressions d'un même groupe, commits compris :
        // le verrou est transféré au job de commit et relâché après lui
        let lock = {
            let mut locks = self.inner.prefix_locks.lock().unwrap();
            locks
                .entry(parsed.prefix.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;

        let inner = &self.inner;
        let mut planner = BatchPlanner::new(SAFE_BATCH_LIMIT);
        {
            let mut cache = inner.cache.lock().unwrap();
            let before = cache.songs.len();
            cache.songs.retain(|song| song.id != id);
            if cache.songs.len() == before {
                return Err(Error::SongNotFound(id.to_string()));
            }

            let plan = plan_shift(&cache.songs, &parsed.prefix, parsed.number);
            info!(
                "Deleting {} with {} renumber moves",
                id,
                plan.moves.len()
            );

            planner.push(WriteOp::DeleteSong(id.to_string()));
            for m in &plan.moves {
                if let Some(slot) = cache.songs.iter_mut().find(|s| s.id == m.old_id) {
                    *slot = m.song.clone();
                }
                // Écriture du nouveau document et suppression de l'ancien
                // dans le même lot, jamais séparées
                planner.push_group(vec![
                    WriteOp::SetSong(m.song.clone()),
                    WriteOp::DeleteSong(m.old_id.clone()),
                ]);
            }
            cache.songs.sort_by(|a, b| natural_cmp(&a.id, &b.id));

            if let Some(repaired) = repair_schedule(&cache.schedule, &plan) {
                cache.schedule = repaired.clone();
                planner.push(WriteOp::SetSchedule(repaired));
                // Les références réparées partent tout de suite, sans
                // attendre l'écho distant
                inner.persist_and_publish_schedule(&cache);
            }

            inner.persist_and_publish(&cache);
        }

        inner.commits.enqueue(
            format!("delete {}", id),
            planner.into_batches(),
            inner.remote.clone(),
            Some(guard),
        );
        Ok(())
    }

    fn delete_nonstandard(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        {
            let mut cache = inner.cache.lock().unwrap();
            let before = cache.songs.len();
            cache.songs.retain(|song| song.id != id);
            if cache.songs.len() == before {
                return Err(Error::SongNotFound(id.to_string()));
            }
            inner.persist_and_publish(&cache);
        }

        warn!("Deleting nonstandard id {} without renumbering", id);
        inner.commits.enqueue(
            format!("delete {}", id),
            vec![WriteBatch::single(WriteOp::DeleteSong(id.to_string()))],
            inner.remote.clone(),
            None,
        );
        Ok(())
    }

    /// Ajoute un cantique au programme (une nouvelle instance)
    pub fn add_to_schedule(&self, song_id: &str) -> Result<ScheduleItem> {
        let song = self
            .get_song(song_id)
            .ok_or_else(|| Error::SongNotFound(song_id.to_string()))?;

        let inner = &self.inner;
        let item;
        {
            let mut cache = inner.cache.lock().unwrap();
            if inner.options.reject_duplicate_schedule
                && cache.schedule.iter().any(|i| i.song_id == song_id)
            {
                return Err(Error::AlreadyScheduled(song_id.to_string()));
            }

            item = ScheduleItem::for_song(&song);
            cache.schedule.push(item.clone());
            inner.persist_and_publish_schedule(&cache);
        }

        debug!("Scheduled {} as instance {}", song_id, item.instance_id);
        inner.enqueue_schedule_write();
        Ok(item)
    }

    /// Retire une instance du programme
    pub fn remove_from_schedule(&self, instance_id: &str) -> Result<()> {
        let inner = &self.inner;
        {
            let mut cache = inner.cache.lock().unwrap();
            let before = cache.schedule.len();
            cache.schedule.retain(|item| item.instance_id != instance_id);
            if cache.schedule.len() == before {
                return Err(Error::ScheduleItemNotFound(instance_id.to_string()));
            }
            inner.persist_and_publish_schedule(&cache);
        }

        inner.enqueue_schedule_write();
        Ok(())
    }

    /// Remplace le programme entier par la séquence fournie
    ///
    /// Sémantique « l'appelant fait foi » : la séquence est prise telle
    /// quelle ; un écart de longueur avec l'état courant est seulement
    /// journalisé.
    pub fn reorder_schedule(&self, items: Vec<ScheduleItem>) -> Result<()> {
        let inner = &self.inner;
        {
            let mut cache = inner.cache.lock().unwrap();
            if items.len() != cache.schedule.len() {
                warn!(
                    "Reorder with {} items replaces a schedule of {}",
                    items.len(),
                    cache.schedule.len()
                );
            }
            cache.schedule = items;
            inner.persist_and_publish_schedule(&cache);
        }

        inner.enqueue_schedule_write();
        Ok(())
    }

    /// Attend la fin des commits en attente (tests et arrêt propre)
    pub async fn flush_commits(&self) {
        self.inner.commits.flush().await;
    }
}

impl StoreInner {
    /// Accepte un instantané complet du recueil (listener ou fetch)
    fn apply_songs_snapshot(&self, mut songs: Vec<Song>) {
        songs.sort_by(|a, b| natural_cmp(&a.id, &b.id));
        let mut cache = self.cache.lock().unwrap();
        cache.songs = songs;
        self.persist_and_publish(&cache);
    }

    /// Accepte un instantané complet du programme (listener ou fetch)
    fn apply_schedule_snapshot(&self, items: Vec<ScheduleItem>) {
        let mut cache = self.cache.lock().unwrap();
        cache.schedule = items;
        self.persist_and_publish_schedule(&cache);
    }

    fn persist_and_publish(&self, cache: &CacheState) {
        if let Err(e) = self.snapshots.save_songs(&cache.songs) {
            warn!("Songs snapshot write failed: {}", e);
        }
        let _ = self
            .events_tx
            .send(StoreEvent::SongsUpdated(cache.songs.clone()));
    }

    fn persist_and_publish_schedule(&self, cache: &CacheState) {
        if let Err(e) = self.snapshots.save_schedule(&cache.schedule) {
            warn!("Schedule snapshot write failed: {}", e);
        }
        let _ = self
            .events_tx
            .send(StoreEvent::ScheduleUpdated(cache.schedule.clone()));
    }

    fn enqueue_schedule_write(&self) {
        let items = self.cache.lock().unwrap().schedule.clone();
        self.commits.enqueue(
            "schedule",
            vec![WriteBatch::single(WriteOp::SetSchedule(items))],
            self.remote.clone(),
            None,
        );
    }
}

fn spawn_songs_listener(inner: Arc<StoreInner>, mut rx: broadcast::Receiver<Vec<Song>>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(songs) => {
                    debug!("Remote songs snapshot: {} documents", songs.len());
                    inner.apply_songs_snapshot(songs);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Seul le dernier instantané compte
                    warn!("Songs listener lagged, skipped {} snapshots", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_schedule_listener(
    inner: Arc<StoreInner>,
    mut rx: broadcast::Receiver<Vec<ScheduleItem>>,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(items) => {
                    debug!("Remote schedule snapshot: {} items", items.len());
                    inner.apply_schedule_snapshot(items);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Schedule listener lagged, skipped {} snapshots", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
