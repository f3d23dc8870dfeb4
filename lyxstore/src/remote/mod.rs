//! Abstraction du magasin distant (base documentaire cloud)
//!
//! Le moteur de synchronisation ne connaît que ce trait : une
//! collection de documents cantiques indexée par identifiant, un
//! document unique pour le programme, des écritures par lots bornées et
//! des abonnements livrant des instantanés complets.

mod batch;
mod firestore;
mod memory;

pub use batch::{plan_batches, BatchPlanner, WriteBatch, WriteOp, HARD_BATCH_LIMIT, SAFE_BATCH_LIMIT};
pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use crate::model::{ScheduleItem, Song};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Magasin distant de documents
///
/// Les abonnements livrent l'instantané complet de la collection (ou du
/// document programme) à chaque changement ; ils ne rejouent pas l'état
/// courant à l'abonnement, d'où les lectures `fetch_*` d'amorçage.
/// Un listener en erreur est journalisé et se rétablit de lui-même :
/// la valeur précédente du cache reste servie entre-temps.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Authentification anonyme, au mieux ; l'échec n'est pas fatal
    async fn sign_in(&self) -> Result<()>;

    /// Lit la collection complète des cantiques
    async fn fetch_songs(&self) -> Result<Vec<Song>>;

    /// Lit le document programme ; `Ok(None)` s'il n'existe pas encore
    async fn fetch_schedule(&self) -> Result<Option<Vec<ScheduleItem>>>;

    /// Écrit le document complet à la clé `song.id`
    async fn set_song(&self, song: &Song) -> Result<()>;

    /// Merge les champs sur le document existant à la clé `song.id`
    async fn merge_song(&self, song: &Song) -> Result<()>;

    /// Supprime le document à la clé `id`
    async fn delete_song(&self, id: &str) -> Result<()>;

    /// Réécrit intégralement le document programme
    async fn set_schedule(&self, items: &[ScheduleItem]) -> Result<()>;

    /// Applique un lot ordonné d'écritures, atomique côté magasin
    async fn commit(&self, batch: &WriteBatch) -> Result<()>;

    /// Instantanés successifs de la collection des cantiques
    fn subscribe_songs(&self) -> broadcast::Receiver<Vec<Song>>;

    /// Instantanés successifs du programme
    fn subscribe_schedule(&self) -> broadcast::Receiver<Vec<ScheduleItem>>;

    /// Plafond dur d'opérations par lot côté magasin
    fn max_batch_ops(&self) -> usize {
        HARD_BATCH_LIMIT
    }
}
