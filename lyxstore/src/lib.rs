//! # lyxstore - Cache local et synchronisation du recueil de cantiques
//!
//! Cette crate fournit la couche « base de données » de LyriX :
//! - Cache mémoire du recueil (songs) et du programme de service (schedule)
//! - Bootstrap hors-ligne depuis des snapshots JSON locaux
//! - Synchronisation continue avec le magasin distant (abonnements)
//! - Protocole de suppression avec renumérotation dense par préfixe
//! - Diffusion d'évènements vers toutes les surfaces de présentation
//!
//! # Architecture
//!
//! - **SongStore** : objet central possédant le cache (écrivain unique)
//! - **RemoteStore** : trait d'abstraction du magasin distant (Firestore
//!   REST ou backend mémoire)
//! - **SnapshotStore** : persistance JSON pour le démarrage instantané
//! - **CommitQueue** : commits réseau en arrière-plan, jamais bloquants
//!
//! # Exemple d'utilisation
//!
//! ```no_run
//! use lyxstore::{MemoryStore, SongStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> lyxstore::Result<()> {
//! let remote = Arc::new(MemoryStore::new());
//! let store = SongStore::new(remote, "./snapshots");
//!
//! // Bootstrap : disque d'abord, réseau ensuite
//! store.initialize().await;
//!
//! // Recherche locale instantanée
//! let hymns = store.search("amazing", None);
//! for song in hymns {
//!     println!("{} - {}", song.id, song.title);
//! }
//! # Ok(())
//! # }
//! ```

mod commit;
mod error;
mod events;
mod id;
mod model;
mod shift;
mod snapshot;
mod store;

pub mod remote;

#[cfg(feature = "lyxconfig")]
mod config_ext;

// Réexports publics
pub use error::{Error, Result};
pub use events::StoreEvent;
pub use id::{natural_cmp, SongId};
pub use model::{Category, ScheduleItem, Song};
pub use remote::{FirestoreStore, MemoryStore, RemoteStore, WriteBatch, WriteOp};
pub use shift::{plan_shift, repair_schedule, ShiftMove, ShiftPlan};
pub use snapshot::SnapshotStore;
pub use store::{SongStore, StoreOptions};

#[cfg(feature = "lyxconfig")]
pub use config_ext::StoreConfigExt;
