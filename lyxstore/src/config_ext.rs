//! Extension de `lyxconfig::Config` pour la couche magasin
//!
//! Les clés de configuration propres au magasin restent définies ici,
//! à côté du code qui les consomme.

use crate::store::StoreOptions;
use lyxconfig::Config;

const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";

/// Accès typé à la configuration du magasin
pub trait StoreConfigExt {
    /// Répertoire des snapshots JSON, créé si besoin
    fn get_snapshot_dir(&self) -> anyhow::Result<String>;

    /// Options de comportement du magasin
    fn store_options(&self) -> StoreOptions;

    /// Identifiant du projet distant, `None` si non configuré
    fn get_remote_project_id(&self) -> Option<String>;

    /// Clé d'API du projet distant, `None` si non configurée
    fn get_remote_api_key(&self) -> Option<String>;
}

impl StoreConfigExt for Config {
    fn get_snapshot_dir(&self) -> anyhow::Result<String> {
        self.get_managed_dir(&["store", "snapshot_dir"], DEFAULT_SNAPSHOT_DIR)
    }

    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            reject_duplicate_schedule: self.get_reject_duplicate_schedule(),
            ..StoreOptions::default()
        }
    }

    fn get_remote_project_id(&self) -> Option<String> {
        self.get_remote_string("project_id")
    }

    fn get_remote_api_key(&self) -> Option<String> {
        self.get_remote_string("api_key")
    }
}
