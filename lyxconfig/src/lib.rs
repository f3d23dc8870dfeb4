//! # Module de configuration de LyriX
//!
//! Gestion de la configuration de la suite LyriX :
//! - Chargement depuis un fichier YAML externe
//! - Merge avec la configuration par défaut intégrée
//! - Overrides par variables d'environnement (`LYRIX_CONFIG__*`)
//! - Getters/setters typés, accès singleton thread-safe
//!
//! ## Usage
//!
//! ```no_run
//! use lyxconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! config.set_max_remote_devices(2)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;

/// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("lyrix.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load LyriX configuration"));
}

const ENV_CONFIG_DIR: &str = "LYRIX_CONFIG";
const ENV_PREFIX: &str = "LYRIX_CONFIG__";

const DEFAULT_HTTP_PORT: u16 = 3001;
const DEFAULT_MAX_REMOTE_DEVICES: usize = 1;
const DEFAULT_REJECT_DUPLICATE_SCHEDULE: bool = true;

/// Macro générant getter/setter pour une valeur usize avec défaut
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap() as usize,
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap() as usize,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            let n = Number::from(value);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro générant getter/setter pour une valeur bool avec défaut
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Gestionnaire de configuration de LyriX
///
/// Charge le YAML externe, le merge avec la configuration par défaut,
/// applique les overrides d'environnement et expose des accesseurs typés.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Cherche le répertoire de configuration, dans l'ordre :
    /// paramètre explicite, variable `LYRIX_CONFIG`, `.lyrix` dans le
    /// répertoire courant, `.lyrix` dans le home.
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(".lyrix").exists() {
            return ".lyrix".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".lyrix");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".lyrix".to_string()
    }

    /// Valide (et crée si besoin) le répertoire de configuration
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("Config path is not a directory"));
        }

        // Test d'écriture
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Détermine et valide le répertoire de configuration
    ///
    /// # Panics
    ///
    /// Panique si le répertoire ne peut être créé ou validé.
    pub fn config_dir(directory: &str) -> String {
        let dir_path = Self::find_config_dir(directory);
        let path = Path::new(&dir_path);

        Self::validate_config_dir(path).expect("Cannot validate LyriX config directory");

        dir_path
    }

    /// Charge la configuration depuis le répertoire indiqué
    /// (vide = découverte automatique)
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory);
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Sauvegarde la configuration courante dans config.yaml
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Positionne une valeur au chemin indiqué et sauvegarde
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()?;
        Ok(())
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key, value);
            } else {
                let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Lit une valeur au chemin indiqué
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();
                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                let key_path = key
                    .trim_start_matches(ENV_PREFIX)
                    .split("__")
                    .collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin (relatif au config_dir) et crée le répertoire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de
    /// configuration ; il est créé s'il n'existe pas.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Port HTTP du canal de contrôle (défaut 3001)
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["server", "http_port"]) {
            Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap() as u16,
            Ok(Value::String(s)) => match s.parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    tracing::warn!("Invalid HTTP port '{}', using default {}", s, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            _ => DEFAULT_HTTP_PORT,
        }
    }

    /// Change le port HTTP
    pub fn set_http_port(&self, port: u16) -> Result<()> {
        let n = Number::from(port);
        self.set_value(&["server", "http_port"], Value::Number(n))
    }

    /// Lit une chaîne de la section `remote`, `None` si absente ou vide
    pub fn get_remote_string(&self, key: &str) -> Option<String> {
        match self.get_value(&["remote", key]) {
            Ok(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    impl_usize_config!(
        get_max_remote_devices,
        set_max_remote_devices,
        &["server", "max_remote_devices"],
        DEFAULT_MAX_REMOTE_DEVICES
    );

    impl_bool_config!(
        get_reject_duplicate_schedule,
        set_reject_duplicate_schedule,
        &["store", "reject_duplicate_schedule"],
        DEFAULT_REJECT_DUPLICATE_SCHEDULE
    );
}

/// Retourne l'instance globale de configuration (chargée au premier accès)
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merge récursif du YAML externe dans la configuration par défaut
///
/// Les mappings sont fusionnés clé par clé ; les scalaires et séquences
/// externes remplacent les valeurs par défaut.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> Config {
        Config::load_config(dir.to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_defaults_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        assert_eq!(config.get_http_port(), DEFAULT_HTTP_PORT);
        assert_eq!(config.get_max_remote_devices(), DEFAULT_MAX_REMOTE_DEVICES);
        assert!(config.get_reject_duplicate_schedule());
        assert!(config.get_remote_string("project_id").is_none());
    }

    #[test]
    fn test_set_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        config.set_http_port(4200).unwrap();
        config.set_max_remote_devices(3).unwrap();
        config.set_reject_duplicate_schedule(false).unwrap();

        assert_eq!(config.get_http_port(), 4200);
        assert_eq!(config.get_max_remote_devices(), 3);
        assert!(!config.get_reject_duplicate_schedule());

        // La config rechargée depuis le disque doit refléter les sets
        let reloaded = test_config(dir.path());
        assert_eq!(reloaded.get_http_port(), 4200);
    }

    #[test]
    fn test_external_file_merged_over_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "server:\n  http_port: 9000\n",
        )
        .unwrap();

        let config = test_config(dir.path());
        assert_eq!(config.get_http_port(), 9000);
        // Les clés absentes du fichier externe gardent le défaut
        assert_eq!(config.get_max_remote_devices(), DEFAULT_MAX_REMOTE_DEVICES);
    }

    #[test]
    fn test_managed_dir_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let managed = config
            .get_managed_dir(&["store", "snapshot_dir"], "snapshots")
            .unwrap();
        assert!(Path::new(&managed).is_dir());
    }
}
