//! Modèle de données : cantiques et programme de service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catégorie d'un cantique
///
/// Chaque catégorie est liée à exactement un préfixe d'identifiant.
/// Les libellés inconnus sont conservés tels quels dans `Other` et
/// retombent sur le préfixe générique `S`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    EnglishHymns,
    EnglishChoruses,
    TeluguSongs,
    HindiSongs,
    Other(String),
}

impl Category {
    /// Préfixe d'identifiant associé à la catégorie
    pub fn prefix(&self) -> &str {
        match self {
            Category::EnglishHymns => "H",
            Category::EnglishChoruses => "C",
            Category::TeluguSongs => "T",
            Category::HindiSongs => "HI",
            Category::Other(_) => "S",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Category::EnglishHymns => "English Hymns",
            Category::EnglishChoruses => "English Choruses",
            Category::TeluguSongs => "Telugu Songs",
            Category::HindiSongs => "Hindi Songs",
            Category::Other(label) => label.as_str(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s {
            "English Hymns" => Category::EnglishHymns,
            "English Choruses" => Category::EnglishChoruses,
            "Telugu Songs" => Category::TeluguSongs,
            "Hindi Songs" => Category::HindiSongs,
            other => Category::Other(other.to_string()),
        }
    }
}

impl FromStr for Category {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Category::from(s))
    }
}

impl Serialize for Category {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(value.parse().unwrap_or(Category::Other(value)))
    }
}

/// Cantique projetable
///
/// `slides` contient le texte complet de chaque diapositive (une entrée
/// par diapositive, sauts de ligne internes autorisés).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub category: Category,
    #[serde(default)]
    pub slides: Vec<String>,
}

impl Song {
    /// Test de containment insensible à la casse sur id, titre et diapositives
    ///
    /// `needle` doit déjà être en minuscules.
    pub fn matches(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.id.to_lowercase().contains(needle)
            || self.title.to_lowercase().contains(needle)
            || self
                .slides
                .iter()
                .any(|slide| slide.to_lowercase().contains(needle))
    }
}

/// Entrée du programme du service en cours
///
/// `song_id` est une référence faible : le cantique référencé peut être
/// renuméroté (la référence est alors réécrite) ou supprimé (la
/// résolution rend alors « non trouvé », jamais une erreur).
/// `title` et `category` sont des instantanés dénormalisés pour
/// l'affichage rapide des listes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    pub instance_id: String,
    pub song_id: String,
    pub title: String,
    pub category: Category,
}

impl ScheduleItem {
    /// Crée une entrée de programme pour un cantique du cache
    pub fn for_song(song: &Song) -> Self {
        Self {
            instance_id: new_instance_id(),
            song_id: song.id.clone(),
            title: song.title.clone(),
            category: song.category.clone(),
        }
    }
}

/// Génère un identifiant d'instance unique par insertion
///
/// Horodatage en millisecondes + suffixe aléatoire : deux insertions
/// dans la même milliseconde restent distinctes.
fn new_instance_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u16 = rand::random_range(0..10_000);
    format!("{}-{:04}", millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_prefix_mapping() {
        assert_eq!(Category::EnglishHymns.prefix(), "H");
        assert_eq!(Category::EnglishChoruses.prefix(), "C");
        assert_eq!(Category::TeluguSongs.prefix(), "T");
        assert_eq!(Category::HindiSongs.prefix(), "HI");
        assert_eq!(Category::Other("Youth Songs".into()).prefix(), "S");
    }

    #[test]
    fn test_category_label_roundtrip() {
        let cat: Category = "Telugu Songs".parse().unwrap();
        assert_eq!(cat, Category::TeluguSongs);

        // Un libellé inconnu survit à la désérialisation
        let json = "\"Youth Songs\"";
        let cat: Category = serde_json::from_str(json).unwrap();
        assert_eq!(cat, Category::Other("Youth Songs".into()));
        assert_eq!(serde_json::to_string(&cat).unwrap(), json);
    }

    #[test]
    fn test_song_matches() {
        let song = Song {
            id: "H47".into(),
            title: "Amazing Grace".into(),
            category: Category::EnglishHymns,
            slides: vec!["Amazing grace\nhow sweet the sound".into()],
        };

        assert!(song.matches("h47"));
        assert!(song.matches("grace"));
        assert!(song.matches("sweet the"));
        assert!(song.matches(""));
        assert!(!song.matches("chorus"));
    }

    #[test]
    fn test_schedule_item_serde_shape() {
        let song = Song {
            id: "C3".into(),
            title: "Test".into(),
            category: Category::EnglishChoruses,
            slides: vec![String::new()],
        };
        let item = ScheduleItem::for_song(&song);
        let json = serde_json::to_value(&item).unwrap();

        // Les clés suivent la forme historique des documents distants
        assert!(json.get("instanceId").is_some());
        assert_eq!(json["songId"], "C3");
        assert_eq!(json["category"], "English Choruses");
    }

    #[test]
    fn test_instance_ids_distinct() {
        let a = new_instance_id();
        let b = new_instance_id();
        assert_ne!(a, b);
    }
}
