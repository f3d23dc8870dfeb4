//! Plan de renumérotation après suppression d'un cantique
//!
//! La suppression du numéro N d'un groupe de préfixe fait descendre
//! d'un cran tous les numéros supérieurs : le recueil reste une
//! séquence dense commençant à 1 (sémantique « livre de cantiques » :
//! si le groupe contient 48 entrées, le n°47 existe toujours).
//!
//! Le calcul est pur : il part d'un instantané du cache et ne touche ni
//! au cache ni au réseau. L'application optimiste et les commits sont
//! la responsabilité du `SongStore`.

use crate::id::SongId;
use crate::model::{ScheduleItem, Song};

/// Déplacement d'un cantique vers son identifiant décrémenté
#[derive(Debug, Clone)]
pub struct ShiftMove {
    pub old_id: String,
    pub new_id: String,
    /// Document complet réétiqueté (id = `new_id`)
    pub song: Song,
}

/// Plan complet de renumérotation pour une suppression
#[derive(Debug, Clone)]
pub struct ShiftPlan {
    pub prefix: String,
    pub deleted_number: u32,
    /// Déplacements en ordre croissant de numéro (n+1 -> n d'abord)
    pub moves: Vec<ShiftMove>,
}

impl ShiftPlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

/// Calcule le plan de renumérotation à partir d'un instantané du cache
///
/// `songs` est l'état du cache après retrait du cantique supprimé. Seuls
/// les identifiants standards du même préfixe avec un numéro strictement
/// supérieur à `deleted_number` participent au plan ; les identifiants
/// non standards sont ignorés.
pub fn plan_shift(songs: &[Song], prefix: &str, deleted_number: u32) -> ShiftPlan {
    let mut tail: Vec<(u32, &Song)> = songs
        .iter()
        .filter_map(|song| {
            let id = SongId::try_parse(&song.id)?;
            (id.prefix == prefix && id.number > deleted_number).then_some((id.number, song))
        })
        .collect();
    tail.sort_by_key(|(number, _)| *number);

    let moves = tail
        .into_iter()
        .map(|(number, song)| {
            let new_id = SongId::new(prefix, number - 1).to_string();
            let mut relabelled = song.clone();
            relabelled.id = new_id.clone();
            ShiftMove {
                old_id: song.id.clone(),
                new_id,
                song: relabelled,
            }
        })
        .collect();

    ShiftPlan {
        prefix: prefix.to_string(),
        deleted_number,
        moves,
    }
}

/// Réécrit les références du programme vers les identifiants décalés
///
/// Retourne `None` si aucune entrée ne référençait un cantique déplacé
/// (le document programme n'a alors pas besoin d'être réécrit). Les
/// références vers le cantique supprimé lui-même sont laissées telles
/// quelles : elles deviennent pendantes et la résolution à la lecture
/// doit rendre « non trouvé ».
pub fn repair_schedule(items: &[ScheduleItem], plan: &ShiftPlan) -> Option<Vec<ScheduleItem>> {
    if plan.is_empty() {
        return None;
    }

    let mut changed = false;
    let repaired: Vec<ScheduleItem> = items
        .iter()
        .map(|item| {
            match plan.moves.iter().find(|m| m.old_id == item.song_id) {
                Some(moved) => {
                    changed = true;
                    let mut item = item.clone();
                    item.song_id = moved.new_id.clone();
                    item
                }
                None => item.clone(),
            }
        })
        .collect();

    changed.then_some(repaired)
}
