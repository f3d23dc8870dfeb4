//! Évènements diffusés par le store vers les surfaces de présentation
//!
//! Chaque mutation acceptée du cache publie exactement un évènement.
//! Les abonnés sont passifs et doivent tolérer de recevoir plusieurs
//! fois la même valeur (la dernière gagne).

use crate::model::{ScheduleItem, Song};

/// Évènement de mise à jour du cache
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// Le recueil a changé ; payload = cache complet trié naturellement
    SongsUpdated(Vec<Song>),
    /// Le programme a changé ; payload = séquence complète ordonnée
    ScheduleUpdated(Vec<ScheduleItem>),
}
