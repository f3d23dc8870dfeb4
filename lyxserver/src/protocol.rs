//! Protocole du canal de contrôle
//!
//! Chaque message WebSocket est un objet JSON `{"type": ..., "payload":
//! ...}` ; les types d'évènements sont en kebab-case et les champs de
//! payload en camelCase, la forme historique attendue par les
//! télécommandes mobiles.

use lyxstore::{ScheduleItem, Song};
use serde::{Deserialize, Serialize};

/// Message entrant d'un appareil distant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Demande explicite du programme courant
    FetchSchedule,
    /// Recherche dans le recueil, filtre de catégorie optionnel
    Search {
        query: String,
        #[serde(default)]
        category: Option<String>,
    },
    /// Ajoute un cantique au programme
    AddToSchedule { song_id: String },
    /// Retire une instance du programme
    RemoveFromSchedule { instance_id: String },
    /// Remplace le programme par la séquence fournie
    ReorderSchedule { items: Vec<ScheduleItem> },
    /// Commande de projection relayée aux autres appareils
    Command { action: String },
}

/// Message sortant vers un appareil distant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Programme courant, poussé à la connexion et à chaque changement
    ScheduleUpdated { items: Vec<ScheduleItem> },
    /// Réponse à une recherche
    SearchResults { songs: Vec<Song> },
    /// Refus d'admission (limite d'appareils atteinte)
    ConnectionRejected { reason: String },
    /// Commande de projection relayée depuis un autre appareil
    Command { action: String },
    /// Échec d'une opération demandée par cet appareil
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyxstore::Category;

    #[test]
    fn test_client_message_wire_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"fetch-schedule"}"#).unwrap();
        assert_eq!(msg, ClientMessage::FetchSchedule);

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"add-to-schedule","payload":{"songId":"H12"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::AddToSchedule {
                song_id: "H12".into()
            }
        );

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"search","payload":{"query":"grace"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Search {
                query: "grace".into(),
                category: None
            }
        );
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::ScheduleUpdated {
            items: vec![ScheduleItem {
                instance_id: "1700000000000-0042".into(),
                song_id: "C3".into(),
                title: "Chorus".into(),
                category: Category::EnglishChoruses,
            }],
        };
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "schedule-updated");
        assert_eq!(json["payload"]["items"][0]["songId"], "C3");
        assert_eq!(json["payload"]["items"][0]["instanceId"], "1700000000000-0042");
    }

    #[test]
    fn test_rejection_roundtrip() {
        let msg = ServerMessage::ConnectionRejected {
            reason: "Device limit reached".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
