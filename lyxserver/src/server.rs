//! Serveur WebSocket du canal de contrôle
//!
//! Un socket par appareil distant. Chaque socket relaie les évènements
//! `ScheduleUpdated` du magasin, répond aux requêtes de l'appareil et
//! rediffuse les commandes de projection aux autres appareils. Les
//! mutations passent toutes par le `SongStore` : le serveur ne possède
//! aucun état métier.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::status::{guess_local_ip, ServerStatus};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use lyxstore::{Category, SongStore, StoreEvent};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 16;

/// État partagé entre tous les sockets
pub struct ServerState {
    store: SongStore,
    max_devices: usize,
    connections: AtomicUsize,
    next_conn_id: AtomicUsize,
    /// Port effectivement lié, renseigné au démarrage
    port: AtomicU16,
    /// Commandes de projection : (id du socket émetteur, action)
    command_tx: broadcast::Sender<(usize, String)>,
}

impl ServerState {
    pub fn new(store: SongStore, max_devices: usize) -> Self {
        let (command_tx, _) = broadcast::channel(COMMAND_CAPACITY);
        Self {
            store,
            max_devices,
            connections: AtomicUsize::new(0),
            next_conn_id: AtomicUsize::new(0),
            port: AtomicU16::new(0),
            command_tx,
        }
    }

    /// État courant du canal de contrôle
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            status: "online".to_string(),
            ip: guess_local_ip(),
            port: self.port.load(Ordering::SeqCst),
            connections: self.connections(),
        }
    }

    /// Tente d'admettre un appareil supplémentaire
    pub fn try_admit(&self) -> bool {
        let mut current = self.connections.load(Ordering::SeqCst);
        loop {
            if current >= self.max_devices {
                return false;
            }
            match self.connections.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Libère la place d'un appareil déconnecté
    pub fn release(&self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }

    /// Nombre d'appareils actuellement connectés
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn handle(&self, conn_id: usize, msg: ClientMessage) -> Option<ServerMessage> {
        match msg {
            ClientMessage::FetchSchedule => Some(ServerMessage::ScheduleUpdated {
                items: self.store.schedule(),
            }),
            ClientMessage::Search { query, category } => {
                // "All" est la sentinelle historique pour « pas de filtre »
                let category = category
                    .as_deref()
                    .filter(|label| *label != "All")
                    .map(Category::from);
                Some(ServerMessage::SearchResults {
                    songs: self.store.search(&query, category.as_ref()),
                })
            }
            ClientMessage::AddToSchedule { song_id } => {
                match self.store.add_to_schedule(&song_id) {
                    // La mise à jour part par l'évènement du magasin
                    Ok(_) => None,
                    Err(e) => Some(ServerMessage::Error {
                        message: e.to_string(),
                    }),
                }
            }
            ClientMessage::RemoveFromSchedule { instance_id } => {
                match self.store.remove_from_schedule(&instance_id) {
                    Ok(()) => None,
                    Err(e) => Some(ServerMessage::Error {
                        message: e.to_string(),
                    }),
                }
            }
            ClientMessage::ReorderSchedule { items } => {
                match self.store.reorder_schedule(items) {
                    Ok(()) => None,
                    Err(e) => Some(ServerMessage::Error {
                        message: e.to_string(),
                    }),
                }
            }
            ClientMessage::Command { action } => {
                debug!("Relaying command '{}' from device {}", action, conn_id);
                let _ = self.command_tx.send((conn_id, action));
                None
            }
        }
    }
}

/// Serveur du canal de contrôle
pub struct ControlServer {
    state: Arc<ServerState>,
}

impl ControlServer {
    pub fn new(store: SongStore, max_devices: usize) -> Self {
        Self {
            state: Arc::new(ServerState::new(store, max_devices)),
        }
    }

    /// Crée le serveur depuis la configuration globale
    #[cfg(feature = "lyxconfig")]
    pub fn new_configured(store: SongStore) -> Self {
        let config = lyxconfig::get_config();
        Self::new(store, config.get_max_remote_devices())
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// État courant pour l'interface de bureau
    pub fn status(&self) -> ServerStatus {
        self.state.status()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/status", get(status_handler))
            .with_state(self.state.clone())
    }

    /// Démarre le serveur et sert jusqu'à Ctrl+C
    pub async fn run(&self, port: u16) -> anyhow::Result<()> {
        self.state.port.store(port, Ordering::SeqCst);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        info!(
            "🎤 Control server listening on {}:{} (max {} devices)",
            guess_local_ip(),
            port,
            self.state.max_devices
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_err() {
        warn!("Failed to install Ctrl+C handler");
        return;
    }
    info!("Shutdown signal received");
}

async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.status())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize server message: {}", e);
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    if !state.try_admit() {
        warn!("Rejecting device: limit of {} reached", state.max_devices);
        let rejection = ServerMessage::ConnectionRejected {
            reason: format!(
                "Device limit reached ({} max)",
                state.max_devices
            ),
        };
        send(&mut socket, &rejection).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let conn_id = state.next_conn_id.fetch_add(1, Ordering::SeqCst);
    info!("Device {} connected ({} active)", conn_id, state.connections());

    let mut store_rx = state.store.subscribe();
    let mut command_rx = state.command_tx.subscribe();

    // Le programme courant part dès la connexion
    let initial = ServerMessage::ScheduleUpdated {
        items: state.store.schedule(),
    };
    if !send(&mut socket, &initial).await {
        state.release();
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(msg) => {
                                if let Some(reply) = state.handle(conn_id, msg) {
                                    if !send(&mut socket, &reply).await {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                debug!("Ignoring malformed message from device {}: {}", conn_id, e);
                                let reply = ServerMessage::Error {
                                    message: format!("Malformed message: {}", e),
                                };
                                if !send(&mut socket, &reply).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Socket error for device {}: {}", conn_id, e);
                        break;
                    }
                }
            }
            event = store_rx.recv() => {
                match event {
                    // Les appareils distants ne suivent que le programme
                    Ok(StoreEvent::ScheduleUpdated(items)) => {
                        let msg = ServerMessage::ScheduleUpdated { items };
                        if !send(&mut socket, &msg).await {
                            break;
                        }
                    }
                    Ok(StoreEvent::SongsUpdated(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Device {} lagged, skipped {} store events", conn_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            command = command_rx.recv() => {
                match command {
                    Ok((from, action)) => {
                        // L'émetteur ne reçoit pas l'écho de sa commande
                        if from != conn_id {
                            let msg = ServerMessage::Command { action };
                            if !send(&mut socket, &msg).await {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.release();
    info!("Device {} disconnected ({} active)", conn_id, state.connections());
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyxstore::{MemoryStore, Song};

    fn hymn(n: u32) -> Song {
        Song {
            id: format!("H{}", n),
            title: format!("Hymn {}", n),
            category: Category::EnglishHymns,
            slides: vec![],
        }
    }

    async fn test_state(max_devices: usize) -> (Arc<ServerState>, tempfile::TempDir) {
        let remote = Arc::new(MemoryStore::new());
        remote.seed_songs((1..=3).map(hymn));
        let dir = tempfile::tempdir().unwrap();
        let store = SongStore::new(remote, dir.path());
        store.initialize().await;
        (Arc::new(ServerState::new(store, max_devices)), dir)
    }

    #[tokio::test]
    async fn test_admission_respects_device_limit() {
        let (state, _dir) = test_state(2).await;

        assert!(state.try_admit());
        assert!(state.try_admit());
        assert!(!state.try_admit());
        assert_eq!(state.connections(), 2);

        state.release();
        assert!(state.try_admit());
    }

    #[tokio::test]
    async fn test_fetch_schedule_replies_with_current_state() {
        let (state, _dir) = test_state(1).await;
        state.store.add_to_schedule("H1").unwrap();

        let reply = state.handle(0, ClientMessage::FetchSchedule).unwrap();
        match reply {
            ServerMessage::ScheduleUpdated { items } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].song_id, "H1");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_with_category_filter() {
        let (state, _dir) = test_state(1).await;

        let reply = state
            .handle(
                0,
                ClientMessage::Search {
                    query: "hymn".into(),
                    category: Some("English Hymns".into()),
                },
            )
            .unwrap();
        match reply {
            ServerMessage::SearchResults { songs } => assert_eq!(songs.len(), 3),
            other => panic!("unexpected reply: {:?}", other),
        }

        // La sentinelle "All" ne filtre rien
        let reply = state
            .handle(
                0,
                ClientMessage::Search {
                    query: "hymn".into(),
                    category: Some("All".into()),
                },
            )
            .unwrap();
        match reply {
            ServerMessage::SearchResults { songs } => assert_eq!(songs.len(), 3),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_mutation_becomes_error_message() {
        let (state, _dir) = test_state(1).await;

        let reply = state.handle(
            0,
            ClientMessage::AddToSchedule {
                song_id: "H99".into(),
            },
        );
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_command_not_echoed_to_sender() {
        let (state, _dir) = test_state(2).await;
        let mut rx = state.command_tx.subscribe();

        let reply = state.handle(
            7,
            ClientMessage::Command {
                action: "next-slide".into(),
            },
        );
        assert!(reply.is_none());

        let (from, action) = rx.recv().await.unwrap();
        assert_eq!(from, 7);
        assert_eq!(action, "next-slide");
    }
}
