//! État du serveur pour l'affichage dans l'interface de bureau

use serde::Serialize;
use std::net::UdpSocket;

/// Instantané de l'état du canal de contrôle
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub status: String,
    pub ip: String,
    pub port: u16,
    pub connections: usize,
}

/// Devine l'adresse IP locale visible du réseau
///
/// Ouvre un socket UDP « connecté » vers une adresse publique (aucun
/// paquet n'est émis) et lit l'adresse locale choisie par la pile.
/// Retombe sur la boucle locale si la machine n'a pas de route.
pub fn guess_local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}
