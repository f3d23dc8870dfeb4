//! # lyxserver - Canal de contrôle temps réel de LyriX
//!
//! Expose le magasin aux appareils distants (télécommandes mobiles) par
//! WebSocket : recherche, gestion du programme et relais de commandes
//! de projection. Le nombre d'appareils admis simultanément est borné ;
//! au-delà, la connexion est refusée avec un message explicite.

mod protocol;
mod server;
mod status;

pub use protocol::{ClientMessage, ServerMessage};
pub use server::{ControlServer, ServerState};
pub use status::{guess_local_ip, ServerStatus};
