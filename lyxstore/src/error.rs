//! Types d'erreurs pour lyxstore

/// Erreurs de la couche cache/synchronisation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Song not found: {0}")]
    SongNotFound(String),

    #[error("Schedule item not found: {0}")]
    ScheduleItemNotFound(String),

    #[error("Song already scheduled: {0}")]
    AlreadyScheduled(String),

    #[error("Malformed song id: {0}")]
    MalformedId(String),

    #[error("Remote write failed: {0}")]
    RemoteWrite(String),

    #[error("Remote authentication failed: {0}")]
    Auth(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type Result spécialisé pour lyxstore
pub type Result<T> = std::result::Result<T, Error>;
