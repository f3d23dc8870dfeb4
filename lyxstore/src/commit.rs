//! File de commits distants en arrière-plan
//!
//! Les mutations du cache sont appliquées de façon optimiste puis les
//! écritures distantes partent par cette file : un worker unique les
//! exécute séquentiellement, dans l'ordre de soumission. Un échec de
//! commit est journalisé et n'est jamais remonté à l'appelant ; le
//! listener distant réalignera le cache au prochain instantané.

use crate::remote::{RemoteStore, WriteBatch};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{oneshot, OwnedMutexGuard};
use tracing::{debug, error};

enum Job {
    Commit {
        label: String,
        batches: Vec<WriteBatch>,
        remote: Arc<dyn RemoteStore>,
        /// Verrou de groupe tenu jusqu'à la fin des commits de ce job
        _guard: Option<OwnedMutexGuard<()>>,
    },
    Flush(oneshot::Sender<()>),
}

/// File d'écritures distantes, un worker séquentiel
#[derive(Clone)]
pub struct CommitQueue {
    tx: UnboundedSender<Job>,
}

impl CommitQueue {
    /// Démarre le worker et retourne la poignée de soumission
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Commit {
                        label,
                        batches,
                        remote,
                        _guard,
                    } => {
                        for (index, batch) in batches.iter().enumerate() {
                            match remote.commit(batch).await {
                                Ok(()) => debug!(
                                    "Committed batch {}/{} for {} ({} ops)",
                                    index + 1,
                                    batches.len(),
                                    label,
                                    batch.len()
                                ),
                                Err(e) => {
                                    error!("Commit failed for {}: {}", label, e);
                                }
                            }
                        }
                    }
                    Job::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx }
    }

    /// Soumet des lots à committer dans l'ordre, sans attendre
    pub fn enqueue(
        &self,
        label: impl Into<String>,
        batches: Vec<WriteBatch>,
        remote: Arc<dyn RemoteStore>,
        guard: Option<OwnedMutexGuard<()>>,
    ) {
        if batches.is_empty() {
            return;
        }
        let job = Job::Commit {
            label: label.into(),
            batches,
            remote,
            _guard: guard,
        };
        if self.tx.send(job).is_err() {
            error!("Commit worker is gone, dropping batches");
        }
    }

    /// Attend que tous les jobs soumis avant l'appel soient terminés
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}
