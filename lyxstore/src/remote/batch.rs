//! Découpage des écritures en lots bornés
//!
//! Le magasin distant refuse les lots au-delà de ~500 opérations ; on
//! découpe à 490 pour garder de la marge. Les opérations d'un même
//! déplacement (écriture du nouvel id + suppression de l'ancien) sont
//! poussées en groupe et ne sont jamais séparées entre deux lots.

use crate::model::{ScheduleItem, Song};

/// Plafond dur du magasin distant (opérations par lot)
pub const HARD_BATCH_LIMIT: usize = 500;
/// Seuil de découpage sûr, sous le plafond dur
pub const SAFE_BATCH_LIMIT: usize = 490;

/// Opération d'écriture unitaire
#[derive(Debug, Clone)]
pub enum WriteOp {
    SetSong(Song),
    DeleteSong(String),
    SetSchedule(Vec<ScheduleItem>),
}

/// Lot ordonné d'écritures, atomique côté magasin
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn single(op: WriteOp) -> Self {
        Self { ops: vec![op] }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Constructeur de lots avec découpage au seuil
pub struct BatchPlanner {
    limit: usize,
    batches: Vec<WriteBatch>,
}

impl BatchPlanner {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            batches: vec![WriteBatch::default()],
        }
    }

    /// Ajoute une opération isolée
    pub fn push(&mut self, op: WriteOp) {
        self.push_group(vec![op]);
    }

    /// Ajoute un groupe insécable d'opérations
    ///
    /// Ouvre un nouveau lot si le groupe ferait dépasser le seuil au
    /// lot courant.
    pub fn push_group(&mut self, ops: Vec<WriteOp>) {
        let current = self.batches.last_mut().expect("planner has a batch");
        if !current.is_empty() && current.len() + ops.len() > self.limit {
            self.batches.push(WriteBatch { ops });
        } else {
            current.ops.extend(ops);
        }
    }

    /// Termine le plan ; les lots vides sont éliminés
    pub fn into_batches(self) -> Vec<WriteBatch> {
        self.batches.into_iter().filter(|b| !b.is_empty()).collect()
    }
}

/// Découpe une liste plate d'opérations en lots sous le seuil
pub fn plan_batches(ops: Vec<WriteOp>, limit: usize) -> Vec<WriteBatch> {
    let mut planner = BatchPlanner::new(limit);
    for op in ops {
        planner.push(op);
    }
    planner.into_batches()
}
