//! In-memory transfer table. Nothing is persisted.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::transfer::{Transfer, TransferError, TransferId, TransferStatus};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("unknown transfer {0}")]
    NotFound(TransferId),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Shared, cheaply cloneable handle to the transfer table.
#[derive(Debug, Clone, Default)]
pub struct TransferTracker {
    transfers: Arc<RwLock<HashMap<TransferId, Transfer>>>,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, transfer: Transfer) {
        self.transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transfer.id(), transfer);
    }

    /// Inserts `transfer` unless its burn is already tracked, in which case
    /// the tracked transfer is returned and `transfer` is dropped.
    pub fn insert_for_burn(&self, transfer: Transfer) -> Transfer {
        let mut transfers = self
            .transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(tracked) = transfers
            .values()
            .find(|tracked| tracked.burn_tx() == transfer.burn_tx())
        {
            return tracked.clone();
        }

        transfers.insert(transfer.id(), transfer.clone());
        transfer
    }

    pub fn get(&self, id: TransferId) -> Option<Transfer> {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Applies `apply` to the stored transfer and returns the result.
    ///
    /// The stored record is left unchanged if `apply` fails.
    pub fn update<F>(&self, id: TransferId, apply: F) -> Result<Transfer, TrackerError>
    where
        F: FnOnce(&mut Transfer) -> Result<(), TransferError>,
    {
        let mut transfers = self
            .transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let stored = transfers.get_mut(&id).ok_or(TrackerError::NotFound(id))?;

        let mut updated = stored.clone();
        apply(&mut updated)?;
        *stored = updated.clone();

        Ok(updated)
    }

    /// All transfers, oldest first.
    pub fn list(&self) -> Vec<Transfer> {
        let mut transfers: Vec<_> = self
            .transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        transfers.sort_by_key(Transfer::created_at);
        transfers
    }

    /// Transfers whose status matches `predicate`, oldest first.
    pub fn by_status(&self, predicate: impl Fn(&TransferStatus) -> bool) -> Vec<Transfer> {
        self.list()
            .into_iter()
            .filter(|transfer| predicate(transfer.status()))
            .collect()
    }
}
