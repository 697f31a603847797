//! In-memory record of one cross-chain USDC transfer.
//!
//! # State Flow
//!
//! ```text
//! Burned --mark_attested--> ReadyToMint --mark_completed--> Completed
//!    |                           |
//!    +--------mark_failed--------+--> Failed
//! ```
//!
//! `Completed` and `Failed` are terminal and reject every transition.
//! A transfer only exists once its burn is confirmed, so the source chain
//! is already debited in every state.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use alloy::primitives::{Address, B256, ChainId, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use xusdc_bridge::{AttestationMessage, Usdc};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TransferId(pub Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(value)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Burned,
    ReadyToMint,
    Completed,
    Failed { reason: String },
}

impl TransferStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Burned => "Burned",
            Self::ReadyToMint => "ReadyToMint",
            Self::Completed => "Completed",
            Self::Failed { .. } => "Failed",
        }
    }
}

impl Display for TransferStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "Failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("transfer {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransferId,
        from: &'static str,
        to: &'static str,
    },
}

/// A transfer whose burn has confirmed.
///
/// Fields are read through accessors and change only through the `mark_*`
/// transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    id: TransferId,
    source_chain: ChainId,
    destination_chain: ChainId,
    amount: Usdc,
    recipient: Address,
    burn_tx: TxHash,
    mint_tx: Option<TxHash>,
    /// Sequence number assigned by the attestation service.
    nonce: Option<B256>,
    /// Kept once ready so a failed mint can be retried without re-polling.
    attestation: Option<AttestationMessage>,
    status: TransferStatus,
    created_at: DateTime<Utc>,
    attested_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Records a confirmed burn.
    pub fn burned(
        source_chain: ChainId,
        destination_chain: ChainId,
        amount: Usdc,
        recipient: Address,
        burn_tx: TxHash,
    ) -> Self {
        Self {
            id: TransferId::new(),
            source_chain,
            destination_chain,
            amount,
            recipient,
            burn_tx,
            mint_tx: None,
            nonce: None,
            attestation: None,
            status: TransferStatus::Burned,
            created_at: Utc::now(),
            attested_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    pub const fn id(&self) -> TransferId {
        self.id
    }

    pub const fn source_chain(&self) -> ChainId {
        self.source_chain
    }

    pub const fn destination_chain(&self) -> ChainId {
        self.destination_chain
    }

    pub const fn amount(&self) -> Usdc {
        self.amount
    }

    pub const fn recipient(&self) -> Address {
        self.recipient
    }

    pub const fn burn_tx(&self) -> TxHash {
        self.burn_tx
    }

    /// `None` until completed, and also when the destination had already
    /// received the message.
    pub const fn mint_tx(&self) -> Option<TxHash> {
        self.mint_tx
    }

    pub const fn nonce(&self) -> Option<B256> {
        self.nonce
    }

    pub const fn attestation(&self) -> Option<&AttestationMessage> {
        self.attestation.as_ref()
    }

    pub const fn status(&self) -> &TransferStatus {
        &self.status
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub const fn attested_at(&self) -> Option<DateTime<Utc>> {
        self.attested_at
    }

    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub const fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    fn invalid(&self, to: &'static str) -> TransferError {
        TransferError::InvalidTransition {
            id: self.id,
            from: self.status.name(),
            to,
        }
    }

    /// Fails unless the transfer is currently in `expected`.
    pub fn require(
        &self,
        expected: &TransferStatus,
        to: &'static str,
    ) -> Result<(), TransferError> {
        if self.status == *expected {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    /// `Burned -> ReadyToMint`.
    pub fn mark_attested(
        &mut self,
        nonce: B256,
        attestation: AttestationMessage,
    ) -> Result<(), TransferError> {
        self.require(&TransferStatus::Burned, "ReadyToMint")?;

        self.nonce = Some(nonce);
        self.attestation = Some(attestation);
        self.attested_at = Some(Utc::now());
        self.status = TransferStatus::ReadyToMint;
        Ok(())
    }

    /// `ReadyToMint -> Completed`. `mint_tx` is `None` when the destination
    /// had already received the message.
    pub fn mark_completed(&mut self, mint_tx: Option<TxHash>) -> Result<(), TransferError> {
        self.require(&TransferStatus::ReadyToMint, "Completed")?;

        self.mint_tx = mint_tx;
        self.completed_at = Some(Utc::now());
        self.status = TransferStatus::Completed;
        Ok(())
    }

    /// `Burned | ReadyToMint -> Failed`.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), TransferError> {
        if self.status.is_terminal() {
            return Err(self.invalid("Failed"));
        }

        self.failed_at = Some(Utc::now());
        self.status = TransferStatus::Failed {
            reason: reason.into(),
        };
        Ok(())
    }
}
