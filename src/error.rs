use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::billing::models::BillingCycle;

/// Coarse classification used by the billing sweeps to decide between
/// retrying, suspending and terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected input. Never retried.
    Validation,
    /// The wallet cannot cover the charge. Each billing path recovers differently.
    Funds,
    /// Provisioning backend or store failure. Retried on the next sweep.
    Collaborator,
    /// Misconfigured catalog entry or corrupt usage feed. Item is skipped.
    Data,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("bad amount input: {0}")]
    BadAmount(Decimal),
    #[error("insufficient funds in wallet {wallet_id} for {requested}")]
    InsufficientFunds { wallet_id: i64, requested: Decimal },
    #[error("wallet {0} is disabled")]
    WalletDisabled(i64),
    #[error("wallet {0} not found")]
    WalletNotFound(i64),
    #[error("invalid owner id")]
    InvalidOwnerId,
    #[error("invalid product id")]
    InvalidProductId,
    #[error("invalid wallet id")]
    InvalidWalletId,
    #[error("invalid serial number")]
    InvalidSerialNumber,
    #[error("cannot rewrite history: {requested} is before {today}")]
    CannotRewriteHistory {
        requested: NaiveDate,
        today: NaiveDate,
    },
    #[error("usage-based products can only be terminated today ({today}), got {requested}")]
    ImmediateTerminationRequired {
        requested: NaiveDate,
        today: NaiveDate,
    },
    #[error("resource usage missing for resource {0}")]
    ResourceUsageMissing(i64),
    #[error("usage cost regressed: total {total} is below already billed {billed}")]
    UsageRegressed { total: Decimal, billed: Decimal },
    #[error("no usage billing factors")]
    NoFactors,
    #[error("invalid pricing policy")]
    InvalidPricingPolicy,
    #[error("charge request does not match billing cycle {0}")]
    ChargeMismatch(BillingCycle),
    #[error("product listing {0} not found")]
    ListingNotFound(i64),
    #[error("product listing {0} is discontinued")]
    ListingDiscontinued(i64),
    #[error("product listing incomplete: {0}")]
    ListingIncomplete(&'static str),
    #[error("{0} not set")]
    MissingField(&'static str),
    #[error("no billing option for cycle {0}")]
    BillingOptionNotFound(BillingCycle),
    #[error("product listing group {0} not found")]
    GroupNotFound(i64),
    #[error("product {0} not found")]
    ProductNotFound(i64),
    #[error("server type `{0}` is not registered")]
    UnknownServerType(String),
    #[error("bad configuration: {0}")]
    InvalidConfiguration(String),
    #[error("provisioning error: {0:#}")]
    Provisioning(#[source] anyhow::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::BadAmount(_)
            | BillingError::InvalidOwnerId
            | BillingError::InvalidProductId
            | BillingError::InvalidWalletId
            | BillingError::InvalidSerialNumber
            | BillingError::CannotRewriteHistory { .. }
            | BillingError::ImmediateTerminationRequired { .. }
            | BillingError::WalletDisabled(_)
            | BillingError::WalletNotFound(_)
            | BillingError::ListingNotFound(_)
            | BillingError::ListingDiscontinued(_)
            | BillingError::ListingIncomplete(_)
            | BillingError::MissingField(_)
            | BillingError::BillingOptionNotFound(_)
            | BillingError::GroupNotFound(_)
            | BillingError::ProductNotFound(_) => ErrorKind::Validation,
            BillingError::InsufficientFunds { .. } => ErrorKind::Funds,
            BillingError::UnknownServerType(_)
            | BillingError::InvalidConfiguration(_)
            | BillingError::Provisioning(_)
            | BillingError::Database(_) => ErrorKind::Collaborator,
            BillingError::ResourceUsageMissing(_)
            | BillingError::UsageRegressed { .. }
            | BillingError::NoFactors
            | BillingError::InvalidPricingPolicy
            | BillingError::ChargeMismatch(_)
            | BillingError::Serialization(_) => ErrorKind::Data,
        }
    }

    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, BillingError::InsufficientFunds { .. })
    }

    /// Whether running the same item again on a later sweep can succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Collaborator
    }
}

impl From<anyhow::Error> for BillingError {
    fn from(err: anyhow::Error) -> Self {
        BillingError::Provisioning(err)
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
