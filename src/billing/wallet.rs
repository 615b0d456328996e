use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use super::models::{Wallet, WalletOwner, INTERNAL_WALLET_ID};
use super::store::BillingStore;
use crate::error::{BillingError, BillingResult};

/// key: wallet-ledger -> atomic deposit/spend/secure on durable state
///
/// Every call reads or writes the store directly; nothing is cached, so several
/// processes may run sweeps against the same wallets. Wallet `0` is the internal
/// sponsor wallet: mutations on it validate the amount and then succeed without
/// touching storage.
#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn BillingStore>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn get_or_create_wallet(&self, owner: WalletOwner) -> BillingResult<Wallet> {
        if owner.is_internal() {
            return Ok(Wallet::internal());
        }
        if owner.id() < 0 {
            return Err(BillingError::InvalidOwnerId);
        }
        self.store.get_or_create_wallet(owner).await
    }

    pub async fn wallet(&self, wallet_id: i64) -> BillingResult<Wallet> {
        if wallet_id == INTERNAL_WALLET_ID {
            return Ok(Wallet::internal());
        }
        self.store
            .get_wallet(wallet_id)
            .await?
            .ok_or(BillingError::WalletNotFound(wallet_id))
    }

    pub async fn balance(&self, wallet_id: i64) -> BillingResult<Decimal> {
        Ok(self.wallet(wallet_id).await?.balance)
    }

    pub async fn secured(&self, wallet_id: i64) -> BillingResult<Decimal> {
        Ok(self.wallet(wallet_id).await?.secured)
    }

    pub async fn available_fund(&self, wallet_id: i64) -> BillingResult<Decimal> {
        Ok(self.wallet(wallet_id).await?.available())
    }

    pub async fn deposit(&self, wallet_id: i64, amount: Decimal) -> BillingResult<()> {
        ensure_positive(amount)?;
        if wallet_id == INTERNAL_WALLET_ID {
            return Ok(());
        }
        if self.store.deposit(wallet_id, amount).await? {
            debug!(wallet_id, %amount, "deposited funds");
            return Ok(());
        }
        Err(self.explain_rejection(wallet_id, amount).await)
    }

    /// Spends only when the unsecured balance covers `amount`.
    pub async fn try_spend(&self, wallet_id: i64, amount: Decimal) -> BillingResult<()> {
        ensure_positive(amount)?;
        if wallet_id == INTERNAL_WALLET_ID {
            return Ok(());
        }
        if self.store.try_spend(wallet_id, amount).await? {
            debug!(wallet_id, %amount, "spent funds");
            return Ok(());
        }
        Err(self.explain_rejection(wallet_id, amount).await)
    }

    /// Force charge. May drive the balance negative; reserved for final usage settlement.
    pub async fn spend(&self, wallet_id: i64, amount: Decimal) -> BillingResult<()> {
        ensure_positive(amount)?;
        if wallet_id == INTERNAL_WALLET_ID {
            return Ok(());
        }
        if self.store.force_spend(wallet_id, amount).await? {
            debug!(wallet_id, %amount, "force spent funds");
            return Ok(());
        }
        Err(self.explain_rejection(wallet_id, amount).await)
    }

    pub async fn secure_fund(&self, wallet_id: i64, amount: Decimal) -> BillingResult<()> {
        ensure_positive(amount)?;
        if wallet_id == INTERNAL_WALLET_ID {
            return Ok(());
        }
        if self.store.secure_funds(wallet_id, amount).await? {
            return Ok(());
        }
        Err(self.explain_rejection(wallet_id, amount).await)
    }

    pub async fn undo_secure_fund(&self, wallet_id: i64, amount: Decimal) -> BillingResult<()> {
        ensure_positive(amount)?;
        if wallet_id == INTERNAL_WALLET_ID {
            return Ok(());
        }
        if self.store.release_secured(wallet_id, amount).await? {
            return Ok(());
        }
        Err(self.explain_rejection(wallet_id, amount).await)
    }

    pub async fn spend_secured(&self, wallet_id: i64, amount: Decimal) -> BillingResult<()> {
        ensure_positive(amount)?;
        if wallet_id == INTERNAL_WALLET_ID {
            return Ok(());
        }
        if self.store.spend_secured(wallet_id, amount).await? {
            return Ok(());
        }
        Err(self.explain_rejection(wallet_id, amount).await)
    }

    pub async fn enable(&self, wallet_id: i64) -> BillingResult<()> {
        self.set_disabled(wallet_id, false).await
    }

    pub async fn disable(&self, wallet_id: i64) -> BillingResult<()> {
        self.set_disabled(wallet_id, true).await
    }

    async fn set_disabled(&self, wallet_id: i64, disabled: bool) -> BillingResult<()> {
        if wallet_id == INTERNAL_WALLET_ID {
            return Ok(());
        }
        if self.store.set_wallet_disabled(wallet_id, disabled).await? {
            debug!(wallet_id, disabled, "changed wallet state");
            Ok(())
        } else {
            Err(BillingError::WalletNotFound(wallet_id))
        }
    }

    /// Classifies a guarded update that did not apply.
    async fn explain_rejection(&self, wallet_id: i64, amount: Decimal) -> BillingError {
        match self.store.get_wallet(wallet_id).await {
            Ok(None) => BillingError::WalletNotFound(wallet_id),
            Ok(Some(wallet)) if wallet.disabled => BillingError::WalletDisabled(wallet_id),
            Ok(Some(_)) => BillingError::InsufficientFunds {
                wallet_id,
                requested: amount,
            },
            Err(err) => err,
        }
    }
}

fn ensure_positive(amount: Decimal) -> BillingResult<()> {
    if amount <= Decimal::ZERO {
        return Err(BillingError::BadAmount(amount));
    }
    Ok(())
}
