use std::sync::Arc;

use tracing::info;

use super::models::{BillingRecord, INTERNAL_WALLET_ID};
use super::store::BillingStore;
use crate::error::BillingResult;

/// key: billing-records -> append-only charge audit
#[derive(Clone)]
pub struct BillingRecords {
    store: Arc<dyn BillingStore>,
}

impl BillingRecords {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Appends a record and returns its serial number. Charges against the
    /// internal wallet are not recorded and yield `0`.
    pub async fn add(&self, record: &BillingRecord) -> BillingResult<i64> {
        if record.wallet_id == INTERNAL_WALLET_ID {
            return Ok(0);
        }
        let serial_number = self.store.insert_record(record).await?;
        info!(
            record = serial_number,
            wallet_id = record.wallet_id,
            product_serial_number = record.product_serial_number,
            amount = %record.billed_amount,
            cycle = %record.billing_cycle,
            "billing record written"
        );
        Ok(serial_number)
    }

    pub async fn by_wallet(&self, wallet_id: i64) -> BillingResult<Vec<BillingRecord>> {
        self.store.records_by_wallet(wallet_id).await
    }

    pub async fn all(&self) -> BillingResult<Vec<BillingRecord>> {
        self.store.all_records().await
    }
}
