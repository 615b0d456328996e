use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{BillingCycle, Product};
use super::product::{ChargeRequest, PaymentOutcome, ProductService};
use crate::error::{BillingError, BillingResult};
use crate::provisioning::ProvisioningServer;

/// Which part of a sweep an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepScope {
    /// Selecting the products to process failed; nothing ran.
    Batch,
    Product(i64),
}

impl fmt::Display for SweepScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepScope::Batch => f.write_str("batch"),
            SweepScope::Product(serial_number) => write!(f, "product {serial_number}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{scope}: {step} failed: {source}")]
pub struct SweepError {
    pub scope: SweepScope,
    pub step: &'static str,
    #[source]
    pub source: BillingError,
}

impl SweepError {
    fn batch(step: &'static str, source: BillingError) -> Self {
        Self {
            scope: SweepScope::Batch,
            step,
            source,
        }
    }

    fn product(serial_number: i64, step: &'static str, source: BillingError) -> Self {
        Self {
            scope: SweepScope::Product(serial_number),
            step,
            source,
        }
    }
}

/// Tags a failed step with the product it belongs to.
trait StepExt<T> {
    fn step(self, serial_number: i64, step: &'static str) -> Result<T, SweepError>;
}

impl<T> StepExt<T> for BillingResult<T> {
    fn step(self, serial_number: i64, step: &'static str) -> Result<T, SweepError> {
        self.map_err(|source| SweepError::product(serial_number, step, source))
    }
}

impl<T> StepExt<T> for anyhow::Result<T> {
    fn step(self, serial_number: i64, step: &'static str) -> Result<T, SweepError> {
        self.map_err(|source| SweepError::product(serial_number, step, source.into()))
    }
}

/// key: billing-cycle-processor -> usage, recurring and termination sweeps
///
/// Each sweep walks its products independently and returns the failures it
/// collected instead of stopping at the first one. Re-running a sweep is safe:
/// charged products have moved their watermark and terminated products are no
/// longer selected.
#[derive(Clone)]
pub struct BillingCycleProcessor {
    products: ProductService,
}

impl BillingCycleProcessor {
    pub fn new(products: ProductService) -> Self {
        Self { products }
    }

    pub async fn hourly_usage_billing(&self, now: DateTime<Utc>) -> Vec<SweepError> {
        let today = now.date_naive();
        let products = match self
            .products
            .active_by_cycle(BillingCycle::UsageBased, today)
            .await
        {
            Ok(products) => products,
            Err(err) => return vec![SweepError::batch("list usage-based products", err)],
        };

        let mut errors = Vec::new();
        let total = products.len();
        for product in products {
            if let Err(err) = self.bill_usage(product, now).await {
                errors.push(err);
            }
        }
        info!(products = total, failures = errors.len(), "usage billing sweep finished");
        errors
    }

    async fn bill_usage(&self, mut product: Product, now: DateTime<Utc>) -> Result<(), SweepError> {
        let serial_number = product.serial_number;
        let today = now.date_naive();
        let (listing, server) = self
            .products
            .backend(&product)
            .await
            .step(serial_number, "resolve provisioning server")?;
        let snapshot = server
            .get_account(serial_number)
            .await
            .step(serial_number, "read resource usage")?;
        let total = listing
            .usage_billing_factors
            .total_price(&snapshot.usage_map())
            .step(serial_number, "price resource usage")?;

        match self
            .products
            .collect_payment(&mut product, ChargeRequest::Usage { total }, now)
            .await
        {
            Ok(outcome) => log_outcome(serial_number, outcome),
            Err(err) if err.is_insufficient_funds() => {
                warn!(
                    serial_number,
                    wallet_id = product.wallet_id,
                    %total,
                    "usage charge not covered; settling and terminating"
                );
                // once pending, the termination sweep retries any step below
                self.products
                    .to_terminate_on(&mut product, today, today)
                    .await
                    .step(serial_number, "schedule termination")?;
                let outcome = self
                    .products
                    .force_collect_payment(&mut product, ChargeRequest::Usage { total }, now)
                    .await
                    .step(serial_number, "force collect usage")?;
                log_outcome(serial_number, outcome);
                server
                    .delete_account(serial_number)
                    .await
                    .step(serial_number, "delete account")?;
                self.products
                    .terminate(&mut product, today)
                    .await
                    .step(serial_number, "terminate product")?;
                return Ok(());
            }
            Err(err) => return Err(SweepError::product(serial_number, "collect usage", err)),
        }

        if !product.in_billing_month(now) {
            self.products
                .start_billing_month(&mut product, server.as_ref(), today)
                .await
                .step(serial_number, "start billing month")?;
        }
        Ok(())
    }

    pub async fn daily_recurring_billing(&self, now: DateTime<Utc>) -> Vec<SweepError> {
        let today = now.date_naive();
        let mut errors = Vec::new();
        for cycle in BillingCycle::RECURRING {
            let products = match self.products.active_by_cycle(cycle, today).await {
                Ok(products) => products,
                Err(err) => {
                    errors.push(SweepError::batch("list recurring products", err));
                    continue;
                }
            };

            for product in products.into_iter().filter(|p| p.is_due(today)) {
                if let Err(err) = self.bill_recurring(product, now).await {
                    errors.push(err);
                }
            }
        }
        info!(failures = errors.len(), "recurring billing sweep finished");
        errors
    }

    async fn bill_recurring(
        &self,
        mut product: Product,
        now: DateTime<Utc>,
    ) -> Result<(), SweepError> {
        let serial_number = product.serial_number;
        let today = now.date_naive();

        match self
            .products
            .collect_payment(&mut product, ChargeRequest::Recurring, now)
            .await
        {
            Ok(outcome @ PaymentOutcome::Charged { .. }) => {
                log_outcome(serial_number, outcome);
                self.server(&product)
                    .await?
                    .refresh_account(serial_number)
                    .await
                    .step(serial_number, "refresh account")
            }
            Ok(outcome) => {
                log_outcome(serial_number, outcome);
                Ok(())
            }
            Err(err) if err.is_insufficient_funds() => {
                let grace_end = today.succ_opt().unwrap_or(today);
                self.products
                    .to_terminate_on(&mut product, grace_end, today)
                    .await
                    .step(serial_number, "schedule termination")?;
                let server = self.server(&product).await?;
                server
                    .suspend_account(serial_number)
                    .await
                    .step(serial_number, "suspend account")?;
                warn!(
                    serial_number,
                    wallet_id = product.wallet_id,
                    terminate_on = %grace_end,
                    "recurring charge not covered; account suspended"
                );
                Ok(())
            }
            Err(err) => Err(SweepError::product(serial_number, "collect recurring", err)),
        }
    }

    pub async fn hourly_product_termination(&self, now: DateTime<Utc>) -> Vec<SweepError> {
        let today = now.date_naive();
        let products = match self.products.due_for_termination(today).await {
            Ok(products) => products,
            Err(err) => return vec![SweepError::batch("list products to terminate", err)],
        };

        let mut errors = Vec::new();
        let total = products.len();
        for product in products {
            if let Err(err) = self.terminate_product(product, now).await {
                errors.push(err);
            }
        }
        info!(products = total, failures = errors.len(), "termination sweep finished");
        errors
    }

    async fn terminate_product(
        &self,
        mut product: Product,
        now: DateTime<Utc>,
    ) -> Result<(), SweepError> {
        let serial_number = product.serial_number;
        let (listing, server) = self
            .products
            .backend(&product)
            .await
            .step(serial_number, "resolve provisioning server")?;

        if product.billing_cycle().is_usage_based() {
            let snapshot = server
                .get_account(serial_number)
                .await
                .step(serial_number, "read resource usage")?;
            let total = listing
                .usage_billing_factors
                .total_price(&snapshot.usage_map())
                .step(serial_number, "price resource usage")?;
            let outcome = self
                .products
                .force_collect_payment(&mut product, ChargeRequest::Usage { total }, now)
                .await
                .step(serial_number, "settle usage")?;
            log_outcome(serial_number, outcome);
        }

        server
            .delete_account(serial_number)
            .await
            .step(serial_number, "delete account")?;
        self.products
            .terminate(&mut product, now.date_naive())
            .await
            .step(serial_number, "terminate product")?;
        Ok(())
    }

    async fn server(&self, product: &Product) -> Result<Arc<dyn ProvisioningServer>, SweepError> {
        let (_, server) = self
            .products
            .backend(product)
            .await
            .step(product.serial_number, "resolve provisioning server")?;
        Ok(server)
    }
}

fn log_outcome(serial_number: i64, outcome: PaymentOutcome) {
    match outcome {
        PaymentOutcome::Charged { amount, record_id } => {
            info!(serial_number, %amount, record = record_id, "product charged")
        }
        PaymentOutcome::NothingOwed => debug!(serial_number, "nothing owed"),
        PaymentOutcome::NotDue => debug!(serial_number, "not due"),
    }
}
