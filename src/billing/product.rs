use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::catalog::Catalog;
use super::models::{BillingCycle, BillingRecord, Product, ProductListing, WalletOwner};
use super::pricing::{outstanding_usage_amount, usage_based_amount};
use super::records::BillingRecords;
use super::store::BillingStore;
use super::wallet::WalletLedger;
use crate::error::{BillingError, BillingResult};
use crate::provisioning::{AccountConfiguration, ProvisioningRegistry, ProvisioningServer};

/// What a caller asks to collect. Usage-based products carry the month-to-date
/// usage cost; recurring products derive the amount from their price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChargeRequest {
    Usage { total: Decimal },
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaymentOutcome {
    Charged { amount: Decimal, record_id: i64 },
    /// Usage is already paid up to the cap, or the price is zero.
    NothingOwed,
    /// The recurring period has not elapsed yet.
    NotDue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub listing_id: i64,
    #[serde(default)]
    pub owner_user_id: i64,
    #[serde(default)]
    pub owner_affiliation_id: i64,
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub account_configuration: AccountConfiguration,
}

/// key: billing-product -> lifecycle, payment collection, purchase
#[derive(Clone)]
pub struct ProductService {
    store: Arc<dyn BillingStore>,
    ledger: WalletLedger,
    records: BillingRecords,
    catalog: Catalog,
    registry: Arc<ProvisioningRegistry>,
}

impl ProductService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        ledger: WalletLedger,
        records: BillingRecords,
        catalog: Catalog,
        registry: Arc<ProvisioningRegistry>,
    ) -> Self {
        Self {
            store,
            ledger,
            records,
            catalog,
            registry,
        }
    }

    pub async fn create(&self, product: &Product) -> BillingResult<i64> {
        product.validate()?;
        let serial_number = self.store.insert_product(product).await?;
        info!(
            serial_number,
            product_id = product.product_id,
            wallet_id = product.wallet_id,
            cycle = %product.billing_cycle(),
            "product created"
        );
        Ok(serial_number)
    }

    pub async fn get(&self, serial_number: i64) -> BillingResult<Product> {
        if serial_number <= 0 {
            return Err(BillingError::InvalidSerialNumber);
        }
        self.store
            .get_product(serial_number)
            .await?
            .ok_or(BillingError::ProductNotFound(serial_number))
    }

    pub async fn by_user(&self, owner_user_id: i64) -> BillingResult<Vec<Product>> {
        if owner_user_id <= 0 {
            return Err(BillingError::InvalidOwnerId);
        }
        self.store.products_by_user(owner_user_id).await
    }

    pub async fn by_affiliation(&self, owner_affiliation_id: i64) -> BillingResult<Vec<Product>> {
        if owner_affiliation_id <= 0 {
            return Err(BillingError::InvalidOwnerId);
        }
        self.store.products_by_affiliation(owner_affiliation_id).await
    }

    pub async fn by_listing(&self, product_id: i64) -> BillingResult<Vec<Product>> {
        if product_id <= 0 {
            return Err(BillingError::InvalidProductId);
        }
        self.store.products_by_listing(product_id).await
    }

    /// Every product, for reporting.
    pub async fn all(&self) -> BillingResult<Vec<Product>> {
        self.store.all_products().await
    }

    pub async fn active_by_cycle(
        &self,
        cycle: BillingCycle,
        today: NaiveDate,
    ) -> BillingResult<Vec<Product>> {
        self.store.active_products_by_cycle(cycle, today).await
    }

    pub async fn due_for_termination(&self, today: NaiveDate) -> BillingResult<Vec<Product>> {
        self.store.products_to_terminate(today).await
    }

    /// Persists owners, wallet and current month spending.
    pub async fn save(&self, product: &Product) -> BillingResult<()> {
        product.validate()?;
        self.persist(product).await
    }

    async fn persist(&self, product: &Product) -> BillingResult<()> {
        if !self.store.update_product(product).await? {
            return Err(BillingError::ProductNotFound(product.serial_number));
        }
        Ok(())
    }

    /// Catalog entry and provisioning server behind a product. Discontinued
    /// listings still resolve so existing products keep billing.
    pub async fn backend(
        &self,
        product: &Product,
    ) -> BillingResult<(ProductListing, Arc<dyn ProvisioningServer>)> {
        let listing = self.catalog.sudo_get_listing(product.product_id).await?;
        let server = self.registry.resolve(&listing)?;
        Ok((listing, server))
    }

    /// Schedules termination. Usage-based products can only stop today and are
    /// suspended right away so they stop metering.
    pub async fn to_terminate_on(
        &self,
        product: &mut Product,
        date: NaiveDate,
        today: NaiveDate,
    ) -> BillingResult<()> {
        if product.terminated {
            return Ok(());
        }
        if date < today {
            return Err(BillingError::CannotRewriteHistory {
                requested: date,
                today,
            });
        }
        let usage_based = product.billing_cycle().is_usage_based();
        if usage_based && date != today {
            return Err(BillingError::ImmediateTerminationRequired {
                requested: date,
                today,
            });
        }

        self.store
            .schedule_termination(product.serial_number, Some(date))
            .await?;
        product.date_termination = Some(date);
        info!(serial_number = product.serial_number, %date, "product scheduled for termination");

        if usage_based {
            let (_, server) = self.backend(product).await?;
            server.suspend_account(product.serial_number).await?;
            info!(serial_number = product.serial_number, "usage-based account suspended");
        }
        Ok(())
    }

    /// Clears a pending termination and unsuspends the account. Returns
    /// `false` when the product is already terminated.
    pub async fn reinstate(&self, product: &mut Product) -> BillingResult<bool> {
        if product.terminated {
            return Ok(false);
        }
        if !self
            .store
            .schedule_termination(product.serial_number, None)
            .await?
        {
            return Ok(false);
        }
        product.date_termination = None;

        let (_, server) = self.backend(product).await?;
        server.unsuspend_account(product.serial_number).await?;
        info!(serial_number = product.serial_number, "product reinstated");
        Ok(true)
    }

    /// Marks the product terminated. A second call is a no-op returning `false`.
    pub async fn terminate(&self, product: &mut Product, today: NaiveDate) -> BillingResult<bool> {
        if product.terminated {
            return Ok(false);
        }
        let applied = self
            .store
            .mark_terminated(product.serial_number, today)
            .await?;
        product.terminated = true;
        product.date_termination = Some(
            product
                .date_termination
                .map_or(today, |scheduled| scheduled.min(today)),
        );
        if applied {
            info!(serial_number = product.serial_number, "product terminated");
        }
        Ok(applied)
    }

    pub async fn collect_payment(
        &self,
        product: &mut Product,
        request: ChargeRequest,
        now: DateTime<Utc>,
    ) -> BillingResult<PaymentOutcome> {
        self.charge(product, request, now, false).await
    }

    /// Like [`collect_payment`](Self::collect_payment) but may overdraw the
    /// wallet, and usage ignores the monthly cap.
    pub async fn force_collect_payment(
        &self,
        product: &mut Product,
        request: ChargeRequest,
        now: DateTime<Utc>,
    ) -> BillingResult<PaymentOutcome> {
        self.charge(product, request, now, true).await
    }

    async fn charge(
        &self,
        product: &mut Product,
        request: ChargeRequest,
        now: DateTime<Utc>,
        force: bool,
    ) -> BillingResult<PaymentOutcome> {
        let today = now.date_naive();
        let cycle = product.billing_cycle();
        let amount = match (cycle.is_usage_based(), request) {
            (true, ChargeRequest::Usage { total }) => {
                let spent = product.billing_option.current_month_spending;
                if force {
                    outstanding_usage_amount(total, spent)?
                } else {
                    usage_based_amount(total, product.billing_option.monthly_spending_cap, spent)?
                }
            }
            (false, ChargeRequest::Recurring) => {
                if !product.is_due(today) {
                    return Ok(PaymentOutcome::NotDue);
                }
                product.billing_option.price
            }
            _ => return Err(BillingError::ChargeMismatch(cycle)),
        };

        if amount <= Decimal::ZERO {
            if !cycle.is_usage_based() {
                self.store.set_last_bill(product.serial_number, today).await?;
                product.date_last_bill = today;
            }
            debug!(serial_number = product.serial_number, "nothing owed");
            return Ok(PaymentOutcome::NothingOwed);
        }

        if force {
            self.ledger.spend(product.wallet_id, amount).await?;
        } else {
            self.ledger.try_spend(product.wallet_id, amount).await?;
        }

        let previous = product.clone();
        if let Err(err) = self.advance_after_charge(product, amount, today).await {
            self.refund(product, amount).await;
            return Err(err);
        }

        let recorded = self
            .records
            .add(&BillingRecord {
                serial_number: 0,
                wallet_id: product.wallet_id,
                user_id: product.owner_user_id,
                product_id: product.product_id,
                product_serial_number: product.serial_number,
                billing_cycle: cycle,
                billed_amount: amount,
                billed_at: now,
            })
            .await;
        let record_id = match recorded {
            Ok(record_id) => record_id,
            Err(err) => {
                self.rewind(product, previous).await;
                self.refund(product, amount).await;
                return Err(err);
            }
        };

        info!(
            serial_number = product.serial_number,
            wallet_id = product.wallet_id,
            %amount,
            %cycle,
            forced = force,
            "payment collected"
        );
        Ok(PaymentOutcome::Charged { amount, record_id })
    }

    /// Moves the billing watermark once money has left the wallet.
    async fn advance_after_charge(
        &self,
        product: &mut Product,
        amount: Decimal,
        today: NaiveDate,
    ) -> BillingResult<()> {
        if product.billing_cycle().is_usage_based() {
            let mut updated = product.clone();
            updated.billing_option.current_month_spending += amount;
            self.persist(&updated).await?;
            *product = updated;
        } else {
            if !self.store.set_last_bill(product.serial_number, today).await? {
                return Err(BillingError::ProductNotFound(product.serial_number));
            }
            product.date_last_bill = today;
        }
        Ok(())
    }

    /// Restores the watermark a failed charge had already moved.
    async fn rewind(&self, product: &mut Product, previous: Product) {
        let restored = if previous.billing_cycle().is_usage_based() {
            self.persist(&previous).await
        } else {
            self.store
                .set_last_bill(previous.serial_number, previous.date_last_bill)
                .await
                .map(|_| ())
        };
        if let Err(err) = restored {
            warn!(
                ?err,
                serial_number = previous.serial_number,
                "failed to restore billing watermark after charge failure"
            );
        }
        *product = previous;
    }

    async fn refund(&self, product: &Product, amount: Decimal) {
        if let Err(err) = self.ledger.deposit(product.wallet_id, amount).await {
            warn!(
                ?err,
                serial_number = product.serial_number,
                wallet_id = product.wallet_id,
                %amount,
                "failed to refund charge after billing state update failed"
            );
        }
    }

    /// Opens a new metering month: resets backend counters and spending.
    pub async fn start_billing_month(
        &self,
        product: &mut Product,
        server: &dyn ProvisioningServer,
        today: NaiveDate,
    ) -> BillingResult<()> {
        server.refresh_account(product.serial_number).await?;

        let mut updated = product.clone();
        updated.billing_option.current_month_spending = Decimal::ZERO;
        self.persist(&updated).await?;
        self.store.set_last_bill(product.serial_number, today).await?;
        updated.date_last_bill = today;
        *product = updated;

        info!(serial_number = product.serial_number, %today, "usage billing month started");
        Ok(())
    }

    /// Sells a listing: resolves the payer's wallet, charges the first
    /// recurring period, persists the product and provisions the account.
    pub async fn purchase(
        &self,
        request: &PurchaseRequest,
        now: DateTime<Utc>,
    ) -> BillingResult<Product> {
        let today = now.date_naive();
        let owner = if request.owner_affiliation_id > 0 {
            WalletOwner::Affiliation(request.owner_affiliation_id)
        } else if request.owner_user_id > 0 {
            WalletOwner::User(request.owner_user_id)
        } else {
            return Err(BillingError::InvalidOwnerId);
        };

        let listing = self.catalog.get_listing(request.listing_id).await?;
        let server = self.registry.resolve(&listing)?;
        let wallet = self.ledger.get_or_create_wallet(owner).await?;

        let mut product = self.catalog.create_product(
            &listing,
            request.owner_user_id,
            request.owner_affiliation_id,
            request.billing_cycle,
            wallet.wallet_id,
            today,
        )?;
        product.validate()?;

        let first_period = if request.billing_cycle.is_usage_based() {
            Decimal::ZERO
        } else {
            product.billing_option.price
        };
        if first_period > Decimal::ZERO {
            self.ledger.try_spend(wallet.wallet_id, first_period).await?;
        }

        product.serial_number = match self.store.insert_product(&product).await {
            Ok(serial_number) => serial_number,
            Err(err) => {
                if first_period > Decimal::ZERO {
                    self.refund(&product, first_period).await;
                }
                return Err(err);
            }
        };

        if let Err(err) = server
            .create_account(product.serial_number, &request.account_configuration)
            .await
        {
            if first_period > Decimal::ZERO {
                self.refund(&product, first_period).await;
            }
            if let Err(cleanup) = self.terminate(&mut product, today).await {
                warn!(
                    ?cleanup,
                    serial_number = product.serial_number,
                    "failed to retire product after provisioning failure"
                );
            }
            return Err(err.into());
        }

        if first_period > Decimal::ZERO {
            self.records
                .add(&BillingRecord {
                    serial_number: 0,
                    wallet_id: product.wallet_id,
                    user_id: product.owner_user_id,
                    product_id: product.product_id,
                    product_serial_number: product.serial_number,
                    billing_cycle: product.billing_cycle(),
                    billed_amount: first_period,
                    billed_at: now,
                })
                .await?;
        }

        info!(
            serial_number = product.serial_number,
            product_id = product.product_id,
            wallet_id = product.wallet_id,
            cycle = %product.billing_cycle(),
            "product purchased"
        );
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::models::{
        BillingOption, PricingPolicy, ProductListingGroup, UsageBillingFactors,
    };
    use crate::billing::store::MemoryBillingStore;
    use crate::provisioning::{
        AccountSnapshot, ProvisioningDriver, ServerConfiguration,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    #[async_trait]
    impl ProvisioningServer for Calls {
        async fn create_account(
            &self,
            serial_number: i64,
            _configuration: &AccountConfiguration,
        ) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(format!("create {serial_number}"));
            Ok(())
        }

        async fn get_account(&self, _serial_number: i64) -> anyhow::Result<AccountSnapshot> {
            Ok(AccountSnapshot::default())
        }

        async fn update_account(
            &self,
            _serial_number: i64,
            _configuration: &AccountConfiguration,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn delete_account(&self, serial_number: i64) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(format!("delete {serial_number}"));
            Ok(())
        }

        async fn suspend_account(&self, serial_number: i64) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(format!("suspend {serial_number}"));
            Ok(())
        }

        async fn unsuspend_account(&self, serial_number: i64) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(format!("unsuspend {serial_number}"));
            Ok(())
        }

        async fn refresh_account(&self, serial_number: i64) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(format!("refresh {serial_number}"));
            Ok(())
        }
    }

    struct Fixed(Arc<Calls>);

    impl ProvisioningDriver for Fixed {
        fn connect(
            &self,
            _instance_id: &str,
            _configuration: &ServerConfiguration,
        ) -> BillingResult<Arc<dyn ProvisioningServer>> {
            Ok(self.0.clone())
        }
    }

    struct Harness {
        service: ProductService,
        ledger: WalletLedger,
        calls: Arc<Calls>,
        listing_id: i64,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
    }

    async fn harness() -> Harness {
        let store: Arc<dyn BillingStore> = Arc::new(MemoryBillingStore::new());
        let calls = Arc::new(Calls::default());
        let registry =
            ProvisioningRegistry::new().with_driver("fake", Arc::new(Fixed(calls.clone())));
        let ledger = WalletLedger::new(store.clone());
        let catalog = Catalog::new(store.clone());
        let group_id = catalog
            .add_group(&ProductListingGroup {
                product_group_id: 0,
                name: "web".into(),
                description: "web hosting".into(),
                hidden: false,
            })
            .await
            .unwrap();
        let listing_id = catalog
            .add_listing(&ProductListing {
                product_id: 0,
                product_group_id: group_id,
                name: "starter".into(),
                description: "starter plan".into(),
                server_type: "fake".into(),
                server_instance_id: "node-1".into(),
                server_configuration: ServerConfiguration::new(),
                billing_options: vec![
                    BillingOption::recurring(BillingCycle::Monthly, dec!(40)),
                    BillingOption::usage_based(dec!(100)),
                ],
                usage_billing_factors: UsageBillingFactors::new(PricingPolicy::Sum)
                    .with_factor(1, 0, dec!(1)),
                hidden: false,
                discontinued: false,
            })
            .await
            .unwrap();
        let service = ProductService::new(
            store.clone(),
            ledger.clone(),
            BillingRecords::new(store.clone()),
            catalog,
            Arc::new(registry),
        );
        Harness {
            service,
            ledger,
            calls,
            listing_id,
        }
    }

    async fn funded_wallet(h: &Harness, owner: i64, amount: Decimal) -> i64 {
        let wallet = h
            .ledger
            .get_or_create_wallet(WalletOwner::User(owner))
            .await
            .unwrap();
        h.ledger.deposit(wallet.wallet_id, amount).await.unwrap();
        wallet.wallet_id
    }

    #[tokio::test]
    async fn purchase_charges_first_period_and_provisions() {
        let h = harness().await;
        let wallet_id = funded_wallet(&h, 1, dec!(50)).await;

        let product = h
            .service
            .purchase(
                &PurchaseRequest {
                    listing_id: h.listing_id,
                    owner_user_id: 1,
                    owner_affiliation_id: 0,
                    billing_cycle: BillingCycle::Monthly,
                    account_configuration: AccountConfiguration::new(),
                },
                now(),
            )
            .await
            .unwrap();

        assert_eq!(product.wallet_id, wallet_id);
        assert_eq!(h.ledger.balance(wallet_id).await.unwrap(), dec!(10));
        assert_eq!(
            h.calls.0.lock().unwrap().as_slice(),
            [format!("create {}", product.serial_number)]
        );
    }

    #[tokio::test]
    async fn purchase_without_funds_persists_nothing() {
        let h = harness().await;
        funded_wallet(&h, 1, dec!(10)).await;

        let err = h
            .service
            .purchase(
                &PurchaseRequest {
                    listing_id: h.listing_id,
                    owner_user_id: 1,
                    owner_affiliation_id: 0,
                    billing_cycle: BillingCycle::Monthly,
                    account_configuration: AccountConfiguration::new(),
                },
                now(),
            )
            .await
            .unwrap_err();

        assert!(err.is_insufficient_funds());
        assert!(h.service.by_user(1).await.unwrap().is_empty());
        assert!(h.calls.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn usage_charge_advances_month_spending() {
        let h = harness().await;
        let wallet_id = funded_wallet(&h, 2, dec!(100)).await;
        let listing = h.service.catalog.get_listing(h.listing_id).await.unwrap();
        let product = h
            .service
            .catalog
            .create_product(&listing, 2, 0, BillingCycle::UsageBased, wallet_id, now().date_naive())
            .unwrap();
        let serial = h.service.create(&product).await.unwrap();
        let mut product = h.service.get(serial).await.unwrap();

        let outcome = h
            .service
            .collect_payment(&mut product, ChargeRequest::Usage { total: dec!(30) }, now())
            .await
            .unwrap();
        assert!(matches!(outcome, PaymentOutcome::Charged { amount, .. } if amount == dec!(30)));

        let outcome = h
            .service
            .collect_payment(&mut product, ChargeRequest::Usage { total: dec!(30) }, now())
            .await
            .unwrap();
        assert_eq!(outcome, PaymentOutcome::NothingOwed);

        let stored = h.service.get(serial).await.unwrap();
        assert_eq!(stored.billing_option.current_month_spending, dec!(30));
        assert_eq!(h.ledger.balance(wallet_id).await.unwrap(), dec!(70));

        assert!(matches!(
            h.service
                .collect_payment(&mut product, ChargeRequest::Recurring, now())
                .await,
            Err(BillingError::ChargeMismatch(BillingCycle::UsageBased))
        ));
    }

    #[tokio::test]
    async fn termination_dates_are_validated() {
        let h = harness().await;
        let wallet_id = funded_wallet(&h, 3, dec!(1)).await;
        let listing = h.service.catalog.get_listing(h.listing_id).await.unwrap();
        let today = now().date_naive();
        let yesterday = today.pred_opt().unwrap();
        let tomorrow = today.succ_opt().unwrap();

        let monthly = h
            .service
            .catalog
            .create_product(&listing, 3, 0, BillingCycle::Monthly, wallet_id, today)
            .unwrap();
        let serial = h.service.create(&monthly).await.unwrap();
        let mut monthly = h.service.get(serial).await.unwrap();

        assert!(matches!(
            h.service.to_terminate_on(&mut monthly, yesterday, today).await,
            Err(BillingError::CannotRewriteHistory { .. })
        ));
        h.service
            .to_terminate_on(&mut monthly, tomorrow, today)
            .await
            .unwrap();
        assert_eq!(monthly.date_termination, Some(tomorrow));
        assert!(h.calls.0.lock().unwrap().is_empty());

        assert!(h.service.reinstate(&mut monthly).await.unwrap());
        assert_eq!(h.service.get(serial).await.unwrap().date_termination, None);

        let usage = h
            .service
            .catalog
            .create_product(&listing, 3, 0, BillingCycle::UsageBased, wallet_id, today)
            .unwrap();
        let serial = h.service.create(&usage).await.unwrap();
        let mut usage = h.service.get(serial).await.unwrap();
        assert!(matches!(
            h.service.to_terminate_on(&mut usage, tomorrow, today).await,
            Err(BillingError::ImmediateTerminationRequired { .. })
        ));
        h.service
            .to_terminate_on(&mut usage, today, today)
            .await
            .unwrap();
        assert!(h
            .calls
            .0
            .lock()
            .unwrap()
            .contains(&format!("suspend {serial}")));
    }

    #[tokio::test]
    async fn terminate_twice_is_a_noop() {
        let h = harness().await;
        let wallet_id = funded_wallet(&h, 4, dec!(1)).await;
        let listing = h.service.catalog.get_listing(h.listing_id).await.unwrap();
        let today = now().date_naive();
        let product = h
            .service
            .catalog
            .create_product(&listing, 4, 0, BillingCycle::Monthly, wallet_id, today)
            .unwrap();
        let serial = h.service.create(&product).await.unwrap();
        let mut product = h.service.get(serial).await.unwrap();
        let next_week = today.checked_add_days(chrono::Days::new(7)).unwrap();
        h.service
            .to_terminate_on(&mut product, next_week, today)
            .await
            .unwrap();

        assert!(h.service.terminate(&mut product, today).await.unwrap());
        assert_eq!(product.date_termination, Some(today));
        assert!(!h.service.terminate(&mut product, today).await.unwrap());

        let mut reloaded = h.service.get(serial).await.unwrap();
        assert!(reloaded.terminated);
        assert_eq!(reloaded.date_termination, Some(today));
        assert!(!h.service.terminate(&mut reloaded, today).await.unwrap());

        let all = h.service.all().await.unwrap();
        assert_eq!(all, vec![reloaded]);
    }

    #[tokio::test]
    async fn invalid_products_are_rejected_before_storage() {
        let h = harness().await;
        let product = Product {
            serial_number: 0,
            owner_user_id: 0,
            owner_affiliation_id: 0,
            product_id: h.listing_id,
            date_creation: now().date_naive(),
            date_last_bill: now().date_naive(),
            date_termination: None,
            terminated: false,
            wallet_id: 1,
            billing_option: BillingOption::recurring(BillingCycle::Monthly, dec!(1)),
        };
        assert!(matches!(
            h.service.create(&product).await,
            Err(BillingError::InvalidOwnerId)
        ));
        assert!(matches!(
            h.service.get(0).await,
            Err(BillingError::InvalidSerialNumber)
        ));
    }
}
