use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::{CatalogStore, ProductStore, RecordStore, WalletStore};
use crate::billing::models::{
    BillingCycle, BillingRecord, Product, ProductListing, ProductListingGroup, Wallet,
    WalletOwner,
};
use crate::error::{BillingError, BillingResult};

/// Process-local store backed by concurrent maps. Used by tests and by
/// deployments that do not need persistence.
#[derive(Debug)]
pub struct MemoryBillingStore {
    wallets: DashMap<i64, Wallet>,
    groups: DashMap<i64, ProductListingGroup>,
    listings: DashMap<i64, ProductListing>,
    products: DashMap<i64, Product>,
    records: DashMap<i64, BillingRecord>,
    wallet_seq: AtomicI64,
    group_seq: AtomicI64,
    listing_seq: AtomicI64,
    product_seq: AtomicI64,
    record_seq: AtomicI64,
    // serializes wallet creation so an owner never gets two enabled wallets
    wallet_creation: tokio::sync::Mutex<()>,
}

impl Default for MemoryBillingStore {
    fn default() -> Self {
        Self {
            wallets: DashMap::new(),
            groups: DashMap::new(),
            listings: DashMap::new(),
            products: DashMap::new(),
            records: DashMap::new(),
            wallet_seq: AtomicI64::new(1),
            group_seq: AtomicI64::new(1),
            listing_seq: AtomicI64::new(1),
            product_seq: AtomicI64::new(1),
            record_seq: AtomicI64::new(1),
            wallet_creation: tokio::sync::Mutex::new(()),
        }
    }
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn enabled_wallet_of(&self, owner: WalletOwner) -> Option<Wallet> {
        self.wallets
            .iter()
            .filter(|entry| entry.owner == owner && !entry.disabled)
            .min_by_key(|entry| entry.wallet_id)
            .map(|entry| entry.value().clone())
    }

    /// Applies `update` under the wallet's entry lock when `guard` holds.
    fn guarded_update(
        &self,
        wallet_id: i64,
        guard: impl FnOnce(&Wallet) -> bool,
        update: impl FnOnce(&mut Wallet),
    ) -> bool {
        let Some(mut wallet) = self.wallets.get_mut(&wallet_id) else {
            return false;
        };
        if wallet.disabled || !guard(&*wallet) {
            return false;
        }
        update(&mut *wallet);
        true
    }

    fn collect_products(&self, predicate: impl Fn(&Product) -> bool) -> Vec<Product> {
        let mut products: Vec<Product> = self
            .products
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        products.sort_by_key(|product| product.serial_number);
        products
    }

    fn collect_records(&self, predicate: impl Fn(&BillingRecord) -> bool) -> Vec<BillingRecord> {
        let mut records: Vec<BillingRecord> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| {
            b.billed_at
                .cmp(&a.billed_at)
                .then(b.serial_number.cmp(&a.serial_number))
        });
        records
    }
}

fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst)
}

#[async_trait]
impl WalletStore for MemoryBillingStore {
    async fn get_or_create_wallet(&self, owner: WalletOwner) -> BillingResult<Wallet> {
        let _creation = self.wallet_creation.lock().await;
        if let Some(wallet) = self.enabled_wallet_of(owner) {
            return Ok(wallet);
        }
        let wallet = Wallet {
            wallet_id: next_id(&self.wallet_seq),
            owner,
            balance: Decimal::ZERO,
            secured: Decimal::ZERO,
            disabled: false,
        };
        self.wallets.insert(wallet.wallet_id, wallet.clone());
        Ok(wallet)
    }

    async fn get_wallet(&self, wallet_id: i64) -> BillingResult<Option<Wallet>> {
        Ok(self
            .wallets
            .get(&wallet_id)
            .map(|entry| entry.value().clone()))
    }

    async fn deposit(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        Ok(self.guarded_update(wallet_id, |_| true, |w| w.balance += amount))
    }

    async fn try_spend(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        Ok(self.guarded_update(
            wallet_id,
            |w| w.available() >= amount,
            |w| w.balance -= amount,
        ))
    }

    async fn force_spend(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        Ok(self.guarded_update(wallet_id, |_| true, |w| w.balance -= amount))
    }

    async fn secure_funds(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        Ok(self.guarded_update(
            wallet_id,
            |w| w.available() >= amount,
            |w| w.secured += amount,
        ))
    }

    async fn release_secured(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        Ok(self.guarded_update(
            wallet_id,
            |w| w.secured >= amount,
            |w| w.secured -= amount,
        ))
    }

    async fn spend_secured(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        Ok(self.guarded_update(
            wallet_id,
            |w| w.secured >= amount,
            |w| {
                w.secured -= amount;
                w.balance -= amount;
            },
        ))
    }

    async fn set_wallet_disabled(&self, wallet_id: i64, disabled: bool) -> BillingResult<bool> {
        let _creation = self.wallet_creation.lock().await;
        match self.wallets.get_mut(&wallet_id) {
            Some(mut wallet) => {
                wallet.disabled = disabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryBillingStore {
    async fn insert_group(&self, group: &ProductListingGroup) -> BillingResult<i64> {
        let id = next_id(&self.group_seq);
        let mut stored = group.clone();
        stored.product_group_id = id;
        self.groups.insert(id, stored);
        Ok(id)
    }

    async fn get_group(&self, group_id: i64) -> BillingResult<Option<ProductListingGroup>> {
        Ok(self.groups.get(&group_id).map(|entry| entry.value().clone()))
    }

    async fn update_group(&self, group: &ProductListingGroup) -> BillingResult<bool> {
        match self.groups.get_mut(&group.product_group_id) {
            Some(mut stored) => {
                *stored = group.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_group(&self, group_id: i64) -> BillingResult<bool> {
        if self
            .listings
            .iter()
            .any(|entry| entry.product_group_id == group_id)
        {
            // mirrors the ON DELETE RESTRICT of the relational schema
            return Err(BillingError::InvalidConfiguration(format!(
                "product listing group {group_id} still has listings"
            )));
        }
        Ok(self.groups.remove(&group_id).is_some())
    }

    async fn insert_listing(&self, listing: &ProductListing) -> BillingResult<i64> {
        let id = next_id(&self.listing_seq);
        let mut stored = listing.clone();
        stored.product_id = id;
        self.listings.insert(id, stored);
        Ok(id)
    }

    async fn get_listing(&self, product_id: i64) -> BillingResult<Option<ProductListing>> {
        Ok(self
            .listings
            .get(&product_id)
            .map(|entry| entry.value().clone()))
    }

    async fn update_listing(&self, listing: &ProductListing) -> BillingResult<bool> {
        match self.listings.get_mut(&listing.product_id) {
            Some(mut stored) => {
                *stored = listing.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_listing(&self, product_id: i64) -> BillingResult<bool> {
        Ok(self.listings.remove(&product_id).is_some())
    }

    async fn listings_by_group(&self, group_id: i64) -> BillingResult<Vec<ProductListing>> {
        let mut listings: Vec<ProductListing> = self
            .listings
            .iter()
            .filter(|entry| entry.product_group_id == group_id)
            .map(|entry| entry.value().clone())
            .collect();
        listings.sort_by_key(|listing| listing.product_id);
        Ok(listings)
    }
}

#[async_trait]
impl ProductStore for MemoryBillingStore {
    async fn insert_product(&self, product: &Product) -> BillingResult<i64> {
        let serial_number = next_id(&self.product_seq);
        let mut stored = product.clone();
        stored.serial_number = serial_number;
        self.products.insert(serial_number, stored);
        Ok(serial_number)
    }

    async fn get_product(&self, serial_number: i64) -> BillingResult<Option<Product>> {
        Ok(self
            .products
            .get(&serial_number)
            .map(|entry| entry.value().clone()))
    }

    async fn update_product(&self, product: &Product) -> BillingResult<bool> {
        match self.products.get_mut(&product.serial_number) {
            Some(mut stored) => {
                stored.owner_user_id = product.owner_user_id;
                stored.owner_affiliation_id = product.owner_affiliation_id;
                stored.product_id = product.product_id;
                stored.wallet_id = product.wallet_id;
                stored.billing_option.price = product.billing_option.price;
                stored.billing_option.current_month_spending =
                    product.billing_option.current_month_spending;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn schedule_termination(
        &self,
        serial_number: i64,
        date: Option<NaiveDate>,
    ) -> BillingResult<bool> {
        match self.products.get_mut(&serial_number) {
            Some(mut stored) if !stored.terminated => {
                stored.date_termination = date;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_terminated(&self, serial_number: i64, today: NaiveDate) -> BillingResult<bool> {
        match self.products.get_mut(&serial_number) {
            Some(mut stored) if !stored.terminated => {
                stored.terminated = true;
                stored.date_termination = Some(
                    stored
                        .date_termination
                        .map_or(today, |scheduled| scheduled.min(today)),
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_last_bill(&self, serial_number: i64, date: NaiveDate) -> BillingResult<bool> {
        match self.products.get_mut(&serial_number) {
            Some(mut stored) => {
                stored.date_last_bill = date;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn active_products_by_cycle(
        &self,
        cycle: BillingCycle,
        today: NaiveDate,
    ) -> BillingResult<Vec<Product>> {
        Ok(self.collect_products(|product| {
            product.billing_cycle() == cycle
                && !product.terminated
                && product.date_termination.map_or(true, |date| date > today)
        }))
    }

    async fn products_to_terminate(&self, today: NaiveDate) -> BillingResult<Vec<Product>> {
        Ok(self.collect_products(|product| {
            !product.terminated && product.date_termination.map_or(false, |date| date <= today)
        }))
    }

    async fn products_by_user(&self, owner_user_id: i64) -> BillingResult<Vec<Product>> {
        Ok(self.collect_products(|product| product.owner_user_id == owner_user_id))
    }

    async fn products_by_affiliation(
        &self,
        owner_affiliation_id: i64,
    ) -> BillingResult<Vec<Product>> {
        Ok(self.collect_products(|product| product.owner_affiliation_id == owner_affiliation_id))
    }

    async fn products_by_listing(&self, product_id: i64) -> BillingResult<Vec<Product>> {
        Ok(self.collect_products(|product| product.product_id == product_id))
    }

    async fn all_products(&self) -> BillingResult<Vec<Product>> {
        Ok(self.collect_products(|_| true))
    }
}

#[async_trait]
impl RecordStore for MemoryBillingStore {
    async fn insert_record(&self, record: &BillingRecord) -> BillingResult<i64> {
        let serial_number = next_id(&self.record_seq);
        let mut stored = record.clone();
        stored.serial_number = serial_number;
        self.records.insert(serial_number, stored);
        Ok(serial_number)
    }

    async fn records_by_wallet(&self, wallet_id: i64) -> BillingResult<Vec<BillingRecord>> {
        Ok(self.collect_records(|record| record.wallet_id == wallet_id))
    }

    async fn all_records(&self) -> BillingResult<Vec<BillingRecord>> {
        Ok(self.collect_records(|_| true))
    }
}
