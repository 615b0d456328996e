//! Persistence seam for the billing core.
//!
//! Every wallet mutation is a single conditional update so concurrent sweeps,
//! possibly running in different processes, cannot overdraw a wallet. Methods
//! returning `bool` report whether the guarded update applied.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::models::{
    BillingCycle, BillingRecord, Product, ProductListing, ProductListingGroup, Wallet,
    WalletOwner,
};
use crate::error::BillingResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryBillingStore;
pub use postgres::PgBillingStore;

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Lowest-id enabled wallet of the owner, created when none exists.
    async fn get_or_create_wallet(&self, owner: WalletOwner) -> BillingResult<Wallet>;

    async fn get_wallet(&self, wallet_id: i64) -> BillingResult<Option<Wallet>>;

    async fn deposit(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool>;

    /// Applies only while the unsecured balance covers `amount`.
    async fn try_spend(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool>;

    /// Applies regardless of balance; may leave the wallet negative.
    async fn force_spend(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool>;

    async fn secure_funds(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool>;

    async fn release_secured(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool>;

    async fn spend_secured(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool>;

    async fn set_wallet_disabled(&self, wallet_id: i64, disabled: bool) -> BillingResult<bool>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_group(&self, group: &ProductListingGroup) -> BillingResult<i64>;

    async fn get_group(&self, group_id: i64) -> BillingResult<Option<ProductListingGroup>>;

    async fn update_group(&self, group: &ProductListingGroup) -> BillingResult<bool>;

    async fn delete_group(&self, group_id: i64) -> BillingResult<bool>;

    async fn insert_listing(&self, listing: &ProductListing) -> BillingResult<i64>;

    async fn get_listing(&self, product_id: i64) -> BillingResult<Option<ProductListing>>;

    async fn update_listing(&self, listing: &ProductListing) -> BillingResult<bool>;

    async fn delete_listing(&self, product_id: i64) -> BillingResult<bool>;

    async fn listings_by_group(&self, group_id: i64) -> BillingResult<Vec<ProductListing>>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert_product(&self, product: &Product) -> BillingResult<i64>;

    async fn get_product(&self, serial_number: i64) -> BillingResult<Option<Product>>;

    /// Persists owners, listing, wallet, price and current month spending.
    async fn update_product(&self, product: &Product) -> BillingResult<bool>;

    /// Sets or clears the termination date of a product that is not terminated yet.
    async fn schedule_termination(
        &self,
        serial_number: i64,
        date: Option<NaiveDate>,
    ) -> BillingResult<bool>;

    /// Flags the product terminated. A termination date later than `today` is
    /// pulled back to `today`. Returns `false` when it already was terminated.
    async fn mark_terminated(&self, serial_number: i64, today: NaiveDate) -> BillingResult<bool>;

    async fn set_last_bill(&self, serial_number: i64, date: NaiveDate) -> BillingResult<bool>;

    /// Not terminated and without a termination date on or before `today`.
    async fn active_products_by_cycle(
        &self,
        cycle: BillingCycle,
        today: NaiveDate,
    ) -> BillingResult<Vec<Product>>;

    /// Not terminated with a termination date on or before `today`.
    async fn products_to_terminate(&self, today: NaiveDate) -> BillingResult<Vec<Product>>;

    async fn products_by_user(&self, owner_user_id: i64) -> BillingResult<Vec<Product>>;

    async fn products_by_affiliation(&self, owner_affiliation_id: i64)
        -> BillingResult<Vec<Product>>;

    async fn products_by_listing(&self, product_id: i64) -> BillingResult<Vec<Product>>;

    /// Every product, terminated ones included, by serial number.
    async fn all_products(&self) -> BillingResult<Vec<Product>>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_record(&self, record: &BillingRecord) -> BillingResult<i64>;

    /// Newest first.
    async fn records_by_wallet(&self, wallet_id: i64) -> BillingResult<Vec<BillingRecord>>;

    /// Newest first.
    async fn all_records(&self) -> BillingResult<Vec<BillingRecord>>;
}

pub trait BillingStore: WalletStore + CatalogStore + ProductStore + RecordStore {}

impl<T> BillingStore for T where T: WalletStore + CatalogStore + ProductStore + RecordStore {}
