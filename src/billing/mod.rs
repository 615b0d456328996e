pub mod catalog;
pub mod models;
pub mod pricing;
pub mod processor;
pub mod product;
pub mod records;
pub mod scheduler;
pub mod store;
pub mod wallet;

use std::sync::Arc;

use sqlx::PgPool;

use crate::provisioning::ProvisioningRegistry;

pub use catalog::Catalog;
pub use models::{
    BillingCycle, BillingOption, BillingRecord, PricingPolicy, Product, ProductListing,
    ProductListingGroup, ProductState, UsageBillingFactor, UsageBillingFactors, Wallet,
    WalletOwner, INTERNAL_WALLET_ID,
};
pub use pricing::{outstanding_usage_amount, usage_based_amount, ResourceUsage};
pub use processor::{BillingCycleProcessor, SweepError, SweepScope};
pub use product::{ChargeRequest, PaymentOutcome, ProductService, PurchaseRequest};
pub use records::BillingRecords;
pub use scheduler::{
    process_tick as run_billing_sweep, spawn as spawn_billing_scheduler, SchedulerConfig, Sweep,
};
pub use store::{BillingStore, MemoryBillingStore, PgBillingStore};
pub use wallet::WalletLedger;

/// key: billing-service -> wires ledger, catalog, products, records and sweeps
#[derive(Clone)]
pub struct BillingService {
    pub wallets: WalletLedger,
    pub catalog: Catalog,
    pub products: ProductService,
    pub records: BillingRecords,
    pub processor: Arc<BillingCycleProcessor>,
}

impl BillingService {
    pub fn new(store: Arc<dyn BillingStore>, registry: ProvisioningRegistry) -> Self {
        let wallets = WalletLedger::new(store.clone());
        let catalog = Catalog::new(store.clone());
        let records = BillingRecords::new(store.clone());
        let products = ProductService::new(
            store,
            wallets.clone(),
            records.clone(),
            catalog.clone(),
            Arc::new(registry),
        );
        let processor = Arc::new(BillingCycleProcessor::new(products.clone()));
        Self {
            wallets,
            catalog,
            products,
            records,
            processor,
        }
    }

    pub fn postgres(pool: PgPool, registry: ProvisioningRegistry) -> Self {
        Self::new(Arc::new(PgBillingStore::new(pool)), registry)
    }

    pub fn in_memory(registry: ProvisioningRegistry) -> Self {
        Self::new(Arc::new(MemoryBillingStore::new()), registry)
    }
}
