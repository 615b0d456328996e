use chrono::{NaiveDate, TimeZone, Utc};
use hosting_billing::billing::store::{CatalogStore, ProductStore, RecordStore, WalletStore};
use hosting_billing::billing::{
    BillingCycle, BillingOption, BillingRecord, PgBillingStore, PricingPolicy, Product,
    ProductListing, ProductListingGroup, UsageBillingFactors, WalletOwner,
};
use hosting_billing::provisioning::ServerConfiguration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

async fn seed_listing(store: &PgBillingStore) -> ProductListing {
    let group_id = store
        .insert_group(&ProductListingGroup {
            product_group_id: 0,
            name: "vps".into(),
            description: "virtual servers".into(),
            hidden: false,
        })
        .await
        .unwrap();
    let listing = ProductListing {
        product_id: 0,
        product_group_id: group_id,
        name: "vps-2".into(),
        description: "2 vCPU".into(),
        server_type: "http".into(),
        server_instance_id: "ams-3".into(),
        server_configuration: ServerConfiguration::new()
            .with("endpoint", "https://panel.example.net")
            .with("timeout_secs", 15_i64),
        billing_options: vec![
            BillingOption::recurring(BillingCycle::Monthly, dec!(12.50)),
            BillingOption::usage_based(dec!(80)),
        ],
        usage_billing_factors: UsageBillingFactors::new(PricingPolicy::Max)
            .with_factor(1, 0, dec!(0.02))
            .with_factor(2, 1, dec!(1.5)),
        hidden: false,
        discontinued: false,
    };
    let product_id = store.insert_listing(&listing).await.unwrap();
    ProductListing {
        product_id,
        ..listing
    }
}

fn product(
    listing: &ProductListing,
    wallet_id: i64,
    cycle: BillingCycle,
    last_bill: NaiveDate,
) -> Product {
    Product {
        serial_number: 0,
        owner_user_id: 3,
        owner_affiliation_id: 0,
        product_id: listing.product_id,
        date_creation: last_bill,
        date_last_bill: last_bill,
        date_termination: None,
        terminated: false,
        wallet_id,
        billing_option: listing
            .billing_option(cycle)
            .cloned()
            .unwrap(),
    }
}

// key: billing-postgres-tests -> conditional wallet updates
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn wallet_updates_are_guarded(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = PgBillingStore::new(pool);

    let wallet = store
        .get_or_create_wallet(WalletOwner::User(3))
        .await
        .unwrap();
    let again = store
        .get_or_create_wallet(WalletOwner::User(3))
        .await
        .unwrap();
    assert_eq!(wallet.wallet_id, again.wallet_id);
    assert_eq!(wallet.balance, Decimal::ZERO);

    let id = wallet.wallet_id;
    assert!(store.deposit(id, dec!(20)).await.unwrap());
    assert!(store.secure_funds(id, dec!(15)).await.unwrap());
    assert!(!store.try_spend(id, dec!(6)).await.unwrap());
    assert!(store.try_spend(id, dec!(5)).await.unwrap());
    assert!(store.release_secured(id, dec!(5)).await.unwrap());
    assert!(store.spend_secured(id, dec!(10)).await.unwrap());
    assert!(store.force_spend(id, dec!(1.25)).await.unwrap());

    let stored = store.get_wallet(id).await.unwrap().unwrap();
    assert_eq!(stored.balance, dec!(-1.25));
    assert_eq!(stored.secured, Decimal::ZERO);

    assert!(store.set_wallet_disabled(id, true).await.unwrap());
    assert!(!store.deposit(id, dec!(1)).await.unwrap());
    let replacement = store
        .get_or_create_wallet(WalletOwner::User(3))
        .await
        .unwrap();
    assert_ne!(replacement.wallet_id, id);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn listings_round_trip_through_jsonb(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = PgBillingStore::new(pool);
    let listing = seed_listing(&store).await;

    let stored = store
        .get_listing(listing.product_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, listing);

    let grouped = store
        .listings_by_group(listing.product_group_id)
        .await
        .unwrap();
    assert_eq!(grouped.len(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn product_selection_follows_termination_state(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = PgBillingStore::new(pool);
    let listing = seed_listing(&store).await;
    let wallet = store
        .get_or_create_wallet(WalletOwner::User(3))
        .await
        .unwrap();

    let active = store
        .insert_product(&product(&listing, wallet.wallet_id, BillingCycle::Monthly, today()))
        .await
        .unwrap();
    let pending = store
        .insert_product(&product(&listing, wallet.wallet_id, BillingCycle::Monthly, today()))
        .await
        .unwrap();
    let usage = store
        .insert_product(&product(&listing, wallet.wallet_id, BillingCycle::UsageBased, today()))
        .await
        .unwrap();

    assert!(store
        .schedule_termination(pending, Some(today()))
        .await
        .unwrap());

    let monthly: Vec<i64> = store
        .active_products_by_cycle(BillingCycle::Monthly, today())
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.serial_number)
        .collect();
    assert_eq!(monthly, vec![active]);

    let due: Vec<i64> = store
        .products_to_terminate(today())
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.serial_number)
        .collect();
    assert_eq!(due, vec![pending]);

    assert!(store.mark_terminated(pending, today()).await.unwrap());
    assert!(!store.mark_terminated(pending, today()).await.unwrap());
    assert!(store.products_to_terminate(today()).await.unwrap().is_empty());

    let usage_product = store.get_product(usage).await.unwrap().unwrap();
    assert_eq!(usage_product.billing_option.monthly_spending_cap, dec!(80));
    assert_eq!(store.products_by_user(3).await.unwrap().len(), 3);

    let later = NaiveDate::from_ymd_opt(2026, 10, 25).unwrap();
    assert!(store.schedule_termination(active, Some(later)).await.unwrap());
    assert!(store.mark_terminated(active, today()).await.unwrap());
    let terminated = store.get_product(active).await.unwrap().unwrap();
    assert_eq!(terminated.date_termination, Some(today()));

    let all: Vec<i64> = store
        .all_products()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.serial_number)
        .collect();
    assert_eq!(all, vec![active, pending, usage]);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn records_are_listed_newest_first(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = PgBillingStore::new(pool);
    let listing = seed_listing(&store).await;
    let wallet = store
        .get_or_create_wallet(WalletOwner::User(3))
        .await
        .unwrap();
    let serial = store
        .insert_product(&product(&listing, wallet.wallet_id, BillingCycle::Monthly, today()))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for day in [1, 2] {
        let id = store
            .insert_record(&BillingRecord {
                serial_number: 0,
                wallet_id: wallet.wallet_id,
                user_id: 3,
                product_id: listing.product_id,
                product_serial_number: serial,
                billing_cycle: BillingCycle::Monthly,
                billed_amount: dec!(12.50),
                billed_at: Utc.with_ymd_and_hms(2026, 10, day, 0, 0, 0).unwrap(),
            })
            .await
            .unwrap();
        ids.push(id);
    }

    let listed: Vec<i64> = store
        .records_by_wallet(wallet.wallet_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.serial_number)
        .collect();
    assert_eq!(listed, vec![ids[1], ids[0]]);
    assert_eq!(store.all_records().await.unwrap().len(), 2);
}
