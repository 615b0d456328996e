use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::{CatalogStore, ProductStore, RecordStore, WalletStore};
use crate::billing::models::{
    BillingCycle, BillingOption, BillingRecord, Product, ProductListing, ProductListingGroup,
    UsageBillingFactors, Wallet, WalletOwner,
};
use crate::error::BillingResult;
use crate::provisioning::ServerConfiguration;

const WALLET_COLUMNS: &str = "wallet_id, owner_kind, owner_id, balance, secured, disabled";

const LISTING_COLUMNS: &str = "product_id, product_group_id, name, description, server_type, \
     server_instance_id, server_configuration, billing_options, usage_billing_factors, hidden, \
     discontinued";

const PRODUCT_COLUMNS: &str = "serial_number, owner_user_id, owner_affiliation_id, product_id, \
     date_creation, date_last_bill, date_termination, terminated, wallet_id, billing_cycle, price, \
     monthly_spending_cap, current_month_spending";

const RECORD_COLUMNS: &str = "serial_number, wallet_id, user_id, product_id, \
     product_serial_number, billing_cycle, billed_amount, billed_at";

/// key: billing-store-postgres -> wallets,catalog,products,records
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_enabled_wallet(&self, owner: WalletOwner) -> BillingResult<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM billing_wallets \
             WHERE owner_kind = $1 AND owner_id = $2 AND disabled = FALSE \
             ORDER BY wallet_id ASC LIMIT 1"
        ))
        .bind(owner.kind())
        .bind(owner.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn guarded_wallet_update(
        &self,
        statement: &str,
        wallet_id: i64,
        amount: Decimal,
    ) -> BillingResult<bool> {
        let result = sqlx::query(statement)
            .bind(amount)
            .bind(wallet_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_products(&self, filter: &str, value: i64) -> BillingResult<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM billing_products WHERE {filter} = $1 \
             ORDER BY serial_number ASC"
        ))
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }
}

#[async_trait]
impl WalletStore for PgBillingStore {
    async fn get_or_create_wallet(&self, owner: WalletOwner) -> BillingResult<Wallet> {
        if let Some(wallet) = self.find_enabled_wallet(owner).await? {
            return Ok(wallet);
        }

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO billing_wallets (owner_kind, owner_id)
            VALUES ($1, $2)
            ON CONFLICT (owner_kind, owner_id) WHERE disabled = FALSE DO NOTHING
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(owner.kind())
        .bind(owner.id())
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => wallet_from_row(&row),
            // lost the race against a concurrent creator
            None => self
                .find_enabled_wallet(owner)
                .await?
                .ok_or(sqlx::Error::RowNotFound.into()),
        }
    }

    async fn get_wallet(&self, wallet_id: i64) -> BillingResult<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM billing_wallets WHERE wallet_id = $1"
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn deposit(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        self.guarded_wallet_update(
            r#"
            UPDATE billing_wallets
            SET balance = balance + $1, updated_at = NOW()
            WHERE wallet_id = $2 AND disabled = FALSE
            "#,
            wallet_id,
            amount,
        )
        .await
    }

    async fn try_spend(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        self.guarded_wallet_update(
            r#"
            UPDATE billing_wallets
            SET balance = balance - $1, updated_at = NOW()
            WHERE wallet_id = $2 AND disabled = FALSE AND balance - secured >= $1
            "#,
            wallet_id,
            amount,
        )
        .await
    }

    async fn force_spend(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        self.guarded_wallet_update(
            r#"
            UPDATE billing_wallets
            SET balance = balance - $1, updated_at = NOW()
            WHERE wallet_id = $2 AND disabled = FALSE
            "#,
            wallet_id,
            amount,
        )
        .await
    }

    async fn secure_funds(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        self.guarded_wallet_update(
            r#"
            UPDATE billing_wallets
            SET secured = secured + $1, updated_at = NOW()
            WHERE wallet_id = $2 AND disabled = FALSE AND balance - secured >= $1
            "#,
            wallet_id,
            amount,
        )
        .await
    }

    async fn release_secured(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        self.guarded_wallet_update(
            r#"
            UPDATE billing_wallets
            SET secured = secured - $1, updated_at = NOW()
            WHERE wallet_id = $2 AND disabled = FALSE AND secured >= $1
            "#,
            wallet_id,
            amount,
        )
        .await
    }

    async fn spend_secured(&self, wallet_id: i64, amount: Decimal) -> BillingResult<bool> {
        self.guarded_wallet_update(
            r#"
            UPDATE billing_wallets
            SET secured = secured - $1, balance = balance - $1, updated_at = NOW()
            WHERE wallet_id = $2 AND disabled = FALSE AND secured >= $1
            "#,
            wallet_id,
            amount,
        )
        .await
    }

    async fn set_wallet_disabled(&self, wallet_id: i64, disabled: bool) -> BillingResult<bool> {
        let result = sqlx::query(
            "UPDATE billing_wallets SET disabled = $1, updated_at = NOW() WHERE wallet_id = $2",
        )
        .bind(disabled)
        .bind(wallet_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CatalogStore for PgBillingStore {
    async fn insert_group(&self, group: &ProductListingGroup) -> BillingResult<i64> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO billing_product_listing_groups (name, description, hidden)
            VALUES ($1, $2, $3)
            RETURNING product_group_id
            "#,
        )
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.hidden)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_group(&self, group_id: i64) -> BillingResult<Option<ProductListingGroup>> {
        let row = sqlx::query(
            r#"
            SELECT product_group_id, name, description, hidden
            FROM billing_product_listing_groups
            WHERE product_group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ProductListingGroup {
            product_group_id: row.try_get("product_group_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            hidden: row.try_get("hidden")?,
        }))
    }

    async fn update_group(&self, group: &ProductListingGroup) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_product_listing_groups
            SET name = $1, description = $2, hidden = $3
            WHERE product_group_id = $4
            "#,
        )
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.hidden)
        .bind(group.product_group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_group(&self, group_id: i64) -> BillingResult<bool> {
        let result =
            sqlx::query("DELETE FROM billing_product_listing_groups WHERE product_group_id = $1")
                .bind(group_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_listing(&self, listing: &ProductListing) -> BillingResult<i64> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO billing_product_listings (
                product_group_id,
                name,
                description,
                server_type,
                server_instance_id,
                server_configuration,
                billing_options,
                usage_billing_factors,
                hidden,
                discontinued
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING product_id
            "#,
        )
        .bind(listing.product_group_id)
        .bind(&listing.name)
        .bind(&listing.description)
        .bind(&listing.server_type)
        .bind(&listing.server_instance_id)
        .bind(Json(&listing.server_configuration))
        .bind(Json(&listing.billing_options))
        .bind(Json(&listing.usage_billing_factors))
        .bind(listing.hidden)
        .bind(listing.discontinued)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_listing(&self, product_id: i64) -> BillingResult<Option<ProductListing>> {
        let row = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM billing_product_listings WHERE product_id = $1"
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(listing_from_row).transpose()
    }

    async fn update_listing(&self, listing: &ProductListing) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_product_listings
            SET product_group_id = $1,
                name = $2,
                description = $3,
                server_type = $4,
                server_instance_id = $5,
                server_configuration = $6,
                billing_options = $7,
                usage_billing_factors = $8,
                hidden = $9,
                discontinued = $10
            WHERE product_id = $11
            "#,
        )
        .bind(listing.product_group_id)
        .bind(&listing.name)
        .bind(&listing.description)
        .bind(&listing.server_type)
        .bind(&listing.server_instance_id)
        .bind(Json(&listing.server_configuration))
        .bind(Json(&listing.billing_options))
        .bind(Json(&listing.usage_billing_factors))
        .bind(listing.hidden)
        .bind(listing.discontinued)
        .bind(listing.product_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_listing(&self, product_id: i64) -> BillingResult<bool> {
        let result = sqlx::query("DELETE FROM billing_product_listings WHERE product_id = $1")
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn listings_by_group(&self, group_id: i64) -> BillingResult<Vec<ProductListing>> {
        let rows = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM billing_product_listings \
             WHERE product_group_id = $1 ORDER BY product_id ASC"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(listing_from_row).collect()
    }
}

#[async_trait]
impl ProductStore for PgBillingStore {
    async fn insert_product(&self, product: &Product) -> BillingResult<i64> {
        let serial_number = sqlx::query_scalar(
            r#"
            INSERT INTO billing_products (
                owner_user_id,
                owner_affiliation_id,
                product_id,
                date_creation,
                date_last_bill,
                date_termination,
                wallet_id,
                billing_cycle,
                price,
                monthly_spending_cap,
                current_month_spending
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING serial_number
            "#,
        )
        .bind(product.owner_user_id)
        .bind(product.owner_affiliation_id)
        .bind(product.product_id)
        .bind(product.date_creation)
        .bind(product.date_last_bill)
        .bind(product.date_termination)
        .bind(product.wallet_id)
        .bind(product.billing_option.billing_cycle.code())
        .bind(product.billing_option.price)
        .bind(product.billing_option.monthly_spending_cap)
        .bind(product.billing_option.current_month_spending)
        .fetch_one(&self.pool)
        .await?;
        Ok(serial_number)
    }

    async fn get_product(&self, serial_number: i64) -> BillingResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM billing_products WHERE serial_number = $1"
        ))
        .bind(serial_number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn update_product(&self, product: &Product) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_products
            SET owner_user_id = $1,
                owner_affiliation_id = $2,
                product_id = $3,
                wallet_id = $4,
                price = $5,
                current_month_spending = $6
            WHERE serial_number = $7
            "#,
        )
        .bind(product.owner_user_id)
        .bind(product.owner_affiliation_id)
        .bind(product.product_id)
        .bind(product.wallet_id)
        .bind(product.billing_option.price)
        .bind(product.billing_option.current_month_spending)
        .bind(product.serial_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn schedule_termination(
        &self,
        serial_number: i64,
        date: Option<NaiveDate>,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_products
            SET date_termination = $1
            WHERE serial_number = $2 AND terminated = FALSE
            "#,
        )
        .bind(date)
        .bind(serial_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_terminated(&self, serial_number: i64, today: NaiveDate) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE billing_products
            SET terminated = TRUE,
                date_termination = LEAST(COALESCE(date_termination, $1), $1)
            WHERE serial_number = $2 AND terminated = FALSE
            "#,
        )
        .bind(today)
        .bind(serial_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_last_bill(&self, serial_number: i64, date: NaiveDate) -> BillingResult<bool> {
        let result =
            sqlx::query("UPDATE billing_products SET date_last_bill = $1 WHERE serial_number = $2")
                .bind(date)
                .bind(serial_number)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn active_products_by_cycle(
        &self,
        cycle: BillingCycle,
        today: NaiveDate,
    ) -> BillingResult<Vec<Product>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM billing_products
            WHERE billing_cycle = $1
              AND terminated = FALSE
              AND (date_termination IS NULL OR date_termination > $2)
            ORDER BY serial_number ASC
            "#
        ))
        .bind(cycle.code())
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn products_to_terminate(&self, today: NaiveDate) -> BillingResult<Vec<Product>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM billing_products
            WHERE terminated = FALSE
              AND date_termination IS NOT NULL
              AND date_termination <= $1
            ORDER BY serial_number ASC
            "#
        ))
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn products_by_user(&self, owner_user_id: i64) -> BillingResult<Vec<Product>> {
        self.fetch_products("owner_user_id", owner_user_id).await
    }

    async fn products_by_affiliation(
        &self,
        owner_affiliation_id: i64,
    ) -> BillingResult<Vec<Product>> {
        self.fetch_products("owner_affiliation_id", owner_affiliation_id)
            .await
    }

    async fn products_by_listing(&self, product_id: i64) -> BillingResult<Vec<Product>> {
        self.fetch_products("product_id", product_id).await
    }

    async fn all_products(&self) -> BillingResult<Vec<Product>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM billing_products ORDER BY serial_number ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }
}

#[async_trait]
impl RecordStore for PgBillingStore {
    async fn insert_record(&self, record: &BillingRecord) -> BillingResult<i64> {
        let serial_number = sqlx::query_scalar(
            r#"
            INSERT INTO billing_records (
                wallet_id,
                user_id,
                product_id,
                product_serial_number,
                billing_cycle,
                billed_amount,
                billed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING serial_number
            "#,
        )
        .bind(record.wallet_id)
        .bind(record.user_id)
        .bind(record.product_id)
        .bind(record.product_serial_number)
        .bind(record.billing_cycle.code())
        .bind(record.billed_amount)
        .bind(record.billed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(serial_number)
    }

    async fn records_by_wallet(&self, wallet_id: i64) -> BillingResult<Vec<BillingRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM billing_records WHERE wallet_id = $1 \
             ORDER BY billed_at DESC, serial_number DESC"
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn all_records(&self) -> BillingResult<Vec<BillingRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM billing_records \
             ORDER BY billed_at DESC, serial_number DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn cycle_from_row(row: &PgRow) -> BillingResult<BillingCycle> {
    let code: i16 = row.try_get("billing_cycle")?;
    BillingCycle::from_code(code)
        .ok_or_else(|| decode_error(format!("unknown billing cycle code {code}")).into())
}

fn wallet_from_row(row: &PgRow) -> BillingResult<Wallet> {
    let kind: String = row.try_get("owner_kind")?;
    let owner_id: i64 = row.try_get("owner_id")?;
    let owner = WalletOwner::from_parts(&kind, owner_id)
        .ok_or_else(|| decode_error(format!("unknown wallet owner kind `{kind}`")))?;
    Ok(Wallet {
        wallet_id: row.try_get("wallet_id")?,
        owner,
        balance: row.try_get("balance")?,
        secured: row.try_get("secured")?,
        disabled: row.try_get("disabled")?,
    })
}

fn listing_from_row(row: &PgRow) -> BillingResult<ProductListing> {
    let server_configuration: Json<ServerConfiguration> = row.try_get("server_configuration")?;
    let billing_options: Json<Vec<BillingOption>> = row.try_get("billing_options")?;
    let usage_billing_factors: Json<UsageBillingFactors> = row.try_get("usage_billing_factors")?;
    Ok(ProductListing {
        product_id: row.try_get("product_id")?,
        product_group_id: row.try_get("product_group_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        server_type: row.try_get("server_type")?,
        server_instance_id: row.try_get("server_instance_id")?,
        server_configuration: server_configuration.0,
        billing_options: billing_options.0,
        usage_billing_factors: usage_billing_factors.0,
        hidden: row.try_get("hidden")?,
        discontinued: row.try_get("discontinued")?,
    })
}

fn product_from_row(row: &PgRow) -> BillingResult<Product> {
    Ok(Product {
        serial_number: row.try_get("serial_number")?,
        owner_user_id: row.try_get("owner_user_id")?,
        owner_affiliation_id: row.try_get("owner_affiliation_id")?,
        product_id: row.try_get("product_id")?,
        date_creation: row.try_get("date_creation")?,
        date_last_bill: row.try_get("date_last_bill")?,
        date_termination: row.try_get("date_termination")?,
        terminated: row.try_get("terminated")?,
        wallet_id: row.try_get("wallet_id")?,
        billing_option: BillingOption {
            billing_cycle: cycle_from_row(row)?,
            price: row.try_get("price")?,
            monthly_spending_cap: row.try_get("monthly_spending_cap")?,
            current_month_spending: row.try_get("current_month_spending")?,
        },
    })
}

fn record_from_row(row: &PgRow) -> BillingResult<BillingRecord> {
    let billed_at: DateTime<Utc> = row.try_get("billed_at")?;
    Ok(BillingRecord {
        serial_number: row.try_get("serial_number")?,
        wallet_id: row.try_get("wallet_id")?,
        user_id: row.try_get("user_id")?,
        product_id: row.try_get("product_id")?,
        product_serial_number: row.try_get("product_serial_number")?,
        billing_cycle: cycle_from_row(row)?,
        billed_amount: row.try_get("billed_amount")?,
        billed_at,
    })
}
