use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::models::{BillingCycle, Product, ProductListing, ProductListingGroup};
use super::store::BillingStore;
use crate::error::{BillingError, BillingResult};

/// key: billing-catalog -> listings, groups and visibility gating
///
/// Public lookups hide discontinued listings; the `sudo_` variants are for
/// administration and the billing sweeps, which keep charging products whose
/// listing was discontinued after purchase.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn BillingStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn get_listing(&self, product_id: i64) -> BillingResult<ProductListing> {
        let listing = self.sudo_get_listing(product_id).await?;
        if listing.discontinued {
            return Err(BillingError::ListingNotFound(product_id));
        }
        Ok(listing)
    }

    pub async fn sudo_get_listing(&self, product_id: i64) -> BillingResult<ProductListing> {
        self.store
            .get_listing(product_id)
            .await?
            .ok_or(BillingError::ListingNotFound(product_id))
    }

    pub async fn listings_by_group(&self, group_id: i64) -> BillingResult<Vec<ProductListing>> {
        let mut listings = self.sudo_listings_by_group(group_id).await?;
        listings.retain(|listing| !listing.discontinued);
        Ok(listings)
    }

    pub async fn sudo_listings_by_group(
        &self,
        group_id: i64,
    ) -> BillingResult<Vec<ProductListing>> {
        self.store.listings_by_group(group_id).await
    }

    /// Stores a new listing and returns its id. Incomplete listings are forced
    /// hidden and discontinued.
    pub async fn add_listing(&self, listing: &ProductListing) -> BillingResult<i64> {
        listing.ensure_required_fields()?;
        self.group(listing.product_group_id).await?;

        let mut stored = listing.clone();
        if let Err(reason) = stored.ensure_complete() {
            if !stored.hidden || !stored.discontinued {
                warn!(
                    name = %stored.name,
                    %reason,
                    "incomplete listing forced hidden and discontinued"
                );
            }
            stored.hidden = true;
            stored.discontinued = true;
        }

        let product_id = self.store.insert_listing(&stored).await?;
        info!(product_id, name = %stored.name, "product listing added");
        Ok(product_id)
    }

    /// Replaces a listing. Incomplete listings cannot stay visible.
    pub async fn update_listing(&self, listing: &ProductListing) -> BillingResult<()> {
        listing.ensure_required_fields()?;
        self.group(listing.product_group_id).await?;

        let mut stored = listing.clone();
        if stored.ensure_complete().is_err() {
            stored.hidden = true;
            stored.discontinued = true;
        }
        self.persist_listing(&stored).await
    }

    pub async fn delete_listing(&self, product_id: i64) -> BillingResult<()> {
        if !self.store.delete_listing(product_id).await? {
            return Err(BillingError::ListingNotFound(product_id));
        }
        info!(product_id, "product listing deleted");
        Ok(())
    }

    pub async fn hide(&self, listing: &mut ProductListing) -> BillingResult<()> {
        listing.hidden = true;
        self.persist_listing(listing).await
    }

    pub async fn unhide(&self, listing: &mut ProductListing) -> BillingResult<()> {
        listing.ensure_complete()?;
        listing.hidden = false;
        self.persist_listing(listing).await
    }

    pub async fn discontinue(&self, listing: &mut ProductListing) -> BillingResult<()> {
        listing.discontinued = true;
        self.persist_listing(listing).await
    }

    pub async fn reactivate(&self, listing: &mut ProductListing) -> BillingResult<()> {
        listing.ensure_complete()?;
        listing.discontinued = false;
        self.persist_listing(listing).await
    }

    async fn persist_listing(&self, listing: &ProductListing) -> BillingResult<()> {
        if !self.store.update_listing(listing).await? {
            return Err(BillingError::ListingNotFound(listing.product_id));
        }
        Ok(())
    }

    pub async fn add_group(&self, group: &ProductListingGroup) -> BillingResult<i64> {
        group.ensure_required_fields()?;
        let group_id = self.store.insert_group(group).await?;
        info!(group_id, name = %group.name, "product listing group added");
        Ok(group_id)
    }

    pub async fn group(&self, group_id: i64) -> BillingResult<ProductListingGroup> {
        self.store
            .get_group(group_id)
            .await?
            .ok_or(BillingError::GroupNotFound(group_id))
    }

    pub async fn update_group(&self, group: &ProductListingGroup) -> BillingResult<()> {
        group.ensure_required_fields()?;
        if !self.store.update_group(group).await? {
            return Err(BillingError::GroupNotFound(group.product_group_id));
        }
        Ok(())
    }

    pub async fn delete_group(&self, group_id: i64) -> BillingResult<()> {
        if !self.store.delete_group(group_id).await? {
            return Err(BillingError::GroupNotFound(group_id));
        }
        Ok(())
    }

    /// Builds an unsaved product for `listing` with the terms of `billing_cycle`.
    pub fn create_product(
        &self,
        listing: &ProductListing,
        owner_user_id: i64,
        owner_affiliation_id: i64,
        billing_cycle: BillingCycle,
        wallet_id: i64,
        today: NaiveDate,
    ) -> BillingResult<Product> {
        if listing.discontinued {
            return Err(BillingError::ListingDiscontinued(listing.product_id));
        }
        let mut billing_option = listing
            .billing_option(billing_cycle)
            .cloned()
            .ok_or(BillingError::BillingOptionNotFound(billing_cycle))?;
        billing_option.current_month_spending = Decimal::ZERO;

        Ok(Product {
            serial_number: 0,
            owner_user_id,
            owner_affiliation_id,
            product_id: listing.product_id,
            date_creation: today,
            date_last_bill: today,
            date_termination: None,
            terminated: false,
            wallet_id,
            billing_option,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::models::{BillingOption, PricingPolicy, UsageBillingFactors};
    use crate::billing::store::MemoryBillingStore;
    use crate::provisioning::ServerConfiguration;
    use rust_decimal_macros::dec;

    fn listing(group_id: i64) -> ProductListing {
        ProductListing {
            product_id: 0,
            product_group_id: group_id,
            name: "vps-small".into(),
            description: "1 vCPU / 1 GiB".into(),
            server_type: "http".into(),
            server_instance_id: "fra-1".into(),
            server_configuration: ServerConfiguration::new(),
            billing_options: vec![BillingOption::recurring(BillingCycle::Monthly, dec!(5))],
            usage_billing_factors: UsageBillingFactors::new(PricingPolicy::Sum)
                .with_factor(1, 0, dec!(0.01)),
            hidden: false,
            discontinued: false,
        }
    }

    async fn catalog_with_group() -> (Catalog, i64) {
        let catalog = Catalog::new(Arc::new(MemoryBillingStore::new()));
        let group_id = catalog
            .add_group(&ProductListingGroup {
                product_group_id: 0,
                name: "vps".into(),
                description: "virtual servers".into(),
                hidden: false,
            })
            .await
            .unwrap();
        (catalog, group_id)
    }

    #[tokio::test]
    async fn incomplete_listing_is_forced_hidden_and_discontinued() {
        let (catalog, group_id) = catalog_with_group().await;
        let mut draft = listing(group_id);
        draft.billing_options.clear();

        let id = catalog.add_listing(&draft).await.unwrap();
        let mut stored = catalog.sudo_get_listing(id).await.unwrap();
        assert!(stored.hidden);
        assert!(stored.discontinued);

        assert!(matches!(
            catalog.unhide(&mut stored).await,
            Err(BillingError::ListingIncomplete(_))
        ));
        assert!(matches!(
            catalog.reactivate(&mut stored).await,
            Err(BillingError::ListingIncomplete(_))
        ));
        assert!(matches!(
            catalog.get_listing(id).await,
            Err(BillingError::ListingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn discontinued_listings_are_only_visible_to_sudo() {
        let (catalog, group_id) = catalog_with_group().await;
        let id = catalog.add_listing(&listing(group_id)).await.unwrap();
        let mut stored = catalog.get_listing(id).await.unwrap();

        catalog.discontinue(&mut stored).await.unwrap();
        assert!(catalog.get_listing(id).await.is_err());
        assert!(catalog.listings_by_group(group_id).await.unwrap().is_empty());
        assert_eq!(
            catalog.sudo_listings_by_group(group_id).await.unwrap().len(),
            1
        );

        catalog.reactivate(&mut stored).await.unwrap();
        assert!(catalog.get_listing(id).await.is_ok());
    }

    #[tokio::test]
    async fn listing_requires_fields_and_existing_group() {
        let (catalog, group_id) = catalog_with_group().await;
        let mut unnamed = listing(group_id);
        unnamed.server_instance_id = " ".into();
        assert!(matches!(
            catalog.add_listing(&unnamed).await,
            Err(BillingError::MissingField("server instance id"))
        ));

        assert!(matches!(
            catalog.add_listing(&listing(group_id + 100)).await,
            Err(BillingError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_product_needs_matching_option() {
        let (catalog, group_id) = catalog_with_group().await;
        let id = catalog.add_listing(&listing(group_id)).await.unwrap();
        let mut stored = catalog.get_listing(id).await.unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();

        let product = catalog
            .create_product(&stored, 1, 0, BillingCycle::Monthly, 5, today)
            .unwrap();
        assert_eq!(product.product_id, id);
        assert_eq!(product.date_last_bill, today);
        assert_eq!(product.billing_option.price, dec!(5));

        assert!(matches!(
            catalog.create_product(&stored, 1, 0, BillingCycle::Annually, 5, today),
            Err(BillingError::BillingOptionNotFound(BillingCycle::Annually))
        ));

        stored.discontinued = true;
        assert!(matches!(
            catalog.create_product(&stored, 1, 0, BillingCycle::Monthly, 5, today),
            Err(BillingError::ListingDiscontinued(_))
        ));
    }

    #[tokio::test]
    async fn group_updates_require_name_and_description() {
        let (catalog, group_id) = catalog_with_group().await;
        let mut group = catalog.group(group_id).await.unwrap();
        group.description.clear();
        assert!(matches!(
            catalog.update_group(&group).await,
            Err(BillingError::MissingField(_))
        ));

        group.description = "dedicated".into();
        catalog.update_group(&group).await.unwrap();
        catalog.delete_group(group_id).await.unwrap();
        assert!(catalog.group(group_id).await.is_err());
    }
}
