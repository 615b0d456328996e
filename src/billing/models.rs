use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::provisioning::ServerConfiguration;

/// Wallet id reserved for internally sponsored products. Mutations on it are absorbed.
pub const INTERNAL_WALLET_ID: i64 = 0;

/// key: billing-cycle -> usage,monthly,quarterly,annually
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    UsageBased,
    Monthly,
    Quarterly,
    Annually,
}

impl BillingCycle {
    pub const RECURRING: [BillingCycle; 3] = [
        BillingCycle::Monthly,
        BillingCycle::Quarterly,
        BillingCycle::Annually,
    ];

    /// Persisted SMALLINT code.
    pub fn code(self) -> i16 {
        match self {
            BillingCycle::UsageBased => 1,
            BillingCycle::Monthly => 2,
            BillingCycle::Quarterly => 3,
            BillingCycle::Annually => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(BillingCycle::UsageBased),
            2 => Some(BillingCycle::Monthly),
            3 => Some(BillingCycle::Quarterly),
            4 => Some(BillingCycle::Annually),
            _ => None,
        }
    }

    /// Length of one recurring period. `None` for usage-based billing.
    pub fn period_months(self) -> Option<u32> {
        match self {
            BillingCycle::UsageBased => None,
            BillingCycle::Monthly => Some(1),
            BillingCycle::Quarterly => Some(3),
            BillingCycle::Annually => Some(12),
        }
    }

    pub fn is_usage_based(self) -> bool {
        self == BillingCycle::UsageBased
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BillingCycle::UsageBased => "usage_based",
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::Annually => "annually",
        };
        f.write_str(label)
    }
}

/// How per-group usage prices are combined into one amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingPolicy {
    Sum,
    Max,
    Min,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingOption {
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub monthly_spending_cap: Decimal,
    #[serde(default)]
    pub current_month_spending: Decimal,
}

impl BillingOption {
    pub fn recurring(billing_cycle: BillingCycle, price: Decimal) -> Self {
        Self {
            billing_cycle,
            price,
            monthly_spending_cap: Decimal::ZERO,
            current_month_spending: Decimal::ZERO,
        }
    }

    pub fn usage_based(monthly_spending_cap: Decimal) -> Self {
        Self {
            billing_cycle: BillingCycle::UsageBased,
            price: Decimal::ZERO,
            monthly_spending_cap,
            current_month_spending: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageBillingFactor {
    pub group_id: u32,
    pub resource_id: i64,
    pub unit_price: Decimal,
}

impl UsageBillingFactor {
    pub fn price(&self, used: Decimal) -> Decimal {
        self.unit_price * used
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageBillingFactors {
    #[serde(default)]
    pub pricing_policy: Option<PricingPolicy>,
    /// key: billing group id
    #[serde(default)]
    pub factors: BTreeMap<u32, Vec<UsageBillingFactor>>,
}

impl UsageBillingFactors {
    pub fn new(pricing_policy: PricingPolicy) -> Self {
        Self {
            pricing_policy: Some(pricing_policy),
            factors: BTreeMap::new(),
        }
    }

    pub fn with_factor(mut self, group_id: u32, resource_id: i64, unit_price: Decimal) -> Self {
        self.factors
            .entry(group_id)
            .or_default()
            .push(UsageBillingFactor {
                group_id,
                resource_id,
                unit_price,
            });
        self
    }

    pub fn is_configured(&self) -> bool {
        self.pricing_policy.is_some() && self.factors.values().any(|group| !group.is_empty())
    }
}

/// key: billing-catalog -> purchasable product type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductListing {
    #[serde(default)]
    pub product_id: i64,
    pub product_group_id: i64,
    pub name: String,
    pub description: String,
    pub server_type: String,
    pub server_instance_id: String,
    #[serde(default)]
    pub server_configuration: ServerConfiguration,
    #[serde(default)]
    pub billing_options: Vec<BillingOption>,
    #[serde(default)]
    pub usage_billing_factors: UsageBillingFactors,
    #[serde(default = "default_true")]
    pub hidden: bool,
    #[serde(default = "default_true")]
    pub discontinued: bool,
}

fn default_true() -> bool {
    true
}

impl ProductListing {
    /// A listing may only be shown or sold once it carries pricing terms.
    pub fn ensure_complete(&self) -> BillingResult<()> {
        if self.billing_options.is_empty() {
            return Err(BillingError::ListingIncomplete("billing options not set"));
        }
        if !self.usage_billing_factors.is_configured() {
            return Err(BillingError::ListingIncomplete(
                "usage billing factors not set",
            ));
        }
        Ok(())
    }

    pub fn ensure_required_fields(&self) -> BillingResult<()> {
        if self.name.trim().is_empty() {
            return Err(BillingError::MissingField("product name"));
        }
        if self.description.trim().is_empty() {
            return Err(BillingError::MissingField("product description"));
        }
        if self.server_type.trim().is_empty() {
            return Err(BillingError::MissingField("server type"));
        }
        if self.server_instance_id.trim().is_empty() {
            return Err(BillingError::MissingField("server instance id"));
        }
        Ok(())
    }

    pub fn billing_option(&self, cycle: BillingCycle) -> Option<&BillingOption> {
        self.billing_options
            .iter()
            .find(|option| option.billing_cycle == cycle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductListingGroup {
    #[serde(default)]
    pub product_group_id: i64,
    pub name: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub hidden: bool,
}

impl ProductListingGroup {
    pub fn ensure_required_fields(&self) -> BillingResult<()> {
        if self.name.trim().is_empty() {
            return Err(BillingError::MissingField("product group name"));
        }
        if self.description.trim().is_empty() {
            return Err(BillingError::MissingField("product group description"));
        }
        Ok(())
    }
}

/// Party a wallet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WalletOwner {
    User(i64),
    Affiliation(i64),
}

impl WalletOwner {
    pub fn id(self) -> i64 {
        match self {
            WalletOwner::User(id) | WalletOwner::Affiliation(id) => id,
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            WalletOwner::User(_) => "user",
            WalletOwner::Affiliation(_) => "affiliation",
        }
    }

    pub fn from_parts(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "user" => Some(WalletOwner::User(id)),
            "affiliation" => Some(WalletOwner::Affiliation(id)),
            _ => None,
        }
    }

    pub fn is_internal(self) -> bool {
        self.id() == 0
    }
}

/// key: billing-wallet -> custodial funds per owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: i64,
    pub owner: WalletOwner,
    pub balance: Decimal,
    pub secured: Decimal,
    pub disabled: bool,
}

impl Wallet {
    pub fn internal() -> Self {
        Self {
            wallet_id: INTERNAL_WALLET_ID,
            owner: WalletOwner::User(0),
            balance: Decimal::ZERO,
            secured: Decimal::ZERO,
            disabled: false,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.wallet_id == INTERNAL_WALLET_ID
    }

    /// Spendable portion of the balance.
    pub fn available(&self) -> Decimal {
        self.balance - self.secured
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductState {
    Active,
    PendingTermination,
    Terminated,
}

/// key: billing-product -> billing-tracked instance of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub serial_number: i64,
    pub owner_user_id: i64,
    pub owner_affiliation_id: i64,
    pub product_id: i64,
    pub date_creation: NaiveDate,
    pub date_last_bill: NaiveDate,
    pub date_termination: Option<NaiveDate>,
    pub terminated: bool,
    pub wallet_id: i64,
    pub billing_option: BillingOption,
}

impl Product {
    pub fn billing_cycle(&self) -> BillingCycle {
        self.billing_option.billing_cycle
    }

    pub fn state(&self, today: NaiveDate) -> ProductState {
        if self.terminated {
            return ProductState::Terminated;
        }
        match self.date_termination {
            Some(date) if date <= today => ProductState::PendingTermination,
            _ => ProductState::Active,
        }
    }

    /// Owner whose wallet pays for the product. An affiliation takes precedence
    /// over the purchasing user when both are set.
    pub fn primary_owner(&self) -> Option<WalletOwner> {
        if self.owner_affiliation_id != 0 {
            Some(WalletOwner::Affiliation(self.owner_affiliation_id))
        } else if self.owner_user_id != 0 {
            Some(WalletOwner::User(self.owner_user_id))
        } else {
            None
        }
    }

    pub fn validate(&self) -> BillingResult<()> {
        if self.owner_user_id == 0 && self.owner_affiliation_id == 0 {
            return Err(BillingError::InvalidOwnerId);
        }
        if self.product_id == 0 {
            return Err(BillingError::InvalidProductId);
        }
        if self.wallet_id == 0 {
            return Err(BillingError::InvalidWalletId);
        }
        Ok(())
    }

    /// A recurring product is due once a full period has passed since the last bill.
    pub fn is_due(&self, today: NaiveDate) -> bool {
        let Some(months) = self.billing_cycle().period_months() else {
            return false;
        };
        match today.checked_sub_months(Months::new(months)) {
            Some(threshold) => self.date_last_bill <= threshold,
            None => false,
        }
    }

    pub fn next_due_date(&self) -> Option<NaiveDate> {
        let months = self.billing_cycle().period_months()?;
        self.date_last_bill.checked_add_months(Months::new(months))
    }

    /// For usage-based products `date_last_bill` tracks the metering month.
    pub fn in_billing_month(&self, now: DateTime<Utc>) -> bool {
        self.date_last_bill.year() == now.year() && self.date_last_bill.month() == now.month()
    }
}

/// key: billing-record -> immutable audit entry per charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    #[serde(default)]
    pub serial_number: i64,
    pub wallet_id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub product_serial_number: i64,
    pub billing_cycle: BillingCycle,
    pub billed_amount: Decimal,
    pub billed_at: DateTime<Utc>,
}
