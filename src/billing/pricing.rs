use std::collections::HashMap;

use rust_decimal::Decimal;

use super::models::{PricingPolicy, UsageBillingFactor, UsageBillingFactors};
use crate::error::{BillingError, BillingResult};

/// Resource id to used quantity, as reported by the provisioning backend.
pub type ResourceUsage = HashMap<i64, Decimal>;

impl UsageBillingFactors {
    /// Sum each billing group, then combine the group prices per the pricing policy.
    pub fn total_price(&self, usage: &ResourceUsage) -> BillingResult<Decimal> {
        let policy = self
            .pricing_policy
            .ok_or(BillingError::InvalidPricingPolicy)?;
        let mut group_prices = self.factors.values().filter(|group| !group.is_empty());

        let first = group_prices.next().ok_or(BillingError::NoFactors)?;
        let mut total = group_price(first, usage)?;
        for group in group_prices {
            let price = group_price(group, usage)?;
            total = match policy {
                PricingPolicy::Sum => total + price,
                PricingPolicy::Max => total.max(price),
                PricingPolicy::Min => total.min(price),
            };
        }
        Ok(total)
    }
}

fn group_price(group: &[UsageBillingFactor], usage: &ResourceUsage) -> BillingResult<Decimal> {
    group.iter().try_fold(Decimal::ZERO, |acc, factor| {
        let used = usage
            .get(&factor.resource_id)
            .ok_or(BillingError::ResourceUsageMissing(factor.resource_id))?;
        Ok(acc + factor.price(*used))
    })
}

/// Amount to charge this period for a usage-based product, honouring the
/// monthly spending cap. `total` is the month-to-date usage cost.
pub fn usage_based_amount(
    total: Decimal,
    monthly_spending_cap: Decimal,
    current_month_spending: Decimal,
) -> BillingResult<Decimal> {
    if total < current_month_spending {
        return Err(BillingError::UsageRegressed {
            total,
            billed: current_month_spending,
        });
    }
    let billable = total.min(monthly_spending_cap);
    Ok((billable - current_month_spending).max(Decimal::ZERO))
}

/// Amount still owed when the cap no longer applies (final settlement).
pub fn outstanding_usage_amount(
    total: Decimal,
    current_month_spending: Decimal,
) -> BillingResult<Decimal> {
    if total < current_month_spending {
        return Err(BillingError::UsageRegressed {
            total,
            billed: current_month_spending,
        });
    }
    Ok(total - current_month_spending)
}
