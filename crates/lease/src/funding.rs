//! Funding gate: does the balance cover the lease, and if not, what to buy.
//!
//! Everything here is a pure function of the quote, the balance and the
//! pricing constants. Decisions are recomputed on demand and never cached.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;
use crate::pricing::{CostQuote, Credits, Denomination, Dollars, PricingConfig, PurchaseAmount};
use crate::providers::Balance;
use crate::resume::ResumeContext;

/// Whether a balance covers a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingDecision {
    /// `max(0, total - available)`.
    pub shortfall: Credits,
    /// `shortfall == 0`.
    pub sufficient: bool,
}

/// A purchase offered to cover a shortfall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    /// Suggested amount. The user may change it before submitting.
    pub amount: PurchaseAmount,
    /// The deficit the purchase has to cover.
    pub shortfall: Credits,
    /// Where the workflow resumes after checkout.
    pub return_context: ResumeContext,
}

/// Funding rules for one pricing regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingGate {
    pricing: PricingConfig,
}

impl FundingGate {
    #[must_use]
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    #[must_use]
    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    /// Compare a quote to a balance.
    #[must_use]
    pub fn evaluate(&self, quote: &CostQuote, balance: &Balance) -> FundingDecision {
        let shortfall = quote.total.saturating_sub(balance.credits_available);
        FundingDecision {
            shortfall,
            sufficient: shortfall == Credits::ZERO,
        }
    }

    /// Default purchase for a shortfall, or `None` when nothing is short.
    ///
    /// In credits the default is the shortfall itself; in currency it is the
    /// shortfall converted with truncation, which can fall just short of it
    /// and is then rejected by [`FundingGate::validate_purchase`].
    #[must_use]
    pub fn build_purchase_intent(
        &self,
        decision: &FundingDecision,
        preference: Denomination,
        return_context: ResumeContext,
    ) -> Option<PurchaseIntent> {
        (!decision.sufficient)
            .then(|| self.purchase_for(decision.shortfall, preference, return_context))
    }

    /// Default purchase covering `shortfall`, offered in `preference`.
    #[must_use]
    pub fn purchase_for(
        &self,
        shortfall: Credits,
        preference: Denomination,
        return_context: ResumeContext,
    ) -> PurchaseIntent {
        let amount = match preference {
            Denomination::Credits => PurchaseAmount::credits(shortfall.0),
            Denomination::Currency => {
                PurchaseAmount::currency(self.pricing.credits_to_currency(shortfall).0)
            }
        };
        PurchaseIntent {
            amount,
            shortfall,
            return_context,
        }
    }

    /// Switch an amount to another denomination, converting the current value.
    ///
    /// # Errors
    /// Returns [`ValidationError::AmountTooLarge`] if a currency amount does
    /// not fit in credits.
    pub fn toggle(
        &self,
        amount: PurchaseAmount,
        to: Denomination,
    ) -> Result<PurchaseAmount, ValidationError> {
        self.pricing
            .convert(amount, to)
            .ok_or(ValidationError::AmountTooLarge(amount))
    }

    /// Smallest amount in `denomination` that passes validation, or `None`
    /// when nothing is short.
    #[must_use]
    pub fn minimum_amount(
        &self,
        decision: &FundingDecision,
        denomination: Denomination,
    ) -> Option<PurchaseAmount> {
        if decision.sufficient {
            return None;
        }
        let dollars = self.pricing.currency_to_cover(decision.shortfall);
        self.pricing
            .convert(PurchaseAmount::currency(dollars.0), denomination)
    }

    /// Check that `amount` covers the shortfall once charged.
    ///
    /// The amount is converted to the currency the gateway charges, then
    /// back to credits; that credit value must reach the shortfall.
    ///
    /// # Errors
    /// [`ValidationError::NoPurchaseNeeded`] when nothing is short,
    /// [`ValidationError::ZeroAmount`] for a zero amount,
    /// [`ValidationError::AmountTooLarge`] when the charge overflows credits and
    /// [`ValidationError::UnderFunded`] when it does not cover the shortfall.
    pub fn validate_purchase(
        &self,
        amount: PurchaseAmount,
        decision: &FundingDecision,
    ) -> Result<Dollars, ValidationError> {
        if decision.sufficient {
            return Err(ValidationError::NoPurchaseNeeded);
        }
        if amount.value == 0 {
            return Err(ValidationError::ZeroAmount);
        }

        let charged = self.pricing.charged(amount);
        let covers = self
            .pricing
            .currency_to_credits(charged)
            .ok_or(ValidationError::AmountTooLarge(amount))?;
        if covers < decision.shortfall {
            warn!(
                amount = %amount,
                covers = %covers,
                shortfall = %decision.shortfall,
                "Purchase amount does not cover shortfall"
            );
            return Err(ValidationError::UnderFunded {
                amount,
                charged,
                covers,
                shortfall: decision.shortfall,
            });
        }
        Ok(charged)
    }
}
