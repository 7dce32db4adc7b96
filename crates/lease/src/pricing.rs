//! Exact credit and currency arithmetic.
//!
//! Credits are the accounting unit for paid compute. Everything here is
//! integer math: a `u64` GPU count times a `u64` per-GPU price always fits in
//! a `u128`, so quotes never overflow and never round.
//!
//! Converting credits to currency truncates toward zero, which makes the
//! round trip lossy for amounts that are not a multiple of the exchange rate:
//!
//! ```
//! use lease::pricing::{Credits, PricingConfig};
//!
//! let pricing = PricingConfig::new(100, 4).unwrap();
//! let dollars = pricing.credits_to_currency(Credits(150));
//! assert_eq!(dollars.0, 37);
//! assert_eq!(pricing.currency_to_credits(dollars), Some(Credits(148)));
//! ```

use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default price of one leased GPU, in credits.
pub const DEFAULT_COST_PER_GPU: u64 = 100;

/// Default number of credits bought by one unit of currency.
pub const DEFAULT_CREDIT_PER_DOLLAR: u64 = 4;

/// An amount of credits.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Credits(pub u128);

impl Credits {
    /// No credits.
    pub const ZERO: Self = Self(0);

    /// Subtract, clamping at zero.
    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl std::fmt::Display for Credits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} credits", self.0)
    }
}

impl From<u64> for Credits {
    fn from(value: u64) -> Self {
        Self(u128::from(value))
    }
}

/// An amount of currency, in whole dollars.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Dollars(pub u128);

impl std::fmt::Display for Dollars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// The unit a purchase amount is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Denomination {
    /// Internal credits.
    Credits,
    /// Real currency, as charged by the payment gateway.
    #[default]
    Currency,
}

impl std::fmt::Display for Denomination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credits => write!(f, "credits"),
            Self::Currency => write!(f, "currency"),
        }
    }
}

impl FromStr for Denomination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "credits" | "credit" => Ok(Self::Credits),
            "currency" | "usd" | "dollars" => Ok(Self::Currency),
            other => Err(format!(
                "unknown denomination '{other}' (expected 'credits' or 'currency')"
            )),
        }
    }
}

/// A purchase amount together with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseAmount {
    /// Numeric amount.
    pub value: u128,
    /// Unit of `value`.
    pub denomination: Denomination,
}

impl PurchaseAmount {
    /// An amount of credits.
    #[must_use]
    pub fn credits(value: u128) -> Self {
        Self {
            value,
            denomination: Denomination::Credits,
        }
    }

    /// An amount of currency.
    #[must_use]
    pub fn currency(value: u128) -> Self {
        Self {
            value,
            denomination: Denomination::Currency,
        }
    }
}

impl std::fmt::Display for PurchaseAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.denomination {
            Denomination::Credits => write!(f, "{}", Credits(self.value)),
            Denomination::Currency => write!(f, "{}", Dollars(self.value)),
        }
    }
}

/// Pricing constants, injected rather than baked into the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Price of one GPU, in credits.
    pub cost_per_gpu: u64,
    /// Credits bought by one unit of currency.
    pub credit_per_dollar: NonZeroU64,
    /// Denomination the purchase offer defaults to.
    pub gateway_denomination: Denomination,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cost_per_gpu: DEFAULT_COST_PER_GPU,
            credit_per_dollar: NonZeroU64::new(DEFAULT_CREDIT_PER_DOLLAR)
                .unwrap_or(NonZeroU64::MIN),
            gateway_denomination: Denomination::Currency,
        }
    }
}

impl PricingConfig {
    /// Build a pricing regime. Returns `None` if `credit_per_dollar` is zero.
    #[must_use]
    pub fn new(cost_per_gpu: u64, credit_per_dollar: u64) -> Option<Self> {
        Some(Self {
            cost_per_gpu,
            credit_per_dollar: NonZeroU64::new(credit_per_dollar)?,
            gateway_denomination: Denomination::Currency,
        })
    }

    /// Use a different default purchase denomination.
    #[must_use]
    pub fn with_gateway_denomination(mut self, denomination: Denomination) -> Self {
        self.gateway_denomination = denomination;
        self
    }

    fn ratio(&self) -> u128 {
        u128::from(self.credit_per_dollar.get())
    }

    /// Price of a lease needing `gpu_count` GPUs.
    #[must_use]
    pub fn quote(&self, gpu_count: u64) -> CostQuote {
        CostQuote {
            gpu_count,
            cost_per_gpu: Credits::from(self.cost_per_gpu),
            total: Credits(u128::from(gpu_count) * u128::from(self.cost_per_gpu)),
        }
    }

    /// Credits to currency, truncating toward zero.
    #[must_use]
    pub fn credits_to_currency(&self, credits: Credits) -> Dollars {
        Dollars(credits.0 / self.ratio())
    }

    /// Currency to credits. Exact, or `None` if the result does not fit.
    #[must_use]
    pub fn currency_to_credits(&self, dollars: Dollars) -> Option<Credits> {
        dollars.0.checked_mul(self.ratio()).map(Credits)
    }

    /// Smallest whole currency amount whose credit value covers `credits`.
    #[must_use]
    pub fn currency_to_cover(&self, credits: Credits) -> Dollars {
        Dollars(credits.0.div_ceil(self.ratio()))
    }

    /// Convert an amount into another denomination.
    ///
    /// Returns `None` when a currency amount is too large to express in
    /// credits.
    #[must_use]
    pub fn convert(&self, amount: PurchaseAmount, to: Denomination) -> Option<PurchaseAmount> {
        match (amount.denomination, to) {
            (Denomination::Credits, Denomination::Currency) => Some(PurchaseAmount::currency(
                self.credits_to_currency(Credits(amount.value)).0,
            )),
            (Denomination::Currency, Denomination::Credits) => self
                .currency_to_credits(Dollars(amount.value))
                .map(|credits| PurchaseAmount::credits(credits.0)),
            _ => Some(amount),
        }
    }

    /// The currency actually charged for `amount`.
    #[must_use]
    pub fn charged(&self, amount: PurchaseAmount) -> Dollars {
        match amount.denomination {
            Denomination::Credits => self.credits_to_currency(Credits(amount.value)),
            Denomination::Currency => Dollars(amount.value),
        }
    }
}

/// Cost of leasing a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostQuote {
    /// GPUs the model needs.
    pub gpu_count: u64,
    /// Price of one GPU.
    pub cost_per_gpu: Credits,
    /// `gpu_count * cost_per_gpu`.
    pub total: Credits,
}

impl CostQuote {
    /// Total cost in currency, truncated.
    #[must_use]
    pub fn total_currency(&self, pricing: &PricingConfig) -> Dollars {
        pricing.credits_to_currency(self.total)
    }

    /// Per-GPU cost in currency, truncated.
    #[must_use]
    pub fn cost_per_gpu_currency(&self, pricing: &PricingConfig) -> Dollars {
        pricing.credits_to_currency(self.cost_per_gpu)
    }

    /// Whether the lease costs nothing.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.total == Credits::ZERO
    }
}
