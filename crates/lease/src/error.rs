//! Error types for the lease workflow.

use thiserror::Error;

use crate::pricing::{Credits, Dollars, PurchaseAmount};
use crate::providers::{AccountError, GatewayError, RegistryError};
use crate::sequencer::Step;

/// Input the workflow refuses. State is never changed when one is raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No model was entered.
    #[error("a model identifier is required")]
    EmptyModel,

    /// The model identifier is not of the form `org/name`.
    #[error("'{0}' is not a model identifier of the form organization/model-name")]
    MalformedModel(String),

    /// The purchase amount is zero.
    #[error("purchase amount must be greater than zero")]
    ZeroAmount,

    /// The purchase would not cover the shortfall.
    #[error("purchase of {amount} ({charged}) covers only {covers}, {shortfall} are needed")]
    UnderFunded {
        amount: PurchaseAmount,
        charged: Dollars,
        covers: Credits,
        shortfall: Credits,
    },

    /// The amount cannot be expressed in credits.
    #[error("purchase amount {0} is too large")]
    AmountTooLarge(PurchaseAmount),

    /// The balance already covers the lease.
    #[error("balance already covers the lease; no purchase is needed")]
    NoPurchaseNeeded,

    /// The operation is only valid at another step.
    #[error("operation requires step '{expected}', workflow is at '{actual}'")]
    WrongStep { expected: Step, actual: Step },

    /// Quote or balance has not been loaded yet, or nobody is signed in.
    #[error("cost or balance is not available yet")]
    FundingUnresolved,

    /// The override is only available right after a completed purchase.
    #[error("funding override is only available after a completed purchase")]
    OverrideUnavailable,

    /// A resume context could not be read.
    #[error("invalid resume context: {0}")]
    InvalidResume(String),
}

/// Errors surfaced by the lease workflow.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Rejected input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The model registry failed or rejected the model.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The balance lookup failed.
    #[error(transparent)]
    Account(#[from] AccountError),

    /// Checkout creation failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A background lookup task panicked or was aborted.
    #[error("background lookup failed: {0}")]
    Lookup(#[from] tokio::task::JoinError),
}
