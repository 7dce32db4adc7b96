//! Collaborator traits and common types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ModelId;
use crate::pricing::{Credits, Dollars};

/// Errors from the model registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry refused the model (unknown, gated, unsupported).
    #[error("Failed to add model '{model}': {message}")]
    Rejected { model: String, message: String },

    /// The registry could not be reached or answered unexpectedly.
    #[error("Model registry unreachable while adding '{model}': {message}")]
    Unreachable { model: String, message: String },
}

impl RegistryError {
    /// The identifier the failure is about.
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::Rejected { model, .. } | Self::Unreachable { model, .. } => model,
        }
    }
}

/// Errors from the account service, other than a missing session.
#[derive(Error, Debug)]
pub enum AccountError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body could not be parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the payment gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("Failed getting checkout session: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body could not be parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque credential identifying a signed-in user.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

/// Snapshot of a user's prepaid credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub credits_available: Credits,
}

impl Balance {
    #[must_use]
    pub fn new(credits: impl Into<Credits>) -> Self {
        Self {
            credits_available: credits.into(),
        }
    }
}

/// Result of a balance lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceLookup {
    /// The user is signed in.
    Authenticated(Balance),
    /// Nobody is signed in. Not an error: the workflow asks for sign-in.
    NoSession,
}

/// Request for a credit checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Amount to charge, in currency.
    pub amount: Dollars,
    /// Where the gateway sends the user back. The gateway appends the outcome flag.
    pub return_to: String,
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    /// External checkout page to redirect the user to.
    pub redirect_url: String,
    /// Amount that will be charged.
    pub amount: Dollars,
}

/// Registers models and reports how many GPUs they need.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Register a model and return its GPU requirement.
    async fn register_model(&self, model: &ModelId) -> Result<u64, RegistryError>;
}

/// Reports a user's credit balance.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Current balance for `session`, or [`BalanceLookup::NoSession`].
    async fn balance(&self, session: Option<&SessionToken>)
        -> Result<BalanceLookup, AccountError>;
}

/// Creates checkout sessions on an external payment page.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a checkout and return where to send the user.
    async fn create_checkout(&self, request: CheckoutRequest) -> Result<Checkout, GatewayError>;
}
