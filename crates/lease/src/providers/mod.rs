//! External collaborators of the lease workflow.
//!
//! This module contains the [`ModelRegistry`], [`AccountService`] and
//! [`PaymentGateway`] traits and their HTTP implementations.

pub mod http;
pub mod traits;

use std::sync::Arc;

pub use traits::{
    AccountError, AccountService, Balance, BalanceLookup, Checkout, CheckoutRequest,
    GatewayError, ModelRegistry, PaymentGateway, RegistryError, SessionToken,
};

/// The three services a lease workflow talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn ModelRegistry>,
    pub accounts: Arc<dyn AccountService>,
    pub gateway: Arc<dyn PaymentGateway>,
}
