//! HTTP implementations of the collaborator traits.
//!
//! ## Endpoints
//!
//! - `POST {registry_url}/models` with `{"model": "org/name"}` returns `{"required_gpus": n}`
//! - `GET {account_url}/account` with a bearer session returns `{"credits": n}`
//! - `POST {gateway_url}/checkout` with `{"purchase_amount", "redirect_to"}` returns `{"url"}`
//!
//! ## Example
//!
//! ```ignore
//! use lease::providers::http;
//!
//! let collaborators = http::collaborators(&config)?;
//! let gpus = collaborators.registry.register_model(&model).await?;
//! ```

mod client;
mod models;

use std::sync::Arc;
use std::time::Duration;

pub use client::{HttpAccountService, HttpModelRegistry, HttpPaymentGateway, DEFAULT_TIMEOUT_SECS};

use super::Collaborators;
use crate::config::LeaseConfig;

/// Build HTTP clients for all three collaborators from configuration.
///
/// # Errors
/// Returns error if an HTTP client cannot be created.
pub fn collaborators(config: &LeaseConfig) -> Result<Collaborators, reqwest::Error> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    Ok(Collaborators {
        registry: Arc::new(HttpModelRegistry::new(config.registry_url.clone(), timeout)?),
        accounts: Arc::new(HttpAccountService::new(config.account_url.clone(), timeout)?),
        gateway: Arc::new(HttpPaymentGateway::new(config.gateway_url.clone(), timeout)?),
    })
}
