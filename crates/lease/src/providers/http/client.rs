//! HTTP clients for the registry, account and checkout endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use super::models::{
    AccountResponse, AddModelBody, AddModelResponse, CheckoutBody, CheckoutResponse, ErrorBody,
};
use crate::model::ModelId;
use crate::pricing::Credits;
use crate::providers::traits::{
    AccountError, AccountService, Balance, BalanceLookup, Checkout, CheckoutRequest,
    GatewayError, ModelRegistry, PaymentGateway, RegistryError, SessionToken,
};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Raw outcome of a request, before it is mapped to a collaborator error.
enum Failure {
    Transport(reqwest::Error),
    Status { status: StatusCode, message: String },
}

/// Shared plumbing: base URL, client, and response handling.
#[derive(Clone)]
struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, Failure> {
        let response = request.send().await.map_err(Failure::Transport)?;
        let status = response.status();
        let text = response.text().await.map_err(Failure::Transport)?;

        if status.is_success() {
            Ok(text)
        } else {
            // Prefer the server's own message when it sends a JSON error body.
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            Err(Failure::Status { status, message })
        }
    }
}

/// Model registry backed by `POST {base}/models`.
#[derive(Clone)]
pub struct HttpModelRegistry {
    api: ApiClient,
}

impl HttpModelRegistry {
    /// Create a registry client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl ModelRegistry for HttpModelRegistry {
    async fn register_model(&self, model: &ModelId) -> Result<u64, RegistryError> {
        let url = self.api.url("/models");
        debug!(url = %url, model = %model, "POST request");

        let request = self.api.client.post(&url).json(&AddModelBody {
            model: model.as_str(),
        });

        let text = self.api.send(request).await.map_err(|failure| match failure {
            Failure::Status { status, message }
                if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT =>
            {
                RegistryError::Rejected {
                    model: model.to_string(),
                    message,
                }
            }
            Failure::Status { status, message } => RegistryError::Unreachable {
                model: model.to_string(),
                message: format!("{status}: {message}"),
            },
            Failure::Transport(e) => RegistryError::Unreachable {
                model: model.to_string(),
                message: e.to_string(),
            },
        })?;

        let body: AddModelResponse = serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, body = %text, "Failed to parse registry response");
            RegistryError::Unreachable {
                model: model.to_string(),
                message: format!("unexpected response: {e}"),
            }
        })?;

        info!(model = %model, required_gpus = body.required_gpus, "Model registered");
        Ok(body.required_gpus)
    }
}

/// Account service backed by `GET {base}/account`.
#[derive(Clone)]
pub struct HttpAccountService {
    api: ApiClient,
}

impl HttpAccountService {
    /// Create an account client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl AccountService for HttpAccountService {
    async fn balance(
        &self,
        session: Option<&SessionToken>,
    ) -> Result<BalanceLookup, AccountError> {
        let Some(session) = session else {
            debug!("No session, skipping balance lookup");
            return Ok(BalanceLookup::NoSession);
        };

        let url = self.api.url("/account");
        debug!(url = %url, "GET request");

        let request = self
            .api
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", session.expose()));

        match self.api.send(request).await {
            Ok(text) => {
                let body: AccountResponse = serde_json::from_str(&text).map_err(|e| {
                    warn!(error = %e, body = %text, "Failed to parse account response");
                    AccountError::Serialization(e)
                })?;
                Ok(BalanceLookup::Authenticated(Balance::new(Credits(
                    body.credits,
                ))))
            }
            Err(Failure::Status { status, .. })
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
            {
                info!(status = %status, "Session rejected by account service");
                Ok(BalanceLookup::NoSession)
            }
            Err(Failure::Status { status, message }) => Err(AccountError::Api {
                status: status.as_u16(),
                message,
            }),
            Err(Failure::Transport(e)) => Err(AccountError::Http(e)),
        }
    }
}

/// Payment gateway backed by `POST {base}/checkout`.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    api: ApiClient,
}

impl HttpPaymentGateway {
    /// Create a checkout client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_checkout(&self, request: CheckoutRequest) -> Result<Checkout, GatewayError> {
        let url = self.api.url("/checkout");
        debug!(url = %url, amount = %request.amount, "POST request");

        let body = CheckoutBody {
            purchase_amount: request.amount.0,
            redirect_to: &request.return_to,
        };
        let text = self
            .api
            .send(self.api.client.post(&url).json(&body))
            .await
            .map_err(|failure| match failure {
                Failure::Transport(e) => GatewayError::Http(e),
                Failure::Status { status, message } => GatewayError::Api {
                    status: status.as_u16(),
                    message,
                },
            })?;

        let response: CheckoutResponse = serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, body = %text, "Failed to parse checkout response");
            GatewayError::Serialization(e)
        })?;

        info!(amount = %request.amount, "Checkout session created");
        Ok(Checkout {
            redirect_url: response.url,
            amount: request.amount,
        })
    }
}
