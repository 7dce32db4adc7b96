//! Wire types for the platform's HTTP API.

use serde::{Deserialize, Serialize};

/// Body of `POST /models`.
#[derive(Debug, Serialize)]
pub struct AddModelBody<'a> {
    pub model: &'a str,
}

/// Response of `POST /models`.
#[derive(Debug, Deserialize)]
pub struct AddModelResponse {
    pub required_gpus: u64,
}

/// Response of `GET /account`.
#[derive(Debug, Deserialize)]
pub struct AccountResponse {
    /// Credits are sent as a string or a number depending on the backend.
    #[serde(deserialize_with = "deserialize_credits")]
    pub credits: u128,
}

/// Body of `POST /checkout`.
#[derive(Debug, Serialize)]
pub struct CheckoutBody<'a> {
    pub purchase_amount: u128,
    pub redirect_to: &'a str,
}

/// Response of `POST /checkout`.
#[derive(Debug, Deserialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Error payload some endpoints return.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

fn deserialize_credits<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(u128::from(n)),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
