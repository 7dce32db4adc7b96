//! Continuation tokens for re-entering the workflow after a redirect.
//!
//! Sign-in and checkout both leave the application. The return URL carries
//! where to pick up again:
//!
//! ```text
//! /models?openLeaseModal=true&model=org%2Fname&step=1&success=true
//! ```
//!
//! `success=true` marks a completed purchase, `canceled=true` an abandoned
//! one, and neither a plain sign-in return.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;
use crate::model::ModelId;
use crate::sequencer::Step;

const PARAM_OPEN: &str = "openLeaseModal";
const PARAM_MODEL: &str = "model";
const PARAM_STEP: &str = "step";
const PARAM_SUCCESS: &str = "success";
const PARAM_CANCELED: &str = "canceled";
const PARAM_RETURN_TO: &str = "returnTo";

/// How a checkout detour ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Succeeded,
    Canceled,
}

/// Where to resume a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeContext {
    /// Model identifier as it was in the workflow.
    pub model: String,
    /// Step to resume at.
    pub step: Step,
    /// Set when returning from checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PurchaseOutcome>,
}

impl ResumeContext {
    /// Resume `model` at `step`, with no purchase outcome.
    #[must_use]
    pub fn at(model: impl Into<String>, step: Step) -> Self {
        Self {
            model: model.into(),
            step,
            outcome: None,
        }
    }

    /// The same context with a checkout outcome attached.
    #[must_use]
    pub fn with_outcome(mut self, outcome: PurchaseOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Return URL on `base` carrying this context.
    #[must_use]
    pub fn return_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair(PARAM_OPEN, "true")
                .append_pair(PARAM_MODEL, &self.model)
                .append_pair(PARAM_STEP, &self.step.index().to_string());
            match self.outcome {
                Some(PurchaseOutcome::Succeeded) => {
                    query.append_pair(PARAM_SUCCESS, "true");
                }
                Some(PurchaseOutcome::Canceled) => {
                    query.append_pair(PARAM_CANCELED, "true");
                }
                None => {}
            }
        }
        url
    }

    /// Sign-in URL that comes back to this context afterwards.
    #[must_use]
    pub fn sign_in_url(&self, sign_in: &Url, return_base: &Url) -> Url {
        let target = self.return_url(return_base);
        // Same-origin targets are passed as a path so the sign-in page does
        // not have to trust absolute URLs.
        let return_to = if target.origin() == sign_in.origin() {
            match target.query() {
                Some(q) => format!("{}?{q}", target.path()),
                None => target.path().to_string(),
            }
        } else {
            target.to_string()
        };
        let mut url = sign_in.clone();
        url.query_pairs_mut().append_pair(PARAM_RETURN_TO, &return_to);
        url
    }

    /// Read a context from a return URL.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidResume`] if the URL does not carry a
    /// usable context.
    pub fn from_url(url: &Url) -> Result<Self, ValidationError> {
        Self::from_query(url.query().unwrap_or_default())
    }

    /// Read a context from a query string (with or without a leading `?`).
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidResume`] if `model` or `step` is
    /// missing or malformed, or both outcome flags are set.
    pub fn from_query(query: &str) -> Result<Self, ValidationError> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut model = None;
        let mut step = None;
        let mut succeeded = false;
        let mut canceled = false;

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                PARAM_MODEL => model = Some(value.into_owned()),
                PARAM_STEP => {
                    let index: u8 = value.trim().parse().map_err(|_| {
                        ValidationError::InvalidResume(format!("step '{value}' is not a number"))
                    })?;
                    step = Some(Step::try_from(index)?);
                }
                PARAM_SUCCESS => succeeded = is_true(&value),
                PARAM_CANCELED => canceled = is_true(&value),
                _ => {}
            }
        }

        let outcome = match (succeeded, canceled) {
            (true, true) => {
                return Err(ValidationError::InvalidResume(
                    "both success and canceled are set".to_string(),
                ))
            }
            (true, false) => Some(PurchaseOutcome::Succeeded),
            (false, true) => Some(PurchaseOutcome::Canceled),
            (false, false) => None,
        };

        Ok(Self {
            model: model
                .ok_or_else(|| ValidationError::InvalidResume("missing model".to_string()))?,
            step: step.ok_or_else(|| ValidationError::InvalidResume("missing step".to_string()))?,
            outcome,
        })
    }

    /// Validate the model and pick the step to actually resume at.
    ///
    /// A context can never land past [`Step::ReviewPricing`]: funding is
    /// always re-checked against a fresh balance.
    ///
    /// # Errors
    /// Returns the model validation error.
    pub fn validate(&self) -> Result<(ModelId, Step), ValidationError> {
        let model = ModelId::parse(&self.model)?;
        let step = self.step.min(Step::ReviewPricing);
        Ok((model, step))
    }
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://app.example.com/models").unwrap()
    }

    #[test]
    fn test_return_url_encodes_model() {
        let ctx = ResumeContext::at("NousResearch/Hermes-3-Llama-3.1-8B", Step::ReviewPricing);
        assert_eq!(
            ctx.return_url(&base()).as_str(),
            "https://app.example.com/models?openLeaseModal=true&model=NousResearch%2FHermes-3-Llama-3.1-8B&step=1"
        );
    }

    #[test]
    fn test_parse_success_return() {
        let url = Url::parse(
            "https://app.example.com/models?openLeaseModal=true&model=org%2Fname&step=1&success=true",
        )
        .unwrap();
        let ctx = ResumeContext::from_url(&url).unwrap();
        assert_eq!(
            ctx,
            ResumeContext::at("org/name", Step::ReviewPricing)
                .with_outcome(PurchaseOutcome::Succeeded)
        );
    }

    #[test]
    fn test_parse_canceled_return() {
        let ctx = ResumeContext::from_query("?model=org%2Fname&step=1&canceled=true").unwrap();
        assert_eq!(ctx.outcome, Some(PurchaseOutcome::Canceled));
        assert_eq!(ctx.step, Step::ReviewPricing);
    }

    #[test]
    fn test_round_trip_through_url() {
        let ctx = ResumeContext::at("a/b", Step::ReviewPricing).with_outcome(PurchaseOutcome::Canceled);
        assert_eq!(ResumeContext::from_url(&ctx.return_url(&base())).unwrap(), ctx);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for query in [
            "step=1",
            "model=a%2Fb",
            "model=a%2Fb&step=x",
            "model=a%2Fb&step=7",
            "model=a%2Fb&step=1&success=true&canceled=true",
        ] {
            assert!(
                matches!(
                    ResumeContext::from_query(query),
                    Err(ValidationError::InvalidResume(_))
                ),
                "{query} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_caps_step() {
        let (model, step) = ResumeContext::at("a/b", Step::Complete).validate().unwrap();
        assert_eq!(model.as_str(), "a/b");
        assert_eq!(step, Step::ReviewPricing);

        let (_, step) = ResumeContext::at("a/b", Step::SelectModel).validate().unwrap();
        assert_eq!(step, Step::SelectModel);
    }

    #[test]
    fn test_validate_rejects_malformed_model() {
        assert!(ResumeContext::at("../../etc", Step::ReviewPricing)
            .validate()
            .is_err());
    }

    #[test]
    fn test_sign_in_url_same_origin_uses_path() {
        let sign_in = Url::parse("https://app.example.com/sign-in").unwrap();
        let url = ResumeContext::at("org/name", Step::ReviewPricing).sign_in_url(&sign_in, &base());
        let return_to = url
            .query_pairs()
            .find(|(k, _)| k == "returnTo")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(
            return_to,
            "/models?openLeaseModal=true&model=org%2Fname&step=1"
        );
    }

    #[test]
    fn test_serde_token() {
        let ctx = ResumeContext::at("org/name", Step::ReviewPricing);
        let json = serde_json::to_string(&ctx).unwrap();
        assert_eq!(json, r#"{"model":"org/name","step":1}"#);
        assert_eq!(serde_json::from_str::<ResumeContext>(&json).unwrap(), ctx);
    }
}
