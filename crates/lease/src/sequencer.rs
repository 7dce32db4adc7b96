//! The three-step lease workflow as a pure state machine.
//!
//! ```text
//! SelectModel (0) ──register──▶ ReviewPricing (1) ──funded──▶ Complete (2)
//!        ◀────────retreat─────────        ◀──────retreat──────
//! ```
//!
//! [`advance`] never performs I/O. The caller resolves whatever the current
//! step depends on (registry result, quote, balance) and hands it in as a
//! [`StepInput`]; the sequencer decides the next state and the effect the
//! front end should act on.

use serde::{Deserialize, Serialize};

use crate::error::{LeaseError, ValidationError};
use crate::funding::{FundingGate, PurchaseIntent};
use crate::model::ModelId;
use crate::pricing::{CostQuote, Denomination};
use crate::providers::{BalanceLookup, RegistryError};
use crate::resume::ResumeContext;

/// A workflow step.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Step {
    /// Pick and register a model.
    #[default]
    SelectModel,
    /// Review cost against balance, buying credits if short.
    ReviewPricing,
    /// Lease summary. Terminal.
    Complete,
}

impl Step {
    /// All steps in order.
    pub const ALL: [Step; 3] = [Step::SelectModel, Step::ReviewPricing, Step::Complete];

    /// Zero-based position.
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Self::SelectModel => 0,
            Self::ReviewPricing => 1,
            Self::Complete => 2,
        }
    }

    /// Step at `index`, if there is one.
    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SelectModel => "Select Model",
            Self::ReviewPricing => "Review Pricing",
            Self::Complete => "Complete",
        }
    }

    fn next(self) -> Self {
        Self::from_index(self.index() + 1).unwrap_or(Self::Complete)
    }

    fn previous(self) -> Self {
        Self::from_index(self.index().saturating_sub(1)).unwrap_or(Self::SelectModel)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> Self {
        step.index()
    }
}

impl TryFrom<u8> for Step {
    type Error = ValidationError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::from_index(index)
            .ok_or_else(|| ValidationError::InvalidResume(format!("step {index} is out of range")))
    }
}

/// Progress indicator status of a step relative to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Complete,
    Current,
    Upcoming,
}

/// Status of every step, for a progress indicator.
#[must_use]
pub fn progress(current: Step) -> [(Step, StepStatus); 3] {
    Step::ALL.map(|step| {
        let status = match step.cmp(&current) {
            std::cmp::Ordering::Less => StepStatus::Complete,
            std::cmp::Ordering::Equal => StepStatus::Current,
            std::cmp::Ordering::Greater => StepStatus::Upcoming,
        };
        (step, status)
    })
}

/// The resumable part of a workflow: where it is and for which model.
///
/// Restoring goes through [`ResumeContext`], which re-validates both fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct WorkflowState {
    step: Step,
    model: String,
}

impl WorkflowState {
    /// A fresh workflow at the first step.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            step: Step::SelectModel,
            model: model.into(),
        }
    }

    /// A workflow re-entered at `step` for a validated model.
    #[must_use]
    pub(crate) fn resumed(model: &ModelId, step: Step) -> Self {
        Self {
            step,
            model: model.to_string(),
        }
    }

    #[must_use]
    pub fn step(&self) -> Step {
        self.step
    }

    /// The model as entered; validated when advancing from the first step.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Something [`advance`] is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// The model's GPU requirement.
    GpuRequirement,
    /// The user's balance.
    Balance,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GpuRequirement => write!(f, "GPU requirement"),
            Self::Balance => write!(f, "balance"),
        }
    }
}

/// An async value that may not have arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
    Pending,
    Ready(T),
}

/// What the front end should do after a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Moved forward to this step.
    Advanced(Step),
    /// A dependency is still loading; nothing changed. Call again later.
    Pending(Dependency),
    /// Nobody is signed in; send the user to sign in and come back here.
    RequireAuthentication(ResumeContext),
    /// Balance is short; offer this purchase.
    OfferPurchase(PurchaseIntent),
    /// The lease is funded but settlement and provisioning are not built.
    SettlementNotImplemented,
}

/// Funding inputs for leaving [`Step::ReviewPricing`].
#[derive(Debug, Clone, Copy)]
pub struct FundingInput {
    pub quote: Resolution<CostQuote>,
    pub balance: Resolution<BalanceLookup>,
    /// The user explicitly chose to continue after a completed purchase.
    pub purchase_override: bool,
    /// Denomination the purchase offer is made in.
    pub preference: Denomination,
    pub gate: FundingGate,
}

/// Everything the current step needs to decide a transition.
#[derive(Debug)]
pub enum StepInput {
    /// Outcome of registering the model entered at [`Step::SelectModel`].
    Registration(Result<CostQuote, RegistryError>),
    /// Funding state at [`Step::ReviewPricing`].
    Funding(FundingInput),
    /// Finalization request at [`Step::Complete`].
    Finalize,
}

/// New state plus what to do about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: WorkflowState,
    pub effect: Effect,
}

impl Transition {
    fn stay(state: &WorkflowState, effect: Effect) -> Self {
        Self {
            state: state.clone(),
            effect,
        }
    }

    fn forward(state: &WorkflowState) -> Self {
        let step = state.step.next();
        Self {
            state: WorkflowState {
                step,
                model: state.model.clone(),
            },
            effect: Effect::Advanced(step),
        }
    }
}

/// Attempt to move forward one step.
///
/// # Errors
/// Registry failures at the first step are returned as-is and the workflow
/// stays put. An input that does not belong to the current step is a
/// [`ValidationError::WrongStep`].
pub fn advance(state: &WorkflowState, input: StepInput) -> Result<Transition, LeaseError> {
    match (state.step, input) {
        (Step::SelectModel, StepInput::Registration(result)) => {
            result?;
            Ok(Transition::forward(state))
        }
        (Step::ReviewPricing, StepInput::Funding(funding)) => Ok(review_pricing(state, funding)),
        (Step::Complete, StepInput::Finalize) => Ok(Transition::stay(
            state,
            Effect::SettlementNotImplemented,
        )),
        (actual, input) => Err(ValidationError::WrongStep {
            expected: expected_step(&input),
            actual,
        }
        .into()),
    }
}

fn expected_step(input: &StepInput) -> Step {
    match input {
        StepInput::Registration(_) => Step::SelectModel,
        StepInput::Funding(_) => Step::ReviewPricing,
        StepInput::Finalize => Step::Complete,
    }
}

fn review_pricing(state: &WorkflowState, input: FundingInput) -> Transition {
    let balance = match input.balance {
        Resolution::Pending => return Transition::stay(state, Effect::Pending(Dependency::Balance)),
        Resolution::Ready(BalanceLookup::NoSession) => {
            return Transition::stay(
                state,
                Effect::RequireAuthentication(ResumeContext::at(state.model(), Step::ReviewPricing)),
            )
        }
        Resolution::Ready(BalanceLookup::Authenticated(balance)) => balance,
    };

    let Resolution::Ready(quote) = input.quote else {
        return Transition::stay(state, Effect::Pending(Dependency::GpuRequirement));
    };

    let decision = input.gate.evaluate(&quote, &balance);
    if decision.sufficient || input.purchase_override {
        return Transition::forward(state);
    }

    let intent = input.gate.purchase_for(
        decision.shortfall,
        input.preference,
        ResumeContext::at(state.model(), Step::ReviewPricing),
    );
    Transition::stay(state, Effect::OfferPurchase(intent))
}

/// Move back one step, stopping at the first.
#[must_use]
pub fn retreat(state: &WorkflowState) -> WorkflowState {
    WorkflowState {
        step: state.step.previous(),
        model: state.model.clone(),
    }
}

/// Replace the model being leased. Only possible at [`Step::SelectModel`].
///
/// # Errors
/// Returns [`ValidationError::WrongStep`] at any other step.
pub fn select_model(
    state: &WorkflowState,
    model: impl Into<String>,
) -> Result<WorkflowState, ValidationError> {
    if state.step != Step::SelectModel {
        return Err(ValidationError::WrongStep {
            expected: Step::SelectModel,
            actual: state.step,
        });
    }
    Ok(WorkflowState {
        step: state.step,
        model: model.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{Credits, PricingConfig};
    use crate::providers::Balance;

    fn gate() -> FundingGate {
        FundingGate::new(PricingConfig::new(100, 4).unwrap())
    }

    fn at(step: Step) -> WorkflowState {
        WorkflowState {
            step,
            model: "org/model".to_string(),
        }
    }

    fn funding(quote: Resolution<CostQuote>, balance: Resolution<BalanceLookup>) -> StepInput {
        StepInput::Funding(FundingInput {
            quote,
            balance,
            purchase_override: false,
            preference: Denomination::Currency,
            gate: gate(),
        })
    }

    fn signed_in(credits: u64) -> Resolution<BalanceLookup> {
        Resolution::Ready(BalanceLookup::Authenticated(Balance::new(credits)))
    }

    fn quote(gpus: u64) -> Resolution<CostQuote> {
        Resolution::Ready(gate().pricing().quote(gpus))
    }

    #[test]
    fn test_registration_moves_to_review() {
        let t = advance(
            &at(Step::SelectModel),
            StepInput::Registration(Ok(gate().pricing().quote(4))),
        )
        .unwrap();
        assert_eq!(t.state.step(), Step::ReviewPricing);
        assert_eq!(t.effect, Effect::Advanced(Step::ReviewPricing));
    }

    #[test]
    fn test_registration_failure_propagates() {
        let err = advance(
            &at(Step::SelectModel),
            StepInput::Registration(Err(RegistryError::Rejected {
                model: "org/model".to_string(),
                message: "gated repository".to_string(),
            })),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to add model 'org/model': gated repository"
        );
    }

    #[test]
    fn test_sufficient_balance_completes() {
        let t = advance(&at(Step::ReviewPricing), funding(quote(4), signed_in(400))).unwrap();
        assert_eq!(t.state.step(), Step::Complete);
        assert_eq!(t.effect, Effect::Advanced(Step::Complete));
    }

    #[test]
    fn test_short_balance_offers_purchase() {
        let t = advance(&at(Step::ReviewPricing), funding(quote(4), signed_in(250))).unwrap();
        assert_eq!(t.state.step(), Step::ReviewPricing);
        let Effect::OfferPurchase(intent) = t.effect else {
            panic!("expected purchase offer, got {:?}", t.effect);
        };
        assert_eq!(intent.amount.value, 37);
        assert_eq!(intent.amount.denomination, Denomination::Currency);
        assert_eq!(intent.shortfall, Credits(150));
        assert_eq!(intent.return_context.step, Step::ReviewPricing);
    }

    #[test]
    fn test_insufficient_balance_never_completes() {
        for credits in [0u64, 1, 250, 396, 399] {
            let t = advance(&at(Step::ReviewPricing), funding(quote(4), signed_in(credits))).unwrap();
            assert_eq!(t.state.step(), Step::ReviewPricing, "balance {credits}");
            assert!(matches!(t.effect, Effect::OfferPurchase(_)), "balance {credits}");
        }

        // A one-credit shortfall truncates to a zero currency offer but still stays.
        let t = advance(&at(Step::ReviewPricing), funding(quote(4), signed_in(399))).unwrap();
        let Effect::OfferPurchase(intent) = t.effect else {
            panic!("expected purchase offer");
        };
        assert_eq!(intent.amount.value, 0);
        assert_eq!(intent.shortfall, Credits(1));
    }

    #[test]
    fn test_override_skips_purchase() {
        let input = StepInput::Funding(FundingInput {
            quote: quote(4),
            balance: signed_in(250),
            purchase_override: true,
            preference: Denomination::Currency,
            gate: gate(),
        });
        let t = advance(&at(Step::ReviewPricing), input).unwrap();
        assert_eq!(t.state.step(), Step::Complete);
    }

    #[test]
    fn test_no_session_requires_authentication() {
        let t = advance(
            &at(Step::ReviewPricing),
            funding(quote(4), Resolution::Ready(BalanceLookup::NoSession)),
        )
        .unwrap();
        assert_eq!(t.state.step(), Step::ReviewPricing);
        assert_eq!(
            t.effect,
            Effect::RequireAuthentication(ResumeContext::at("org/model", Step::ReviewPricing))
        );
    }

    #[test]
    fn test_pending_dependencies_are_no_ops() {
        let t = advance(
            &at(Step::ReviewPricing),
            funding(quote(4), Resolution::Pending),
        )
        .unwrap();
        assert_eq!(t.state, at(Step::ReviewPricing));
        assert_eq!(t.effect, Effect::Pending(Dependency::Balance));

        let t = advance(
            &at(Step::ReviewPricing),
            funding(Resolution::Pending, signed_in(1000)),
        )
        .unwrap();
        assert_eq!(t.state, at(Step::ReviewPricing));
        assert_eq!(t.effect, Effect::Pending(Dependency::GpuRequirement));
    }

    #[test]
    fn test_zero_gpus_is_free() {
        let t = advance(&at(Step::ReviewPricing), funding(quote(0), signed_in(0))).unwrap();
        assert_eq!(t.state.step(), Step::Complete);
    }

    #[test]
    fn test_complete_is_terminal() {
        let t = advance(&at(Step::Complete), StepInput::Finalize).unwrap();
        assert_eq!(t.state.step(), Step::Complete);
        assert_eq!(t.effect, Effect::SettlementNotImplemented);
    }

    #[test]
    fn test_mismatched_input_rejected() {
        let err = advance(&at(Step::SelectModel), StepInput::Finalize).unwrap_err();
        assert!(matches!(
            err,
            LeaseError::Validation(ValidationError::WrongStep {
                expected: Step::Complete,
                actual: Step::SelectModel
            })
        ));
    }

    #[test]
    fn test_retreat_floors_at_zero() {
        assert_eq!(retreat(&at(Step::SelectModel)).step(), Step::SelectModel);
        assert_eq!(retreat(&at(Step::ReviewPricing)).step(), Step::SelectModel);
        assert_eq!(retreat(&at(Step::Complete)).step(), Step::ReviewPricing);
    }

    #[test]
    fn test_step_stays_in_range_for_any_sequence() {
        let mut state = at(Step::SelectModel);
        // Deterministic pseudo-random walk over advance/retreat.
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..1000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let input = match state.step() {
                Step::SelectModel => StepInput::Registration(Ok(gate().pricing().quote(2))),
                Step::ReviewPricing => funding(quote(2), signed_in(u64::from(seed % 400))),
                Step::Complete => StepInput::Finalize,
            };
            state = if seed % 3 == 0 {
                retreat(&state)
            } else {
                advance(&state, input).unwrap().state
            };
            assert!(state.step().index() <= 2);
        }
    }

    #[test]
    fn test_select_model_only_at_first_step() {
        let state = select_model(&at(Step::SelectModel), "other/model").unwrap();
        assert_eq!(state.model(), "other/model");
        assert!(select_model(&at(Step::ReviewPricing), "other/model").is_err());
    }

    #[test]
    fn test_progress() {
        assert_eq!(
            progress(Step::ReviewPricing),
            [
                (Step::SelectModel, StepStatus::Complete),
                (Step::ReviewPricing, StepStatus::Current),
                (Step::Complete, StepStatus::Upcoming),
            ]
        );
    }

    #[test]
    fn test_step_serializes_as_index() {
        assert_eq!(serde_json::to_string(&Step::ReviewPricing).unwrap(), "1");
        assert_eq!(serde_json::from_str::<Step>("2").unwrap(), Step::Complete);
        assert!(serde_json::from_str::<Step>("3").is_err());
    }
}
