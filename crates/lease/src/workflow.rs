//! A live lease workflow.
//!
//! [`LeaseSession`] owns the [`WorkflowState`] for one user and drives the
//! pure [`sequencer`](crate::sequencer) against the real collaborators.
//!
//! Registry and balance lookups needed at [`Step::ReviewPricing`] run as
//! background tasks. While one is still running, [`LeaseSession::advance`]
//! returns [`Effect::Pending`] and changes nothing; the caller tries again
//! later, or awaits [`LeaseSession::settle`] first.
//!
//! ```ignore
//! let mut session = LeaseSession::open(&config, collaborators, Some(token));
//! session.select_model("NousResearch/Hermes-3-Llama-3.1-8B")?;
//! session.advance().await?;              // registers the model
//! session.settle().await?;               // loads the balance
//! match session.advance().await? {
//!     Effect::OfferPurchase(intent) => { /* show the purchase form */ }
//!     Effect::Advanced(Step::Complete) => { /* show the summary */ }
//!     _ => {}
//! }
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::LeaseConfig;
use crate::error::{LeaseError, ValidationError};
use crate::funding::{FundingDecision, FundingGate, PurchaseIntent};
use crate::model::ModelId;
use crate::pricing::{CostQuote, Credits, Denomination, Dollars, PurchaseAmount};
use crate::providers::{
    AccountError, Balance, BalanceLookup, Checkout, CheckoutRequest, Collaborators,
    RegistryError, SessionToken,
};
use crate::resolver::CostResolver;
use crate::resume::{PurchaseOutcome, ResumeContext};
use crate::sequencer::{
    self, Effect, FundingInput, Resolution, Step, StepInput, StepStatus, Transition,
    WorkflowState,
};

/// A collaborator call that may still be running.
enum Lookup<V, E> {
    Idle,
    InFlight(JoinHandle<Result<V, E>>),
    Ready(V),
}

impl<V: Copy, E> Lookup<V, E>
where
    LeaseError: From<E>,
{
    fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    fn ready(&self) -> Option<V> {
        match self {
            Self::Ready(v) => Some(*v),
            _ => None,
        }
    }

    /// Take the result if it has arrived, without waiting.
    async fn poll(&mut self) -> Result<Resolution<V>, LeaseError> {
        match std::mem::replace(self, Self::Idle) {
            Self::Idle => Ok(Resolution::Pending),
            Self::Ready(v) => {
                *self = Self::Ready(v);
                Ok(Resolution::Ready(v))
            }
            Self::InFlight(handle) if !handle.is_finished() => {
                *self = Self::InFlight(handle);
                Ok(Resolution::Pending)
            }
            Self::InFlight(handle) => {
                let v = handle.await??;
                *self = Self::Ready(v);
                Ok(Resolution::Ready(v))
            }
        }
    }

    /// Cancel an in-flight call. Its result is never observed.
    fn abort(&self) {
        if let Self::InFlight(handle) = self {
            handle.abort();
        }
    }

    /// Wait for an in-flight call to finish.
    async fn settle(&mut self) -> Result<Option<V>, LeaseError> {
        if let Self::InFlight(_) = self {
            if let Self::InFlight(handle) = std::mem::replace(self, Self::Idle) {
                let v = handle.await??;
                *self = Self::Ready(v);
            }
        }
        Ok(self.ready())
    }
}

/// GPU requirement lookup for the model being resumed.
struct GpuLookup {
    model: ModelId,
    lookup: Lookup<u64, RegistryError>,
}

/// A purchase amount together with the shortfall it was entered against.
#[derive(Debug, Clone, Copy)]
struct PurchaseEntry {
    shortfall: Credits,
    amount: PurchaseAmount,
}

/// Cost figures for the review and completion steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostSummary {
    pub model: String,
    pub quote: CostQuote,
    pub cost_per_gpu_currency: Dollars,
    pub total_currency: Dollars,
    /// `None` until the balance is loaded, or when nobody is signed in.
    pub balance: Option<Credits>,
    pub shortfall: Option<Credits>,
    /// Balance left once the lease is paid, clamped at zero.
    pub remaining_after_lease: Option<Credits>,
}

/// One user's lease workflow.
pub struct LeaseSession {
    collaborators: Collaborators,
    session: Option<SessionToken>,
    return_url: Url,
    sign_in_url: Url,
    gate: FundingGate,
    resolver: CostResolver,
    state: WorkflowState,
    balance: Lookup<BalanceLookup, AccountError>,
    gpu: Option<GpuLookup>,
    preference: Denomination,
    purchase: Option<PurchaseEntry>,
    purchase_completed: bool,
    purchase_override: bool,
}

impl LeaseSession {
    /// Start a fresh workflow at [`Step::SelectModel`].
    #[must_use]
    pub fn open(
        config: &LeaseConfig,
        collaborators: Collaborators,
        session: Option<SessionToken>,
    ) -> Self {
        Self::with_state(config, collaborators, session, WorkflowState::default())
    }

    /// Re-enter a workflow from a resume context.
    ///
    /// Any earlier balance is discarded: it is fetched again before funding
    /// is evaluated. A completed purchase is never assumed to have landed.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if the context names an invalid model.
    pub fn restore(
        config: &LeaseConfig,
        collaborators: Collaborators,
        session: Option<SessionToken>,
        resume: &ResumeContext,
    ) -> Result<Self, LeaseError> {
        let (model, step) = resume.validate()?;
        if step != resume.step {
            warn!(requested = %resume.step, resumed = %step, "Resume step capped");
        }

        let mut this = Self::with_state(
            config,
            collaborators,
            session,
            WorkflowState::resumed(&model, step),
        );
        this.purchase_completed = resume.outcome == Some(PurchaseOutcome::Succeeded);

        match resume.outcome {
            Some(PurchaseOutcome::Succeeded) => {
                info!(model = %model, "Resumed after completed purchase, refreshing balance");
            }
            Some(PurchaseOutcome::Canceled) => {
                info!(model = %model, "Resumed after canceled purchase");
            }
            None => info!(model = %model, step = %step, "Resumed lease workflow"),
        }
        Ok(this)
    }

    fn with_state(
        config: &LeaseConfig,
        collaborators: Collaborators,
        session: Option<SessionToken>,
        state: WorkflowState,
    ) -> Self {
        Self {
            collaborators,
            session,
            return_url: config.return_url.clone(),
            sign_in_url: config.sign_in_url.clone(),
            gate: FundingGate::new(config.pricing),
            resolver: CostResolver::new(config.pricing),
            state,
            balance: Lookup::Idle,
            gpu: None,
            preference: config.pricing.gateway_denomination,
            purchase: None,
            purchase_completed: false,
            purchase_override: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    #[must_use]
    pub fn step(&self) -> Step {
        self.state.step()
    }

    /// Progress indicator for the current step.
    #[must_use]
    pub fn progress(&self) -> [(Step, StepStatus); 3] {
        sequencer::progress(self.state.step())
    }

    /// Where this workflow would resume after a redirect.
    #[must_use]
    pub fn resume_context(&self) -> ResumeContext {
        ResumeContext::at(self.state.model(), self.state.step())
    }

    /// Sign-in page URL that returns to this workflow at the current step.
    #[must_use]
    pub fn sign_in_url(&self) -> Url {
        self.resume_context()
            .sign_in_url(&self.sign_in_url, &self.return_url)
    }

    /// Change the model. Only possible at [`Step::SelectModel`].
    ///
    /// Switching to a different model forgets the old one's GPU requirement.
    ///
    /// # Errors
    /// Returns [`ValidationError::WrongStep`] at any other step.
    pub fn select_model(&mut self, model: &str) -> Result<(), LeaseError> {
        let next = sequencer::select_model(&self.state, model)?;
        if let Ok(previous) = ModelId::parse(self.state.model()) {
            if ModelId::parse(model).ok().as_ref() != Some(&previous) {
                self.resolver.invalidate(&previous);
                if self.gpu.as_ref().is_some_and(|g| g.model == previous) {
                    self.gpu = None;
                }
                self.purchase = None;
            }
        }
        self.state = next;
        Ok(())
    }

    /// Try to move forward one step.
    ///
    /// # Errors
    /// - [`ValidationError`] for a missing or malformed model
    /// - [`RegistryError`] if registration fails; the step does not change
    /// - [`AccountError`] if the balance lookup fails
    pub async fn advance(&mut self) -> Result<Effect, LeaseError> {
        let transition = match self.state.step() {
            Step::SelectModel => self.advance_select_model().await?,
            Step::ReviewPricing => self.advance_review_pricing().await?,
            Step::Complete => {
                let transition = sequencer::advance(&self.state, StepInput::Finalize)?;
                warn!(
                    model = %self.state.model(),
                    "Lease settlement is not implemented; lease not provisioned"
                );
                transition
            }
        };
        Ok(self.apply(transition))
    }

    async fn advance_select_model(&mut self) -> Result<Transition, LeaseError> {
        let model = ModelId::parse(self.state.model()).inspect_err(|e| {
            warn!(error = %e, "Rejected model identifier");
        })?;
        self.state = sequencer::select_model(&self.state, model.as_str())?;

        // A lookup left over from a resumed session already asked the registry.
        if let Some(pending) = self.gpu.take() {
            if pending.model == model {
                let mut lookup = pending.lookup;
                if let Some(gpus) = lookup.settle().await? {
                    self.resolver.record(model.clone(), gpus);
                }
            }
        }

        let result = self
            .resolver
            .resolve(self.collaborators.registry.as_ref(), &model)
            .await
            .inspect_err(|e| warn!(model = %model, error = %e, "Model registration failed"));
        sequencer::advance(&self.state, StepInput::Registration(result))
    }

    async fn advance_review_pricing(&mut self) -> Result<Transition, LeaseError> {
        let model = ModelId::parse(self.state.model())?;
        self.request_missing(&model);

        let balance = self.balance.poll().await?;
        let quote = self.poll_quote(&model).await?;

        let input = FundingInput {
            quote,
            balance,
            purchase_override: self.purchase_override,
            preference: self.preference,
            gate: self.gate,
        };
        sequencer::advance(&self.state, StepInput::Funding(input))
    }

    fn apply(&mut self, transition: Transition) -> Effect {
        let from = self.state.step();
        let to = transition.state.step();
        self.state = transition.state;

        match &transition.effect {
            Effect::Advanced(step) => {
                info!(model = %self.state.model(), from = %from, to = %step, "Lease workflow advanced");
                if to == Step::Complete {
                    self.purchase = None;
                    self.purchase_override = false;
                }
            }
            Effect::Pending(dependency) => {
                debug!(dependency = %dependency, "Advance deferred, dependency pending");
            }
            Effect::RequireAuthentication(_) => {
                info!(model = %self.state.model(), "Sign-in required to review pricing");
            }
            Effect::OfferPurchase(intent) => {
                info!(
                    model = %self.state.model(),
                    shortfall = %intent.shortfall,
                    amount = %intent.amount,
                    "Balance short, offering purchase"
                );
                if self.purchase.map(|entry| entry.shortfall) != Some(intent.shortfall) {
                    self.purchase = Some(PurchaseEntry {
                        shortfall: intent.shortfall,
                        amount: intent.amount,
                    });
                }
            }
            Effect::SettlementNotImplemented => {}
        }
        transition.effect
    }

    /// Move back one step. Never fails; stays put at the first step.
    pub fn retreat(&mut self) {
        let from = self.state.step();
        self.state = sequencer::retreat(&self.state);
        self.purchase = None;
        self.purchase_override = false;
        debug!(from = %from, to = %self.state.step(), "Lease workflow retreated");
    }

    /// Start any lookup the current step needs that is not loaded or running.
    fn request_missing(&mut self, model: &ModelId) {
        if self.balance.is_idle() {
            let accounts = Arc::clone(&self.collaborators.accounts);
            let session = self.session.clone();
            debug!("Requesting balance");
            self.balance = Lookup::InFlight(tokio::spawn(async move {
                accounts.balance(session.as_ref()).await
            }));
        }

        if self.resolver.cached(model).is_none()
            && !self.gpu.as_ref().is_some_and(|g| &g.model == model)
        {
            let registry = Arc::clone(&self.collaborators.registry);
            let owned = model.clone();
            debug!(model = %model, "Requesting GPU requirement");
            self.gpu = Some(GpuLookup {
                model: model.clone(),
                lookup: Lookup::InFlight(tokio::spawn(async move {
                    registry.register_model(&owned).await
                })),
            });
        }
    }

    async fn poll_quote(&mut self, model: &ModelId) -> Result<Resolution<CostQuote>, LeaseError> {
        if let Some(quote) = self.resolver.cached(model) {
            return Ok(Resolution::Ready(quote));
        }
        let Some(pending) = self.gpu.as_mut() else {
            return Ok(Resolution::Pending);
        };
        let polled = pending.lookup.poll().await;
        match polled {
            Ok(Resolution::Ready(gpus)) => {
                self.gpu = None;
                Ok(Resolution::Ready(self.resolver.record(model.clone(), gpus)))
            }
            Ok(Resolution::Pending) => Ok(Resolution::Pending),
            Err(e) => {
                self.gpu = None;
                Err(e)
            }
        }
    }

    /// Wait for every lookup the current step needs.
    ///
    /// Starts missing lookups first, so this also works on a freshly restored
    /// workflow. Does nothing at [`Step::SelectModel`].
    ///
    /// # Errors
    /// Returns the first collaborator failure.
    pub async fn settle(&mut self) -> Result<(), LeaseError> {
        if self.state.step() == Step::SelectModel {
            return Ok(());
        }
        let model = ModelId::parse(self.state.model())?;
        self.request_missing(&model);

        self.balance.settle().await?;
        if let Some(mut pending) = self.gpu.take() {
            if let Some(gpus) = pending.lookup.settle().await? {
                self.resolver.record(pending.model, gpus);
            }
        }
        Ok(())
    }

    /// Quote for the current model, if resolved.
    #[must_use]
    pub fn quote(&self) -> Option<CostQuote> {
        ModelId::parse(self.state.model())
            .ok()
            .and_then(|model| self.resolver.cached(&model))
    }

    /// The most recently fetched balance, if signed in.
    #[must_use]
    pub fn balance(&self) -> Option<Balance> {
        match self.balance.ready() {
            Some(BalanceLookup::Authenticated(balance)) => Some(balance),
            _ => None,
        }
    }

    /// Whether the balance lookup found nobody signed in.
    #[must_use]
    pub fn is_signed_out(&self) -> bool {
        self.balance.ready() == Some(BalanceLookup::NoSession)
    }

    /// Funding decision from the current quote and balance. Never cached.
    #[must_use]
    pub fn funding(&self) -> Option<FundingDecision> {
        Some(self.gate.evaluate(&self.quote()?, &self.balance()?))
    }

    /// Cost figures for display.
    #[must_use]
    pub fn summary(&self) -> Option<CostSummary> {
        let quote = self.quote()?;
        let pricing = self.gate.pricing();
        let balance = self.balance().map(|b| b.credits_available);
        Some(CostSummary {
            model: self.state.model().to_string(),
            quote,
            cost_per_gpu_currency: quote.cost_per_gpu_currency(pricing),
            total_currency: quote.total_currency(pricing),
            balance,
            shortfall: self.funding().map(|d| d.shortfall),
            remaining_after_lease: balance.map(|b| b.saturating_sub(quote.total)),
        })
    }

    /// The purchase currently on offer, if the balance is short.
    ///
    /// An amount the user entered is kept only while the shortfall it was
    /// entered against is unchanged.
    #[must_use]
    pub fn purchase_offer(&self) -> Option<PurchaseIntent> {
        if self.state.step() != Step::ReviewPricing {
            return None;
        }
        let decision = self.funding()?;
        let mut intent = self.gate.build_purchase_intent(
            &decision,
            self.preference,
            ResumeContext::at(self.state.model(), Step::ReviewPricing),
        )?;
        if let Some(entry) = self.purchase.filter(|e| e.shortfall == decision.shortfall) {
            intent.amount = entry.amount;
        }
        Some(intent)
    }

    /// Smallest amount in the current denomination that would be accepted.
    #[must_use]
    pub fn minimum_purchase(&self) -> Option<PurchaseAmount> {
        self.gate.minimum_amount(&self.funding()?, self.preference)
    }

    #[must_use]
    pub fn denomination(&self) -> Denomination {
        self.preference
    }

    /// Switch the purchase denomination, converting the amount entered so far.
    ///
    /// # Errors
    /// Returns [`ValidationError::AmountTooLarge`] if the entered amount
    /// cannot be converted. Nothing changes in that case.
    pub fn set_denomination(&mut self, denomination: Denomination) -> Result<(), LeaseError> {
        if let Some(entry) = self.purchase.as_mut() {
            entry.amount = self.gate.toggle(entry.amount, denomination)?;
        }
        self.preference = denomination;
        Ok(())
    }

    /// Set the purchase amount in the current denomination.
    ///
    /// # Errors
    /// Returns [`ValidationError::WrongStep`] outside [`Step::ReviewPricing`]
    /// and [`ValidationError::FundingUnresolved`] before cost and balance are
    /// known.
    pub fn set_purchase_amount(&mut self, value: u128) -> Result<(), LeaseError> {
        self.expect_step(Step::ReviewPricing)?;
        let decision = self.funding().ok_or(ValidationError::FundingUnresolved)?;
        self.purchase = Some(PurchaseEntry {
            shortfall: decision.shortfall,
            amount: PurchaseAmount {
                value,
                denomination: self.preference,
            },
        });
        Ok(())
    }

    /// Validate the purchase and create a checkout for it.
    ///
    /// On success the purchase is consumed; the user is expected to follow
    /// [`Checkout::redirect_url`] and come back through [`LeaseSession::restore`].
    ///
    /// # Errors
    /// - [`ValidationError`] if the amount does not cover the shortfall, no
    ///   purchase is needed, or funding is not known yet
    /// - [`GatewayError`](crate::providers::GatewayError) if checkout creation fails; nothing changes and
    ///   the user may retry
    pub async fn submit_purchase(&mut self) -> Result<Checkout, LeaseError> {
        self.expect_step(Step::ReviewPricing)?;
        let offer = self
            .purchase_offer()
            .ok_or_else(|| match self.funding() {
                Some(_) => ValidationError::NoPurchaseNeeded,
                None => ValidationError::FundingUnresolved,
            })?;
        let decision = self.funding().ok_or(ValidationError::FundingUnresolved)?;
        let charged = self.gate.validate_purchase(offer.amount, &decision)?;

        let request = CheckoutRequest {
            amount: charged,
            return_to: offer.return_context.return_url(&self.return_url).to_string(),
        };
        info!(model = %self.state.model(), amount = %charged, "Creating checkout");

        let checkout = self
            .collaborators
            .gateway
            .create_checkout(request)
            .await
            .inspect_err(|e| warn!(error = %e, "Checkout creation failed"))?;

        self.purchase = None;
        Ok(checkout)
    }

    /// Continue past a shortfall after a completed purchase.
    ///
    /// Only available when the workflow was restored from a successful
    /// checkout and the balance has been fetched since.
    ///
    /// # Errors
    /// Returns [`ValidationError::OverrideUnavailable`] otherwise.
    pub fn override_funding(&mut self) -> Result<(), LeaseError> {
        self.expect_step(Step::ReviewPricing)?;
        if !self.purchase_completed || self.balance().is_none() {
            return Err(ValidationError::OverrideUnavailable.into());
        }
        warn!(model = %self.state.model(), "Funding override after completed purchase");
        self.purchase_override = true;
        Ok(())
    }

    /// Discard the workflow. Lookups still running are aborted and their
    /// results are never applied.
    pub fn close(self) {
        self.balance.abort();
        if let Some(pending) = &self.gpu {
            pending.lookup.abort();
        }
        info!(model = %self.state.model(), step = %self.state.step(), "Lease workflow closed");
    }

    fn expect_step(&self, expected: Step) -> Result<(), ValidationError> {
        let actual = self.state.step();
        if actual == expected {
            Ok(())
        } else {
            Err(ValidationError::WrongStep { expected, actual })
        }
    }
}
