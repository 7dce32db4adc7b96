//! GPU lease workflow.
//!
//! A user picks a model, sees what leasing the GPUs it needs would cost, and
//! either continues with their prepaid credits or buys more first. No lease
//! is finalized without a balance that covers it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         LeaseSession                         │
//! │                                                              │
//! │   ┌────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │   │ sequencer  │──▶│ CostResolver │   │   FundingGate    │   │
//! │   │ 0 → 1 → 2  │   │ (cached GPUs)│──▶│ shortfall, offer │   │
//! │   └────────────┘   └──────────────┘   └──────────────────┘   │
//! │          │                 │                    │            │
//! └──────────┼─────────────────┼────────────────────┼────────────┘
//!            ▼                 ▼                    ▼
//!      ResumeContext     ModelRegistry      AccountService / PaymentGateway
//!    (return URL token)
//! ```
//!
//! - [`sequencer`] - pure step transitions and the effects they emit
//! - [`resolver`] - model → GPU count → [`CostQuote`], one registry call per model
//! - [`funding`] - shortfall, default purchase, amount validation
//! - [`resume`] - continuation carried through sign-in and checkout redirects
//! - [`workflow`] - [`LeaseSession`], the above wired to live collaborators
//! - [`providers`] - collaborator traits and their HTTP clients
//!
//! ## Example
//!
//! ```ignore
//! use lease::{providers::http, Effect, LeaseConfig, LeaseSession};
//!
//! let config = LeaseConfig::from_env()?;
//! let mut session = LeaseSession::open(&config, http::collaborators(&config)?, None);
//! session.select_model("NousResearch/Hermes-3-Llama-3.1-8B")?;
//! session.advance().await?;
//! session.settle().await?;
//! if let Effect::RequireAuthentication(_) = session.advance().await? {
//!     println!("Sign in at {}", session.sign_in_url());
//! }
//! ```

pub mod config;
pub mod error;
pub mod funding;
pub mod model;
pub mod pricing;
pub mod providers;
pub mod resolver;
pub mod resume;
pub mod sequencer;
pub mod workflow;

pub use config::{ConfigError, LeaseConfig};
pub use error::{LeaseError, ValidationError};
pub use funding::{FundingDecision, FundingGate, PurchaseIntent};
pub use model::ModelId;
pub use pricing::{CostQuote, Credits, Denomination, Dollars, PricingConfig, PurchaseAmount};
pub use resolver::CostResolver;
pub use resume::{PurchaseOutcome, ResumeContext};
pub use sequencer::{Dependency, Effect, Step, StepStatus, WorkflowState};
pub use workflow::{CostSummary, LeaseSession};
