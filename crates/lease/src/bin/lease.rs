//! Lease CLI - walk the GPU lease workflow against live services.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use lease::providers::{http, SessionToken};
use lease::{
    CostSummary, Denomination, Effect, LeaseConfig, LeaseSession, PurchaseAmount, ResumeContext,
    StepStatus,
};

/// Lease CLI - price and fund GPU leases for hosted models.
#[derive(Parser)]
#[command(name = "lease")]
#[command(about = "Price, fund and resume GPU lease workflows")]
struct Cli {
    /// TOML config file. `LEASE_*` environment variables override it.
    #[arg(long, env = "LEASE_CONFIG")]
    config: Option<PathBuf>,

    /// Session token for the account service (or set `LEASE_SESSION`).
    #[arg(long, env = "LEASE_SESSION", default_value = "", hide_env_values = true)]
    session: String,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the GPU requirement and cost of a model.
    Quote {
        /// Model identifier (organization/model-name).
        #[arg(long)]
        model: String,
    },

    /// Run a workflow from model selection up to funding.
    Start {
        /// Model identifier (organization/model-name).
        #[arg(long)]
        model: String,

        /// Unit for the purchase amount: credits or currency.
        #[arg(long)]
        denomination: Option<Denomination>,

        /// Purchase amount, replacing the suggested one.
        #[arg(long)]
        amount: Option<u128>,

        /// Create a checkout for the offered purchase.
        #[arg(long, default_value = "false")]
        purchase: bool,
    },

    /// Continue a workflow from a sign-in or checkout return URL.
    Resume {
        /// Return URL carrying the workflow context.
        #[arg(long)]
        url: Url,

        /// Continue even if the refreshed balance is still short.
        #[arg(long, default_value = "false")]
        override_purchase: bool,
    },

    /// Convert an amount between credits and currency.
    Convert {
        /// Amount to convert.
        #[arg(long)]
        amount: u128,

        /// Unit of the amount.
        #[arg(long, default_value = "currency")]
        from: Denomination,

        /// Unit to convert to.
        #[arg(long)]
        to: Denomination,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    let session = session_token(&cli.session);

    match cli.command {
        Commands::Convert { amount, from, to } => {
            let input = PurchaseAmount {
                value: amount,
                denomination: from,
            };
            let output = config
                .pricing
                .convert(input, to)
                .with_context(|| format!("{input} is too large to convert"))?;
            println!("{input} = {output}");
        }

        Commands::Quote { model } => {
            let collaborators =
                http::collaborators(&config).context("Failed to create HTTP clients")?;
            let mut workflow = LeaseSession::open(&config, collaborators, session);
            workflow.select_model(&model)?;
            workflow.advance().await?;
            if let Some(summary) = workflow.summary() {
                print_summary(&summary);
            }
            workflow.close();
        }

        Commands::Start {
            model,
            denomination,
            amount,
            purchase,
        } => {
            let collaborators =
                http::collaborators(&config).context("Failed to create HTTP clients")?;
            let mut workflow = LeaseSession::open(&config, collaborators, session);
            if let Some(denomination) = denomination {
                workflow.set_denomination(denomination)?;
            }

            info!(model = %model, "Starting lease workflow");
            workflow.select_model(&model)?;
            let effect = drive(&mut workflow).await?;

            if let Effect::OfferPurchase(_) = effect {
                if let Some(value) = amount {
                    workflow.set_purchase_amount(value)?;
                }
                if let Some(offer) = workflow.purchase_offer() {
                    println!("\n💳 Suggested purchase: {}", offer.amount);
                }
                if let Some(minimum) = workflow.minimum_purchase() {
                    println!("   Minimum accepted:   {minimum}");
                }
                if purchase {
                    let checkout = workflow.submit_purchase().await?;
                    println!("\n✅ Checkout created for {}", checkout.amount);
                    println!("   Continue at: {}", checkout.redirect_url);
                } else {
                    println!("\n💡 Re-run with --purchase to create a checkout");
                }
            }
            workflow.close();
        }

        Commands::Resume {
            url,
            override_purchase,
        } => {
            let context = ResumeContext::from_url(&url).context("Return URL has no workflow")?;
            let collaborators =
                http::collaborators(&config).context("Failed to create HTTP clients")?;
            let mut workflow = LeaseSession::restore(&config, collaborators, session, &context)?;

            workflow.settle().await?;
            if override_purchase {
                workflow.override_funding()?;
            }
            drive(&mut workflow).await?;
            workflow.close();
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<LeaseConfig> {
    let base = match &cli.config {
        Some(path) => LeaseConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LeaseConfig::default(),
    };
    base.with_env_overrides()
        .context("Invalid LEASE_* environment override")
}

fn session_token(raw: &str) -> Option<SessionToken> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| SessionToken::new(raw))
}

/// Settle lookups and advance until the workflow stops at something the
/// user has to act on.
async fn drive(workflow: &mut LeaseSession) -> Result<Effect> {
    loop {
        workflow.settle().await?;
        let effect = workflow.advance().await?;
        print_progress(workflow);
        match &effect {
            Effect::Pending(_) | Effect::Advanced(_) => {}
            Effect::SettlementNotImplemented => {
                if let Some(summary) = workflow.summary() {
                    print_summary(&summary);
                }
                println!("\n⚠️  Lease settlement is not implemented yet");
                return Ok(effect);
            }
            Effect::RequireAuthentication(_) => {
                println!("\n🔒 Sign in to continue:");
                println!("   {}", workflow.sign_in_url());
                return Ok(effect);
            }
            Effect::OfferPurchase(intent) => {
                if let Some(summary) = workflow.summary() {
                    print_summary(&summary);
                }
                println!("\n🔴 Balance short by {}", intent.shortfall);
                return Ok(effect);
            }
        }
    }
}

fn print_progress(workflow: &LeaseSession) {
    let line = workflow
        .progress()
        .iter()
        .map(|(step, status)| {
            let marker = match status {
                StepStatus::Complete => "✔",
                StepStatus::Current => "●",
                StepStatus::Upcoming => "○",
            };
            format!("{marker} {}", step.name())
        })
        .collect::<Vec<_>>()
        .join("  →  ");
    println!("{line}");
}

fn print_summary(summary: &CostSummary) {
    println!("\n🎮 {}", summary.model);
    println!("{}", "=".repeat(50));
    println!("   GPUs:          {}", summary.quote.gpu_count);
    println!(
        "   Per GPU:       {} ({})",
        summary.quote.cost_per_gpu, summary.cost_per_gpu_currency
    );
    println!(
        "   Total:         {} ({})",
        summary.quote.total, summary.total_currency
    );
    if let Some(balance) = summary.balance {
        println!("   Balance:       {balance}");
    }
    if let Some(remaining) = summary.remaining_after_lease {
        println!("   After lease:   {remaining}");
    }
}
