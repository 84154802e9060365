use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use storefront_checkout::{
    config::{self, AppConfig},
    providers::{PaymentProvider, SandboxProvider, WompiClient},
    services::card_validator,
    session_from_config, CancellationFlag, CheckoutServices, Clock, FinalStatusView,
    PaymentFormData, PriceCalculator, Product, RestBackendClient, SystemClock,
};
use tracing::debug;

const SANDBOX_INTEGRITY_KEY: &str = "sandbox_integrity";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateCard(args) => handle_validate_card(args, cli.json),
        Commands::FormatPhone(args) => handle_format_phone(args, cli.json),
        Commands::Quote(args) if args.product_id.is_none() => handle_quote_offline(args, cli.json),
        command => {
            let context = CliContext::initialize(cli.sandbox)?;
            run(&context, command, cli.json).await
        }
    }
}

async fn run(context: &CliContext, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Products(args) => handle_products(context, args, json).await,
        Commands::Quote(args) => handle_quote(context, args, json).await,
        Commands::ValidateCard(args) => handle_validate_card(args, json),
        Commands::FormatPhone(args) => handle_format_phone(args, json),
        Commands::Checkout(args) => handle_checkout(context, args, json).await,
        Commands::Status(args) => handle_status(context, args, json).await,
        Commands::Session(command) => handle_session(context, command, json).await,
    }
}

#[derive(Parser)]
#[command(name = "checkout-cli", about = "Storefront checkout driver", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Charge against the in-process sandbox provider instead of the live API"
    )]
    sandbox: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List purchasable products
    Products(ProductsArgs),
    /// Price breakdown for a product or an ad-hoc amount
    Quote(QuoteArgs),
    /// Luhn check, brand and formatting of a card number
    ValidateCard(ValidateCardArgs),
    /// Format a Colombian mobile number
    FormatPhone(FormatPhoneArgs),
    /// Run a full checkout attempt
    Checkout(CheckoutArgs),
    /// Look up a payment status
    Status(StatusArgs),
    /// Inspect or clear the saved checkout session
    #[command(subcommand)]
    Session(SessionCommands),
}

#[derive(Args)]
struct ProductsArgs {
    #[arg(long, default_value_t = 1, help = "1-based page number")]
    page: u32,
    #[arg(long, help = "Products per page (clamped to the configured maximum)")]
    page_size: Option<u32>,
}

#[derive(Args)]
struct QuoteArgs {
    #[arg(long, help = "Fetch the product and quote its price")]
    product_id: Option<String>,
    #[arg(long, conflicts_with = "product_id", help = "Product price in whole units")]
    price: Option<i64>,
    #[arg(long, conflicts_with = "product_id", help = "Product base fee in whole units")]
    base_fee: Option<i64>,
}

#[derive(Args)]
struct ValidateCardArgs {
    number: String,
}

#[derive(Args)]
struct FormatPhoneArgs {
    input: String,
}

#[derive(Args)]
struct CheckoutArgs {
    #[arg(long, help = "Product to buy")]
    product_id: String,
    #[arg(long, help = "Payment form as a JSON file")]
    form: PathBuf,
}

#[derive(Args)]
struct StatusArgs {
    /// Provider transaction id, or backend transaction id with --backend
    id: String,
    #[arg(long, action = ArgAction::SetTrue, help = "Ask the backend instead of the provider")]
    backend: bool,
}

#[derive(Subcommand)]
enum SessionCommands {
    Show,
    Clear,
}

struct CliContext {
    config: AppConfig,
    services: CheckoutServices,
    backend: Arc<RestBackendClient>,
}

impl CliContext {
    fn initialize(sandbox: bool) -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.log_level, config.log_json);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend = Arc::new(
            RestBackendClient::new(config.api_base_url.clone(), config.request_timeout())
                .context("failed to build backend client")?,
        );

        let mut config = config;
        let provider: Arc<dyn PaymentProvider> = if sandbox {
            if config.provider.integrity_key.is_empty() {
                config.provider.integrity_key = SANDBOX_INTEGRITY_KEY.to_string();
            }
            debug!(target: "checkout_cli", "using in-process sandbox provider");
            Arc::new(SandboxProvider::new(
                config.provider.integrity_key.clone(),
                clock.clone(),
            ))
        } else {
            Arc::new(
                WompiClient::from_config(&config.provider, config.request_timeout())
                    .context("failed to build provider client")?,
            )
        };

        let session = session_from_config(&config, clock.clone());
        let services = CheckoutServices::build(&config, provider, backend.clone(), session, clock);

        Ok(Self {
            config,
            services,
            backend,
        })
    }

    async fn product(&self, product_id: &str) -> Result<Product> {
        self.services
            .catalog
            .get_product(product_id)
            .await
            .with_context(|| format!("failed to load product {}", product_id))
    }
}

async fn handle_products(context: &CliContext, args: ProductsArgs, json: bool) -> Result<()> {
    let page = context
        .services
        .catalog
        .fetch_page(args.page, args.page_size)
        .await
        .context("failed to list products")?;

    if json {
        return print_json(&page);
    }

    println!(
        "Page {}/{} • {} products total",
        page.page, page.total_pages, page.total
    );
    for product in &page.products {
        println!(
            "- {} • {} • {} {} • stock {}",
            product.id, product.name, product.price, context.config.currency, product.stock
        );
    }
    Ok(())
}

async fn handle_quote(context: &CliContext, args: QuoteArgs, json: bool) -> Result<()> {
    let product_id = args
        .product_id
        .ok_or_else(|| anyhow!("--product-id is required"))?;
    let product = context.product(&product_id).await?;
    let breakdown = context.services.orchestrator.quote(&product);
    render_quote(&breakdown, &context.config.currency, json)
}

fn handle_quote_offline(args: QuoteArgs, json: bool) -> Result<()> {
    let price = args
        .price
        .ok_or_else(|| anyhow!("either --product-id or --price is required"))?;
    if price < 0 {
        bail!("price must not be negative");
    }
    let breakdown = PriceCalculator::default().breakdown_for(price, args.base_fee);
    render_quote(&breakdown, "COP", json)
}

fn render_quote(
    breakdown: &storefront_checkout::MoneyBreakdown,
    currency: &str,
    json: bool,
) -> Result<()> {
    if json {
        return print_json(breakdown);
    }
    println!("Product   {:>12} {}", breakdown.product_amount, currency);
    println!("Base fee  {:>12} {}", breakdown.base_fee, currency);
    println!("Delivery  {:>12} {}", breakdown.delivery_fee, currency);
    println!("Subtotal  {:>12} {}", breakdown.subtotal, currency);
    println!("Tax       {:>12} {}", breakdown.tax, currency);
    println!("Total     {:>12} {}", breakdown.total, currency);
    Ok(())
}

#[derive(Serialize)]
struct CardReport {
    valid: bool,
    brand: String,
    formatted: String,
    masked: String,
    sandbox_outcome: Option<String>,
}

fn handle_validate_card(args: ValidateCardArgs, json: bool) -> Result<()> {
    let report = CardReport {
        valid: card_validator::validate_card_number(&args.number),
        brand: card_validator::detect_brand(&args.number).to_string(),
        formatted: card_validator::format_card_number(&args.number),
        masked: card_validator::mask_card_number(&args.number),
        sandbox_outcome: card_validator::sandbox_expectation(&args.number).map(|s| s.to_string()),
    };

    if json {
        return print_json(&report);
    }
    println!(
        "{} • {} • {}",
        report.formatted,
        report.brand,
        if report.valid { "valid" } else { "invalid" }
    );
    if let Some(outcome) = &report.sandbox_outcome {
        println!("Sandbox test card, expected outcome: {}", outcome);
    }
    Ok(())
}

fn handle_format_phone(args: FormatPhoneArgs, json: bool) -> Result<()> {
    let formatted = card_validator::format_phone_co(&args.input);
    if json {
        return print_json(&serde_json::json!({
            "formatted": formatted,
            "complete": card_validator::is_complete_phone_co(&formatted),
        }));
    }
    println!("{}", formatted);
    Ok(())
}

async fn handle_checkout(context: &CliContext, args: CheckoutArgs, json: bool) -> Result<()> {
    let raw = fs::read_to_string(&args.form)
        .with_context(|| format!("failed to read form file {}", args.form.display()))?;
    let form: PaymentFormData =
        serde_json::from_str(&raw).context("form file is not a valid payment form")?;
    let product = context.product(&args.product_id).await?;

    let orchestrator = &context.services.orchestrator;
    orchestrator
        .session()
        .select_product(&product.id)
        .await
        .context("failed to update session")?;

    let cancel = CancellationFlag::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match orchestrator.checkout(&product, &form, &cancel).await {
        Ok(outcome) => {
            let view = FinalStatusView::from_result(Some(&outcome.transaction_id), &outcome.result);
            let reconciled = outcome.reconciliation.wait().await.is_ok();
            if json {
                print_json(&serde_json::json!({
                    "transactionId": outcome.transaction_id,
                    "result": outcome.result,
                    "breakdown": outcome.breakdown,
                    "polls": outcome.polls,
                    "reconciled": reconciled,
                }))?;
            } else {
                render_view(&view);
                if !reconciled {
                    println!("Warning: the backend record could not be updated");
                }
            }
            Ok(())
        }
        Err(err) => {
            let view = FinalStatusView::from_error(err.transaction_id(), &err);
            if json {
                print_json(&serde_json::json!({
                    "error": err.to_string(),
                    "message": view.message,
                    "transactionId": view.transaction_id,
                    "providerTransactionId": err.provider_transaction_id(),
                    "retryable": view.show_retry,
                }))?;
            } else {
                render_view(&view);
                if let Some(provider_id) = err.provider_transaction_id() {
                    println!("Check it later with: status {}", provider_id);
                }
            }
            Err(err.into())
        }
    }
}

async fn handle_status(context: &CliContext, args: StatusArgs, json: bool) -> Result<()> {
    if args.backend {
        use storefront_checkout::BackendApi;
        let status = context
            .backend
            .payment_status(&args.id)
            .await
            .with_context(|| format!("failed to load backend status for {}", args.id))?;
        if json {
            return print_json(&status);
        }
        println!("{} • {}", status.transaction_id, status.status);
        return Ok(());
    }

    let result = context
        .services
        .orchestrator
        .adapter()
        .get_payment_status(&args.id)
        .await;
    if json {
        return print_json(&result);
    }
    render_view(&FinalStatusView::from_result(None, &result));
    Ok(())
}

async fn handle_session(context: &CliContext, command: SessionCommands, json: bool) -> Result<()> {
    let session = context.services.orchestrator.session();
    match command {
        SessionCommands::Show => {
            let progress = session.load_progress().await?;
            let form = session.load_form().await?;
            let result = session.load_result().await?;
            if json {
                return print_json(&serde_json::json!({
                    "progress": progress,
                    "paymentForm": form,
                    "paymentResult": result,
                }));
            }
            match progress {
                Some(progress) => println!(
                    "Step {} • product {} • saved {}",
                    progress.current_step.number(),
                    progress.selected_product_id.as_deref().unwrap_or("-"),
                    progress.timestamp
                ),
                None => println!("No saved progress"),
            }
            if let Some(stored) = result {
                render_view(&FinalStatusView::from_result(
                    Some(&stored.transaction_id),
                    &stored.result,
                ));
            }
        }
        SessionCommands::Clear => {
            session.clear_all().await?;
            if !json {
                println!("Session cleared");
            }
        }
    }
    Ok(())
}

fn render_view(view: &FinalStatusView) {
    println!("{} [{}]", view.title, view.kind);
    println!("{}", view.message);
    if let Some(id) = &view.transaction_id {
        println!("Transaction: {}", id);
    }
    if view.show_retry {
        println!("You can try again.");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
