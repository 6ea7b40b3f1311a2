use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stk_confirm::application::controller::PaymentController;
use stk_confirm::config::{ControllerConfig, DEFAULT_ELAPSED_INTERVAL, DEFAULT_MAX_POLLS};
use stk_confirm::domain::payment::PaymentRequest;
use stk_confirm::domain::ports::GatewayBox;
use stk_confirm::error::PaymentError;
use stk_confirm::infrastructure::channel_ui::{ChannelUi, UiEvent};
use stk_confirm::infrastructure::scripted::ScriptedGateway;
use stk_confirm::interfaces::csv::scenario_reader::ScenarioReader;
use stk_confirm::interfaces::csv::session_writer::SessionWriter;
use stk_confirm::logging;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Payer phone number
    phone: String,

    /// Amount to collect
    amount: Decimal,

    /// Sale the payment belongs to
    sale_ref: String,

    /// Base URL of the POS backend API. Requires the `http-gateway` feature.
    #[arg(long)]
    api_base: Option<String>,

    /// Bearer token sent to the POS backend
    #[arg(long, requires = "api_base")]
    token: Option<String>,

    /// CSV file of scripted gateway answers (step,reference,text)
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Milliseconds between status checks
    #[arg(long, default_value_t = 5000)]
    poll_interval_ms: u64,

    /// Status checks before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_POLLS)]
    max_polls: u32,

    /// Milliseconds between confirmation and the proceed notification
    #[arg(long, default_value_t = 1800)]
    settle_delay_ms: u64,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[cfg(feature = "http-gateway")]
fn http_gateway(api_base: &str, token: Option<String>) -> Result<Option<GatewayBox>> {
    use stk_confirm::infrastructure::http::HttpGateway;

    let gateway = HttpGateway::new(api_base, token).into_diagnostic()?;
    Ok(Some(Arc::new(gateway)))
}

#[cfg(not(feature = "http-gateway"))]
fn http_gateway(_api_base: &str, _token: Option<String>) -> Result<Option<GatewayBox>> {
    warn!(
        "WARNING: Backend API requested via --api-base, but 'http-gateway' feature is not enabled. Falling back to the scenario gateway."
    );
    Ok(None)
}

fn build_gateway(cli: &Cli) -> Result<GatewayBox> {
    if let Some(api_base) = &cli.api_base
        && let Some(gateway) = http_gateway(api_base, cli.token.clone())?
    {
        return Ok(gateway);
    }

    let Some(path) = &cli.scenario else {
        return Err(miette!(
            "No payment gateway configured: pass --api-base or --scenario"
        ));
    };
    let file = File::open(path).into_diagnostic()?;
    let steps = ScenarioReader::new(file)
        .steps()
        .collect::<Result<Vec<_>, _>>()
        .into_diagnostic()?;
    Ok(Arc::new(ScriptedGateway::from_steps(steps)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let request =
        PaymentRequest::new(&cli.phone, cli.amount, cli.sale_ref.clone()).into_diagnostic()?;
    let config = ControllerConfig {
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        max_polls: cli.max_polls,
        elapsed_interval: DEFAULT_ELAPSED_INTERVAL,
        settle_delay: Duration::from_millis(cli.settle_delay_ms),
    };
    let ceiling_seconds = u32::try_from(config.ceiling().as_secs()).unwrap_or(u32::MAX);
    let gateway = build_gateway(&cli)?;

    let (ui, mut events) = ChannelUi::new();
    let handle = PaymentController::spawn(gateway, Arc::new(ui), config).into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = SessionWriter::new(stdout.lock());

    let initiated = handle.initiate(request).await;
    if let Err(e) = initiated {
        while let Ok(event) = events.try_recv() {
            if let UiEvent::Rendered(view) = event {
                writer.write_view(&view).into_diagnostic()?;
            }
        }
        handle.teardown().await.into_diagnostic()?;
        return Err(e).into_diagnostic();
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(UiEvent::Rendered(view)) => {
                    debug!(
                        state = %view.state,
                        progress = view.progress(ceiling_seconds),
                        "Session updated"
                    );
                    writer.write_view(&view).into_diagnostic()?;
                    if let Some(e) = view.outcome_error() {
                        break Err(e);
                    }
                }
                Some(UiEvent::Proceed(view)) => break Ok(view),
                Some(UiEvent::Error(message)) => warn!("{}", message),
                None => break Err(PaymentError::ControllerClosed),
            },
            _ = &mut ctrl_c => {
                handle.cancel().await.into_diagnostic()?;
                break Err(PaymentError::Cancelled);
            }
        }
    };

    handle.teardown().await.into_diagnostic()?;
    let view = outcome.into_diagnostic()?;
    info!(receipt = ?view.receipt_reference, "Payment complete");
    Ok(())
}
