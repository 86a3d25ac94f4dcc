use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use nichelens_lib::config::{ServiceConfig, APP_NAME, APP_VERSION};
use nichelens_lib::research_service::{ResearchRequest, ResearchService};
use nichelens_lib::pipeline::research::RunStatus;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Find trending product niches and keywords for a market research question.
#[derive(Parser, Debug)]
#[command(name = "nichelens", version, about)]
struct Cli {
    /// Run a deep search (two sub-queries, more evidence, expansion)
    #[arg(long)]
    deep: bool,

    /// Target market, e.g. US or DE
    #[arg(long)]
    market: Option<String>,

    /// Output language, e.g. en or de
    #[arg(long)]
    language: Option<String>,

    /// Topic used for the market sub-query (defaults to the query)
    #[arg(long)]
    topic: Option<String>,

    /// The research question
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    nichelens_lib::init_tracing();
    let cli = Cli::parse();
    tracing::info!("{} v{}", APP_NAME, APP_VERSION);

    let config = ServiceConfig::from_env();
    let service = match ResearchService::from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let mut request = ResearchRequest::new(&cli.query.join(" "));
    if cli.deep {
        request = request.deep();
    }
    request.market = cli.market;
    request.language = cli.language;
    request.topic = cli.topic;

    let receipt = match service.submit(&request) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let run = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(run_id = %receipt.run_id, "Interrupted, cancelling run");
                if let Err(e) = service.cancel(receipt.run_id) {
                    eprintln!("error: {e}");
                }
                service.shutdown();
                service.wait_idle().await;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        match service.get(receipt.run_id) {
            Ok(Some(run)) if run.status.is_terminal() => break run,
            Ok(_) => continue,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    };
    service.shutdown();

    match serde_json::to_string_pretty(&run) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    }

    if run.status == RunStatus::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
