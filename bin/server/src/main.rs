use blockflow_core::Result;
use blockflow_server::cli::{Cli, Command};
use blockflow_server::commands;
use blockflow_server::config::ServerConfig;
use blockflow_server::error::ServerError;
use blockflow_workflow::ExecutionStatus;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,blockflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config.as_deref()).map_err(|e| ServerError::Config {
        details: e.to_string(),
    })?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Serve => commands::serve(config).await,
        Command::Run { workflow, input } => {
            let input = commands::parse_input(input.as_deref())?;
            let outcome = commands::run_file(&config, &workflow, input).await?;
            let rendered =
                serde_json::to_string_pretty(&outcome).map_err(|e| ServerError::Run {
                    details: e.to_string(),
                })?;
            println!("{rendered}");

            if outcome.status == ExecutionStatus::Completed {
                Ok(())
            } else {
                Err(ServerError::Run {
                    details: format!(
                        "execution {} finished with status {}",
                        outcome.execution_id, outcome.status
                    ),
                }
                .into())
            }
        }
    }
}
