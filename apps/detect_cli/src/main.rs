use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{
    select_image, AnalysisSession, DetectClient, DisplayState, DEFAULT_SERVER_URL,
};
use tracing_subscriber::EnvFilter;

/// Submit a blood-smear image to the detection relay and print the verdict.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    server_url: String,
    /// PNG, JPEG or WebP image to analyze.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Overall request timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let client = match DetectClient::with_timeout(
        &args.server_url,
        Duration::from_secs(args.timeout_secs.max(1)),
    ) {
        Ok(client) => client,
        Err(error) => bail!(error.user_message()),
    };
    let session = AnalysisSession::new(client);

    let selected = match &args.image {
        Some(path) => match select_image(path).await {
            Ok(selected) => Some(selected),
            Err(error) => {
                tracing::debug!(%error, "image selection failed");
                bail!(error.user_message());
            }
        },
        None => None,
    };
    if let Some(selected) = &selected {
        println!("Analyzing {}...", selected.file_name);
    }

    match session
        .analyze(selected.as_ref().map(|selected| &selected.payload))
        .await
    {
        Some(DisplayState::Result(label)) => {
            println!("{label}");
            Ok(())
        }
        Some(DisplayState::Error(message)) => bail!(message),
        None => bail!("an analysis is already in progress"),
    }
}
