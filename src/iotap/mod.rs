use anyhow::{Context, Result};
use engine_api::client::EngineApiClient;
use futures_util::StreamExt;

mod term_print;

use crate::cli::iotap::{Commands, IotapCliOpts};
use term_print::{PidList, TermPrintable};

pub async fn iotap_cli_run(options: &IotapCliOpts) -> Result<()> {
    log::trace!("iotap CLI Options: {:?}", options);

    let engine_api_client = if let Some(api_server) = &options.api_server {
        EngineApiClient::unix(api_server.clone())?
    } else {
        EngineApiClient::new()?
    };

    log::trace!("Command received: {:?}", options.command);

    match &options.command {
        Commands::Status => engine_api_client.status().await?.term_print(),
        Commands::Targets => PidList::targets(engine_api_client.targets().await?).term_print(),
        Commands::Add { pids } => {
            engine_api_client.add_targets(pids.clone()).await?;
            "Targets added, broadcast disabled".to_string().term_print()
        }
        Commands::Remove { pid } => {
            engine_api_client.remove_target(*pid).await?;
            "Target removed".to_string().term_print()
        }
        Commands::Clear => {
            engine_api_client.clear_targets().await?;
            "Targets cleared, broadcast disabled".to_string().term_print()
        }
        Commands::Broadcast { state } => {
            let enabled = bool::from(*state);
            engine_api_client.set_broadcast(enabled).await?;
            let state = if enabled { "enabled" } else { "disabled" };
            format!("Broadcast {state}").term_print()
        }
        Commands::Exclude { pids } => {
            engine_api_client.add_exclusions(pids.clone()).await?;
            "Exclusions added".to_string().term_print()
        }
        Commands::Include { pid } => {
            engine_api_client.remove_exclusion(*pid).await?;
            "Exclusion removed".to_string().term_print()
        }
        Commands::Exclusions => {
            PidList::exclusions(engine_api_client.exclusions().await?).term_print()
        }
        Commands::Monitor => {
            let mut stream = engine_api_client.event_monitor().await?;

            while let Some(ws_read) = stream.next().await {
                match ws_read {
                    Ok(event) => println!("{event:#}"),
                    Err(e) => return Err(e).context("error reading from websocket"),
                }
            }

            Err(anyhow::anyhow!("event stream ended"))
        }
    }?;

    Ok(())
}
