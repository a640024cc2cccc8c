mod config;
mod logging;

use channel_core::{CONNECTION_EVENT, ERROR_EVENT};
use channel_ws::{ChannelClient, Subscription};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::config::SmokeConfig;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let client = ChannelClient::with_config(config.channel.clone());
    let _subscriptions = subscribe_all(&client, &config.subscribe);

    let mut lifecycle = client.lifecycle();
    let lifecycle_task = tokio::spawn(async move {
        loop {
            match lifecycle.recv().await {
                Ok(event) => info!(?event, "lifecycle"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "lifecycle stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!(endpoint = %config.endpoint, "connecting");
    if let Err(err) = client.connect(&config.endpoint).await {
        eprintln!("Failed to connect to {}: {err}", config.endpoint);
        std::process::exit(1);
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
    }

    info!("shutting down");
    client.shutdown().await;
    lifecycle_task.abort();
}

fn subscribe_all(client: &ChannelClient, event_types: &[String]) -> Vec<Subscription> {
    let mut subscriptions = vec![
        client.subscribe(CONNECTION_EVENT, |payload: &Value| {
            info!(%payload, "connection status");
        }),
        client.subscribe(ERROR_EVENT, |payload: &Value| {
            warn!(%payload, "channel error");
        }),
    ];
    for kind in event_types {
        let event_type = kind.clone();
        subscriptions.push(client.subscribe(kind.clone(), move |payload: &Value| {
            info!(event_type = %event_type, %payload, "event");
        }));
    }
    subscriptions
}
