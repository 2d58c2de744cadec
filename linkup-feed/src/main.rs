use crate::feed::{DEFAULT_PAGE_SIZE, FeedConfig, FeedError, FeedSession};
use linkup_client::client::{ClientConfig, ClientError, RestClient};
use linkup_common::util::{PageLimit, ZeroPageLimitError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

mod feed;

const LOAD_MORE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid page size: {0}")]
    PageSize(#[from] ZeroPageLimitError),
    #[error("Error building the backend client: {0}")]
    Client(#[from] ClientError),
    #[error("Error opening the feed session: {0}")]
    Feed(#[from] FeedError),
}

#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
struct Env {
    linkup_base_url: Url,
    linkup_api_key: String,
    linkup_access_token: String,
    linkup_user_id: u64,
    linkup_page_size: Option<u32>,
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "linkup_feed=debug,linkup_client=debug,linkup_common=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let page_size = PageLimit::try_from(env.linkup_page_size.unwrap_or(DEFAULT_PAGE_SIZE))?;
    let backend = Arc::new(RestClient::new(ClientConfig {
        base_url: env.linkup_base_url,
        api_key: env.linkup_api_key,
        access_token: env.linkup_access_token,
        user_id: env.linkup_user_id.into(),
    })?);

    let session = FeedSession::open(
        backend,
        FeedConfig {
            page_size,
            author: None,
        },
    )
    .await?;
    session.load_more().await?;

    let mut updates = session.updates();
    let mut load_more = tokio::time::interval(LOAD_MORE_INTERVAL);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for ctrl-c; shutting down");
                }
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                info!(
                    posts = snapshot.len(),
                    unread = session.unread_notifications(),
                    "Feed updated"
                );
            }
            _ = load_more.tick() => {
                if session.has_more()
                    && let Err(e) = session.load_more().await
                {
                    warn!(error = %e, "Page fetch failed; will retry");
                }
            }
        }
    }

    info!("Shutting down");
    session.close();
    Ok(())
}
