//! CLI command implementations.

pub mod compact;
pub mod fetch;
pub mod inspect;
pub mod queue;
pub mod replay;

use bistro_offline::{ClientConfig, HttpApi, OfflineClient, RestaurantApi};
use bistro_offline::network::ReqwestTransport;
use bistro_storage::FileLog;
use bistro_store::{Engine, EngineConfig};
use std::path::Path;
use std::sync::Arc;

/// Starts an engine over an existing journal.
pub fn open_engine(journal: &Path) -> Result<Engine, Box<dyn std::error::Error>> {
    if !journal.exists() {
        return Err(format!("No journal found at {:?}", journal).into());
    }
    Ok(Engine::start(EngineConfig::new().journal(FileLog::open(journal)?))?)
}

/// Starts an engine over a journal, creating it if needed, and opens a
/// client talking to the configured API.
pub async fn open_client(journal: &Path, config: ClientConfig) -> Result<OfflineClient, Box<dyn std::error::Error>> {
    let engine = Engine::start(EngineConfig::new().journal(FileLog::open(journal)?))?;
    let api: Arc<dyn RestaurantApi> = Arc::new(HttpApi::new(
        config.base_url.clone(),
        ReqwestTransport::new(config.network_timeout)?,
    ));
    Ok(OfflineClient::open(&engine, api, config).await?)
}
