//! HTTP server command: `folio serve`.

use anyhow::Result;
use folio::config::FolioConfig;

pub async fn cmd_serve(config: FolioConfig) -> Result<()> {
    folio::server::start_server(config).await
}
