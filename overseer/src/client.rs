use anyhow::bail;
use std::path::PathBuf;
use std::sync::Arc;

use overseer_core::ConfigProvider;
use overseer_http::AdminClient;

/// Client-mode provider: read-only, prefers the running master's lock
/// copy of the config.
pub fn client_provider(config: Option<&PathBuf>) -> anyhow::Result<Arc<ConfigProvider>> {
    let provider = match config {
        Some(file) => ConfigProvider::from_file(file, false)?,
        None => ConfigProvider::new(false),
    };
    Ok(Arc::new(provider))
}

/// An admin client dialed from the effective config.
pub fn admin_client(config: Option<&PathBuf>) -> anyhow::Result<AdminClient> {
    let provider = client_provider(config)?;
    let cnf = provider.get_config();
    if cnf.is_blank() {
        bail!("no supervisor config found");
    }
    Ok(AdminClient::from_config(&cnf))
}

pub fn print_result(body: &str) {
    if !body.is_empty() {
        println!("{body}");
    }
}
