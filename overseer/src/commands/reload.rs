use std::path::PathBuf;

use crate::client::{admin_client, print_result};

pub async fn execute(config: Option<PathBuf>) -> anyhow::Result<()> {
    let client = admin_client(config.as_ref())?;
    print_result(&client.get("/reload").await?);
    Ok(())
}
