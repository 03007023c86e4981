use std::path::PathBuf;

use crate::cli::SpecArgs;
use crate::client::{admin_client, print_result};
use crate::flags::{extract_supervisor_flags, parse_process_spec};

pub async fn execute(config: Option<PathBuf>, args: SpecArgs) -> anyhow::Result<()> {
    let (flags, rest) = extract_supervisor_flags(&args.spec);
    let mut proc = parse_process_spec(rest)?;
    for (key, value) in &flags {
        proc.apply_flag(key, value)?;
    }
    let client = admin_client(config.as_ref())?;
    print_result(&client.post_json("/add_process", &proc).await?);
    Ok(())
}
