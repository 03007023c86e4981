use std::path::PathBuf;

use crate::cli::ServiceAction;
use crate::client::{admin_client, print_result};

pub async fn execute(config: Option<PathBuf>, action: ServiceAction) -> anyhow::Result<()> {
    let client = admin_client(config.as_ref())?;
    match action {
        ServiceAction::Start { name } => {
            print_result(&client.get(&one_or_all("/start", name.as_deref())).await?);
        }
        ServiceAction::Stop { name } => {
            print_result(&client.get(&one_or_all("/stop", name.as_deref())).await?);
        }
        ServiceAction::Restart { name } => {
            print_result(&client.get(&one_or_all("/restart", name.as_deref())).await?);
        }
        ServiceAction::OmitExitCode { name } => {
            print_result(
                &client
                    .get(&one_or_all("/omit_exit_code", name.as_deref()))
                    .await?,
            );
        }
        ServiceAction::Status { json } => {
            let path = if json { "/status?format=json" } else { "/status" };
            print_result(&client.get(path).await?);
        }
        ServiceAction::Env => {
            let body = client.get("/status?format=json").await?;
            let states: Vec<serde_json::Value> = serde_json::from_str(&body)?;
            for state in states {
                let name = state["config"]["name"].as_str().unwrap_or_default();
                println!("[{name}]");
                if let Some(env) = state["config"]["env"].as_object() {
                    for (key, value) in env {
                        println!("{key}={}", value.as_str().unwrap_or_default());
                    }
                }
            }
        }
    }
    Ok(())
}

fn one_or_all(path: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{path}?name={name}"),
        None => format!("{path}?all=true"),
    }
}
