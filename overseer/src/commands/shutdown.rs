use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;

use crate::client::admin_client;
use overseer_core::Error;

pub async fn execute(config: Option<PathBuf>, force: bool, clear: bool) -> anyhow::Result<()> {
    if !confirm(force)? {
        return Ok(());
    }
    let client = admin_client(config.as_ref())?;
    let path = format!("/shutdown?now={force}&clear={clear}");
    match client.get(&path).await {
        Ok(body) => {
            if body.is_empty() {
                println!("OK");
            } else {
                println!("{body}");
            }
            Ok(())
        }
        // the daemon may tear the connection down while answering
        Err(Error::Http(_)) => {
            println!("OK");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn confirm(force: bool) -> anyhow::Result<bool> {
    if force {
        return Ok(true);
    }
    print!("Stop all process and then exit supervisord? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let now = chrono::Local::now().format("%H:%M:%S");
    if answer.trim().eq_ignore_ascii_case("y") {
        println!("{now} {}", "Begin to shutdown supervisord".yellow());
        Ok(true)
    } else {
        println!("{now} {}", "Canceled".dimmed());
        Ok(false)
    }
}
