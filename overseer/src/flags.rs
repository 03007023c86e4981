//! The `-supvr.<key> <value>` override grammar shared by `start` and
//! `add-proc`: leading pairs configure the supervisor (or the added
//! process), everything after the first non-flag token is
//! `<name> [per-process pairs] <cmd> [args...]`.

use anyhow::bail;
use std::collections::HashMap;

use overseer_core::ProcessConfig;

pub const FLAG_PREFIX: &str = "-supvr.";

pub fn extract_supervisor_flags(args: &[String]) -> (HashMap<String, String>, &[String]) {
    let mut flags = HashMap::new();
    let mut i = 0;
    while i + 1 < args.len() && args[i].starts_with(FLAG_PREFIX) {
        flags.insert(
            args[i].trim_start_matches(FLAG_PREFIX).to_string(),
            args[i + 1].clone(),
        );
        i += 2;
    }
    (flags, &args[i..])
}

/// Parse `<name> [-supvr.k v ...] <cmd> [args...]` into a process config
/// with defaults filled.
pub fn parse_process_spec(args: &[String]) -> anyhow::Result<ProcessConfig> {
    if args.len() < 2 {
        bail!("parse process args fail: need <name> <cmd>, got {args:?}");
    }
    let name = &args[0];
    let (flags, rest) = extract_supervisor_flags(&args[1..]);
    if rest.is_empty() {
        bail!("parse process args fail: no command in {args:?}");
    }
    let mut config =
        ProcessConfig::from_command_line(name, &rest[0], rest[1..].to_vec());
    for (key, value) in &flags {
        config.apply_flag(key, value)?;
    }
    config.fill_defaults();
    Ok(config)
}
