use std::path::PathBuf;

use crate::client::{admin_client, print_result};

/// Send a script file to the daemon's evaluator. A shebang first line
/// asks for stdout capture and is stripped before sending.
pub async fn execute(config: Option<PathBuf>, file: PathBuf) -> anyhow::Result<()> {
    let data = std::fs::read(&file)?;
    let capture = has_shebang(&data);
    let body = drop_shebang(data);

    let client = admin_client(config.as_ref())?;
    let output = client
        .post_raw(&format!("/command?capture_stdout={capture}"), body)
        .await?;
    print_result(&output);
    Ok(())
}

fn has_shebang(data: &[u8]) -> bool {
    data.len() > 2 && data[0] == b'#' && data[1] == b'!'
}

fn drop_shebang(data: Vec<u8>) -> Vec<u8> {
    if !has_shebang(&data) {
        return data;
    }
    match data.iter().position(|b| *b == b'\n') {
        Some(pos) => data[pos + 1..].to_vec(),
        None => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_shebang() {
        assert!(has_shebang(b"#!/usr/bin/env bash\necho hi\n"));
        assert!(!has_shebang(b"echo hi\n"));
        assert!(!has_shebang(b"#!"));
    }

    #[test]
    fn test_drop_shebang() {
        assert_eq!(
            drop_shebang(b"#!/bin/sh\necho hi\n".to_vec()),
            b"echo hi\n".to_vec()
        );
        assert_eq!(drop_shebang(b"echo hi\n".to_vec()), b"echo hi\n".to_vec());
        assert_eq!(drop_shebang(b"#!/bin/sh".to_vec()), b"#!/bin/sh".to_vec());
    }
}
