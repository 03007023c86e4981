//! The `k1=v1,k2=v2` environment list format used by command-line overrides.
//!
//! A segment without `=` is not a new entry: it continues the previous
//! entry's value, so `PATH=/bin,/usr/bin` parses as one variable.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    pub val: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvList(pub Vec<EnvEntry>);

impl EnvList {
    pub fn as_map(&self) -> HashMap<String, String> {
        self.0
            .iter()
            .map(|e| (e.key.clone(), e.val.clone()))
            .collect()
    }

    pub fn drop(self, keys: &[&str]) -> Self {
        Self(self.0.into_iter().filter(|e| !keys.contains(&e.key.as_str())).collect())
    }
}

impl std::fmt::Display for EnvList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|e| format!("{}={}", e.key, e.val))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{joined}")
    }
}

pub fn parse_env(text: &str) -> EnvList {
    let mut list: Vec<EnvEntry> = Vec::new();
    for seg in text.split(',').filter(|s| !s.is_empty()) {
        if let Some((key, val)) = seg.split_once('=') {
            list.push(EnvEntry {
                key: key.to_string(),
                val: val.to_string(),
            });
        } else if let Some(last) = list.last_mut() {
            if last.val.is_empty() {
                last.val = seg.to_string();
            } else {
                last.val = format!("{},{}", last.val, seg);
            }
        } else {
            list.push(EnvEntry {
                key: seg.to_string(),
                val: String::new(),
            });
        }
    }
    EnvList(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let list = parse_env("A=1,B=2");
        assert_eq!(list.0.len(), 2);
        assert_eq!(list.0[0], EnvEntry { key: "A".into(), val: "1".into() });
        assert_eq!(list.0[1], EnvEntry { key: "B".into(), val: "2".into() });
    }

    #[test]
    fn test_parse_comma_continuation() {
        let list = parse_env("PATH=/bin,/usr/bin,HOME=/root");
        assert_eq!(list.0.len(), 2);
        assert_eq!(list.0[0].val, "/bin,/usr/bin");
        assert_eq!(list.0[1].key, "HOME");
    }

    #[test]
    fn test_round_trip_identity() {
        for text in ["A=1,B=2", "PATH=/bin,/usr/bin,HOME=/root", "K=", ""] {
            let list = parse_env(text);
            assert_eq!(list.to_string(), text, "string round trip of {text:?}");
            assert_eq!(parse_env(&list.to_string()), list);
        }
    }

    #[test]
    fn test_drop() {
        let list = parse_env("A=1,B=2,C=3").drop(&["B"]);
        assert_eq!(list.to_string(), "A=1,C=3");
    }

    #[test]
    fn test_as_map() {
        let map = parse_env("A=1,A=2").as_map();
        assert_eq!(map.get("A").map(String::as_str), Some("2"));
    }
}
