//! Computation of the file set erased on a clear-log shutdown.

use crate::config::SupervisorConfig;

/// Collect the paths to purge: every stdio sink glob, declared purge files,
/// and the supervisor's own log glob, pruned of entries contained in a
/// longer entry.
pub fn collect_purge_files(cnf: &SupervisorConfig) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for p in &cnf.process {
        paths.extend(append_star(&p.stdout));
        paths.extend(append_star(&p.stderr));
        paths.extend(rewrite_purge_files(&p.purge_files));
    }
    paths.extend(append_star(std::slice::from_ref(&cnf.log)));

    paths.sort();
    paths.dedup();
    // Longest first: an entry can only be covered by a shorter one, so
    // pruning never has to look backwards.
    paths.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut ret = Vec::new();
    for i in 0..paths.len() {
        let covered = paths[i + 1..]
            .iter()
            .any(|broader| file_path_contains(broader, &paths[i]));
        if !covered {
            ret.push(paths[i].clone());
        }
    }
    ret
}

fn append_star(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .filter(|p| !p.is_empty() && p.as_str() != "/")
        .map(|p| format!("{p}*"))
        .collect()
}

fn rewrite_purge_files(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .filter(|p| !p.is_empty() && p.as_str() != "/")
        .map(|p| {
            if p.ends_with('/') {
                format!("{p}*")
            } else {
                p.clone()
            }
        })
        .collect()
}

/// Whether the tree matched by `a` contains everything matched by `b`.
/// Both sides may carry a trailing `*` glob.
pub fn file_path_contains(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let a_star = a.ends_with('*');
    let b_star = b.ends_with('*');
    let a = a.trim_end_matches('*');
    let b = b.trim_end_matches('*');
    let with_slash = |s: &str| {
        if s.ends_with('/') {
            s.to_string()
        } else {
            format!("{s}/")
        }
    };
    match (a_star, b_star) {
        (true, _) => b.starts_with(a),
        (false, _) => b.starts_with(&with_slash(a)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;

    fn assert_contains(a: &str, b: &str, expect: bool) {
        assert_eq!(file_path_contains(a, b), expect, "{a} contains {b}");
    }

    #[test]
    fn test_file_path_contains() {
        assert_contains("./log", "./log/stdout.log", true);
        assert_contains("./log", "./log/stdout.log*", true);
        assert_contains("./log*", "./log/stdout.log*", true);
        assert_contains("./log*", "./log/stdout.log", true);
        assert_contains("./log1", "./log12", false);
        assert_contains("./log1", "./log12*", false);
        assert_contains("./log1", "./log1*", false);
        assert_contains("./log1*", "./log1", true);
        assert_contains("./log1*", "./log1*", true);
        assert_contains("./log1", "./log1", true);
    }

    #[test]
    fn test_collect_rejects_only_empty_and_root() {
        let mut cnf = SupervisorConfig::default();
        let mut p = ProcessConfig {
            name: "svc".into(),
            command: "/bin/true".into(),
            purge_files: vec!["/".into(), "".into(), "/data/cache/".into()],
            ..Default::default()
        };
        p.fill_defaults(); // stdout/stderr default to the /dev/* sinks
        cnf.process.push(p);

        let files = collect_purge_files(&cnf);
        // device sinks glob like any other entry; only "" and "/" drop out
        assert_eq!(
            files,
            vec!["/data/cache/*", "/dev/stderr*", "/dev/stdout*"]
        );
    }

    #[test]
    fn test_collect_prunes_contained_entries() {
        let mut cnf = SupervisorConfig {
            log: "/var/log/ov/daemon.log".into(),
            ..Default::default()
        };
        cnf.process.push(ProcessConfig {
            name: "svc".into(),
            command: "/bin/true".into(),
            stdout: vec!["/var/log/ov/svc.log".into()],
            stderr: vec!["/var/log/ov/svc.log".into()],
            purge_files: vec!["/var/log/ov/".into()],
            ..Default::default()
        });

        let files = collect_purge_files(&cnf);
        // Everything lives under /var/log/ov/, so only the directory glob
        // survives.
        assert_eq!(files, vec!["/var/log/ov/*"]);
    }

    #[test]
    fn test_collect_uniques_shared_sinks() {
        let mut cnf = SupervisorConfig::default();
        for name in ["a", "b"] {
            cnf.process.push(ProcessConfig {
                name: name.into(),
                command: "/bin/true".into(),
                stdout: vec!["/tmp/shared.log".into()],
                stderr: vec!["/tmp/shared.log".into()],
                ..Default::default()
            });
        }
        let files = collect_purge_files(&cnf);
        assert_eq!(files, vec!["/tmp/shared.log*"]);
    }
}
