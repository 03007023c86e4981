use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::env::parse_env;
use crate::{Error, Result};

pub const DEFAULT_STOP_WAIT_SECS: u64 = 15;
pub const DEFAULT_STOP_SIGNAL: &str = "TERM";
pub const DEFAULT_SUCCESS_EXIT_CODE: i32 = 0;
pub const DEFAULT_STD_LOG_COUNT: u32 = 48;
pub const DEFAULT_STD_LOG_SIZE: &str = "1G";

/// One supervised child, as declared in the config file. A Process clones
/// its own copy at creation; the file copy is only touched by reload and
/// add_process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub env: HashMap<String, String>,
    pub pid_file: String,
    pub exit_codes: Vec<i32>,
    pub stop_signal: String,
    pub stop_wait_secs: u64,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub purge_files: Vec<String>,
    pub std_log_count: u32,
    pub std_log_size: String,
    #[serde(rename = "user", skip_serializing_if = "String::is_empty")]
    pub sys_user: String,
    #[serde(rename = "group", skip_serializing_if = "String::is_empty")]
    pub sys_group: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub omit_exit_code: bool,
}

impl ProcessConfig {
    /// Build a config from a `<name> <command> [args...]` command line.
    /// A bare command string with no args is split shell-style.
    pub fn from_command_line(name: &str, command: &str, args: Vec<String>) -> Self {
        let (command, args) = if args.is_empty() {
            match shell_words::split(command) {
                Ok(parts) if !parts.is_empty() => {
                    let command = parts[0].clone();
                    (command, parts.into_iter().skip(1).collect())
                }
                _ => (command.to_string(), args),
            }
        } else {
            (command.to_string(), args)
        };
        Self {
            name: name.to_string(),
            command,
            args,
            ..Self::default()
        }
    }

    pub fn fill_defaults(&mut self) -> &mut Self {
        if self.stdout.is_empty() && self.stderr.is_empty() {
            self.stdout = vec!["/dev/stdout".to_string()];
            self.stderr = vec!["/dev/stderr".to_string()];
        } else if self.stdout.is_empty() {
            self.stdout = self.stderr.clone();
        } else if self.stderr.is_empty() {
            self.stderr = self.stdout.clone();
        }
        if self.exit_codes.is_empty() {
            self.exit_codes = vec![DEFAULT_SUCCESS_EXIT_CODE];
        }
        if self.cwd.is_empty() {
            self.cwd = std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
        }
        if self.stop_signal.is_empty() {
            self.stop_signal = DEFAULT_STOP_SIGNAL.to_string();
        }
        if self.stop_wait_secs == 0 {
            self.stop_wait_secs = DEFAULT_STOP_WAIT_SECS;
        }
        if self.std_log_count == 0 {
            self.std_log_count = DEFAULT_STD_LOG_COUNT;
        }
        if self.std_log_size.is_empty() {
            self.std_log_size = DEFAULT_STD_LOG_SIZE.to_string();
        }
        self
    }

    /// Apply one `-supvr.<key> <value>` command-line override.
    pub fn apply_flag(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "cwd" => self.cwd = value.trim().to_string(),
            "env" => self.env = parse_env(value).as_map(),
            "pid" => self.pid_file = value.trim().to_string(),
            "exitcodes" => self.exit_codes = parse_int_list(value)?,
            "stopsig" => self.stop_signal = value.trim().to_string(),
            "stop_wait_secs" => self.stop_wait_secs = parse_num(value)?,
            "stdout" => self.stdout = parse_str_list(value),
            "stderr" => self.stderr = parse_str_list(value),
            "purge_files" => self.purge_files = parse_str_list(value),
            "std_log_count" => self.std_log_count = parse_num(value)?,
            "std_log_size" => self.std_log_size = value.trim().to_string(),
            "user" => self.sys_user = value.trim().to_string(),
            "group" => self.sys_group = value.trim().to_string(),
            "omit_exit_code" => self.omit_exit_code = parse_bool(value)?,
            _ => return Err(Error::Config(format!("unknown process option {key}"))),
        }
        Ok(())
    }
}

/// Top-level supervisor configuration. TOML keys mirror the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub admin_listen: u16,
    pub admin_bind_ip: String,
    pub admin_sock: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log: String,
    pub process: Vec<ProcessConfig>,
    pub exit_when_all_done: bool,
    pub enable_log_finalizer: bool,
    pub daemonize: bool,
    pub reap_zombie: bool,
    pub hide_args: bool,
    pub disable_rce: bool,
}

impl SupervisorConfig {
    pub fn is_blank(&self) -> bool {
        *self == Self::default()
    }

    pub fn exist_process(&self, name: &str) -> bool {
        self.process.iter().any(|p| p.name == name)
    }

    /// Replace the config with the same name, or append.
    pub fn add_process_config(&mut self, proc: ProcessConfig) {
        if let Some(slot) = self.process.iter_mut().find(|p| p.name == proc.name) {
            *slot = proc;
        } else {
            self.process.push(proc);
        }
    }

    /// The address the admin server binds: `unix://<path>`, or `[ip]:port`.
    pub fn admin_listen_addr(&self) -> String {
        if !self.admin_sock.is_empty() {
            return format!("unix://{}", self.admin_sock);
        }
        if self.admin_bind_ip.is_empty() {
            return format!(":{}", self.admin_listen);
        }
        format!("{}:{}", self.admin_bind_ip, self.admin_listen)
    }

    /// The address clients dial. A blank bind IP dials localhost; a socket
    /// path is made absolute.
    pub fn admin_dial_addr(&self) -> String {
        if !self.admin_sock.is_empty() {
            return std::path::absolute(&self.admin_sock)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| self.admin_sock.clone());
        }
        if self.admin_bind_ip.is_empty() {
            return format!("localhost:{}", self.admin_listen);
        }
        format!("{}:{}", self.admin_bind_ip, self.admin_listen)
    }

    pub fn admin_dial_protocol(&self) -> &'static str {
        if self.admin_sock.is_empty() { "tcp" } else { "unix" }
    }

    /// Make sure the config names an admin endpoint, picking a free TCP
    /// port when neither a port nor a socket path was given.
    pub fn ensure_admin_addr(&mut self) -> Result<()> {
        if self.admin_listen == 0 && self.admin_sock.is_empty() {
            self.admin_listen = pick_free_port()?;
        }
        Ok(())
    }

    pub fn apply_flag(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "adminlisten" => self.admin_listen = parse_num(value)?,
            "admin_bind_ip" => self.admin_bind_ip = value.trim().to_string(),
            "admin_sock" => self.admin_sock = value.trim().to_string(),
            "log" => self.log = value.trim().to_string(),
            "exit_when_all_done" => self.exit_when_all_done = parse_bool(value)?,
            "enable_log_finalizer" => self.enable_log_finalizer = parse_bool(value)?,
            "daemonize" => self.daemonize = parse_bool(value)?,
            "reap_zombie" => self.reap_zombie = parse_bool(value)?,
            "hide_args" => self.hide_args = parse_bool(value)?,
            "disable_rce" => self.disable_rce = parse_bool(value)?,
            _ => return Err(Error::Config(format!("unknown supervisor option {key}"))),
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}

fn pick_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

fn parse_num<T: std::str::FromStr>(value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("bad number {value}")))
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("bad bool {value}")))
}

fn parse_int_list(value: &str) -> Result<Vec<i32>> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(parse_num)
        .collect()
}

fn parse_str_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_defaults() {
        let mut cfg = ProcessConfig {
            name: "svc".into(),
            command: "/bin/true".into(),
            ..Default::default()
        };
        cfg.fill_defaults();
        assert_eq!(cfg.stdout, vec!["/dev/stdout"]);
        assert_eq!(cfg.stderr, vec!["/dev/stderr"]);
        assert_eq!(cfg.exit_codes, vec![0]);
        assert_eq!(cfg.stop_signal, "TERM");
        assert_eq!(cfg.stop_wait_secs, 15);
        assert_eq!(cfg.std_log_count, 48);
        assert_eq!(cfg.std_log_size, "1G");
        assert!(!cfg.cwd.is_empty());
    }

    #[test]
    fn test_stop_wait_zero_uses_default() {
        let mut cfg = ProcessConfig {
            stop_wait_secs: 0,
            ..Default::default()
        };
        cfg.fill_defaults();
        assert_eq!(cfg.stop_wait_secs, DEFAULT_STOP_WAIT_SECS);
    }

    #[test]
    fn test_stdio_mirroring() {
        let mut cfg = ProcessConfig {
            stdout: vec!["/tmp/out.log".into()],
            ..Default::default()
        };
        cfg.fill_defaults();
        assert_eq!(cfg.stderr, vec!["/tmp/out.log"]);

        let mut cfg = ProcessConfig {
            stderr: vec!["/tmp/err.log".into()],
            ..Default::default()
        };
        cfg.fill_defaults();
        assert_eq!(cfg.stdout, vec!["/tmp/err.log"]);
    }

    #[test]
    fn test_command_line_splitting() {
        let cfg = ProcessConfig::from_command_line("web", "/bin/server --port 80", vec![]);
        assert_eq!(cfg.command, "/bin/server");
        assert_eq!(cfg.args, vec!["--port", "80"]);

        let cfg =
            ProcessConfig::from_command_line("web", "/bin/server", vec!["--port".into()]);
        assert_eq!(cfg.command, "/bin/server");
        assert_eq!(cfg.args, vec!["--port"]);
    }

    #[test]
    fn test_add_process_config_replaces_by_name() {
        let mut cnf = SupervisorConfig::default();
        cnf.add_process_config(ProcessConfig {
            name: "a".into(),
            command: "/bin/true".into(),
            ..Default::default()
        });
        cnf.add_process_config(ProcessConfig {
            name: "b".into(),
            command: "/bin/true".into(),
            ..Default::default()
        });
        cnf.add_process_config(ProcessConfig {
            name: "a".into(),
            command: "/bin/false".into(),
            ..Default::default()
        });
        assert_eq!(cnf.process.len(), 2);
        assert_eq!(cnf.process[0].command, "/bin/false");
        assert!(cnf.exist_process("b"));
        assert!(!cnf.exist_process("c"));
    }

    #[test]
    fn test_admin_addrs() {
        let mut cnf = SupervisorConfig {
            admin_listen: 9001,
            ..Default::default()
        };
        assert_eq!(cnf.admin_listen_addr(), ":9001");
        assert_eq!(cnf.admin_dial_addr(), "localhost:9001");
        assert_eq!(cnf.admin_dial_protocol(), "tcp");

        cnf.admin_bind_ip = "127.0.0.1".into();
        assert_eq!(cnf.admin_listen_addr(), "127.0.0.1:9001");
        assert_eq!(cnf.admin_dial_addr(), "127.0.0.1:9001");

        cnf.admin_sock = "/tmp/overseer.sock".into();
        assert_eq!(cnf.admin_listen_addr(), "unix:///tmp/overseer.sock");
        assert_eq!(cnf.admin_dial_addr(), "/tmp/overseer.sock");
        assert_eq!(cnf.admin_dial_protocol(), "unix");
    }

    #[test]
    fn test_ensure_admin_addr_picks_port() {
        let mut cnf = SupervisorConfig::default();
        cnf.ensure_admin_addr().unwrap();
        assert_ne!(cnf.admin_listen, 0);

        let mut cnf = SupervisorConfig {
            admin_sock: "/tmp/x.sock".into(),
            ..Default::default()
        };
        cnf.ensure_admin_addr().unwrap();
        assert_eq!(cnf.admin_listen, 0);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut cnf = SupervisorConfig {
            admin_listen: 8801,
            log: "/var/log/overseer.log".into(),
            exit_when_all_done: true,
            disable_rce: true,
            ..Default::default()
        };
        let mut p = ProcessConfig {
            name: "svc".into(),
            command: "/bin/sleep".into(),
            args: vec!["30".into()],
            env: HashMap::from([("K".to_string(), "v".to_string())]),
            exit_codes: vec![0, 2],
            ..Default::default()
        };
        p.fill_defaults();
        cnf.process.push(p);

        let text = cnf.to_toml().unwrap();
        let back = SupervisorConfig::from_toml(&text).unwrap();
        assert_eq!(cnf, back);
    }

    #[test]
    fn test_is_blank() {
        assert!(SupervisorConfig::default().is_blank());
        let cnf = SupervisorConfig {
            admin_listen: 1,
            ..Default::default()
        };
        assert!(!cnf.is_blank());
    }

    #[test]
    fn test_apply_flags() {
        let mut p = ProcessConfig::default();
        p.apply_flag("exitcodes", "0,1,2").unwrap();
        assert_eq!(p.exit_codes, vec![0, 1, 2]);
        p.apply_flag("env", "A=1,B=2").unwrap();
        assert_eq!(p.env.get("A").map(String::as_str), Some("1"));
        assert!(p.apply_flag("bogus", "x").is_err());

        let mut s = SupervisorConfig::default();
        s.apply_flag("adminlisten", "9001").unwrap();
        s.apply_flag("exit_when_all_done", "true").unwrap();
        assert_eq!(s.admin_listen, 9001);
        assert!(s.exit_when_all_done);
        assert!(s.apply_flag("adminlisten", "no").is_err());
    }
}
