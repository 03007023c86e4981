use std::path::PathBuf;

use overseer_core::SupervisorConfig;

/// Where the admin surface lives: a TCP port or a filesystem socket.
/// The two are exclusive; a configured socket path wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAddr {
    Tcp { bind_ip: String, port: u16 },
    Unix { path: PathBuf },
}

impl AdminAddr {
    pub fn from_config(cnf: &SupervisorConfig) -> Self {
        if !cnf.admin_sock.is_empty() {
            return Self::Unix {
                path: PathBuf::from(&cnf.admin_sock),
            };
        }
        Self::Tcp {
            bind_ip: cnf.admin_bind_ip.clone(),
            port: cnf.admin_listen,
        }
    }

    /// The bind form: `ip:port` (0.0.0.0 for a blank IP) or the socket path.
    pub fn listen_addr(&self) -> String {
        match self {
            Self::Tcp { bind_ip, port } => {
                let ip = if bind_ip.is_empty() { "0.0.0.0" } else { bind_ip };
                format!("{ip}:{port}")
            }
            Self::Unix { path } => path.display().to_string(),
        }
    }

    /// The dial form: `localhost:port` for a blank bind IP, the absolute
    /// socket path otherwise.
    pub fn dial_addr(&self) -> String {
        match self {
            Self::Tcp { bind_ip, port } => {
                let host = if bind_ip.is_empty() || bind_ip == "0.0.0.0" {
                    "localhost"
                } else {
                    bind_ip
                };
                format!("{host}:{port}")
            }
            Self::Unix { path } => std::path::absolute(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
        }
    }
}

impl std::fmt::Display for AdminAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { .. } => write!(f, "tcp://{}", self.dial_addr()),
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_forms() {
        let addr = AdminAddr::Tcp {
            bind_ip: String::new(),
            port: 9001,
        };
        assert_eq!(addr.listen_addr(), "0.0.0.0:9001");
        assert_eq!(addr.dial_addr(), "localhost:9001");

        let addr = AdminAddr::Tcp {
            bind_ip: "10.0.0.2".into(),
            port: 9001,
        };
        assert_eq!(addr.listen_addr(), "10.0.0.2:9001");
        assert_eq!(addr.dial_addr(), "10.0.0.2:9001");
    }

    #[test]
    fn test_unix_wins_over_tcp() {
        let cnf = SupervisorConfig {
            admin_listen: 9001,
            admin_sock: "/tmp/ov.sock".into(),
            ..Default::default()
        };
        let addr = AdminAddr::from_config(&cnf);
        assert_eq!(
            addr,
            AdminAddr::Unix {
                path: PathBuf::from("/tmp/ov.sock")
            }
        );
        assert_eq!(addr.to_string(), "unix:///tmp/ov.sock");
    }
}
