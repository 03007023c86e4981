mod daemon_log;
mod rotation;
mod sink;
mod writer;

pub use daemon_log::{DaemonLogWriter, init_client_log, init_daemon_log};
pub use rotation::{LogRotation, RotationConfig, RotationPeriod};
pub use sink::{Sink, SinkPolicy, SinkSet, parse_max_log_size, pump};
pub use writer::RotatingLogWriter;
