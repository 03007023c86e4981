pub mod add_proc;
pub mod exec;
pub mod reload;
pub mod service;
pub mod shutdown;
pub mod start;
