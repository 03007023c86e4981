pub mod admin;
mod command;
pub mod evaluator;
mod panic_trace;
pub mod process;
pub mod reaper;
pub mod supervisor;

pub use admin::build_router;
pub use evaluator::{ScriptEvaluator, ShellEvaluator};
pub use process::{ExitCallback, Process, ProcessSnapshot, State};
pub use supervisor::{StopOption, Supervisord};
