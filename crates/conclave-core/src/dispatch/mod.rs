//! Dispatcher: target resolution, constrained invocation, delegation and
//! bot status.

pub mod dispatcher;
pub mod invoker;
pub mod mentions;
pub mod status;

pub use dispatcher::{DEFAULT_MAX_TASKS, DispatchSettings, Dispatcher};
pub use invoker::{BotInvoker, BotOutputStream, BoxToolExecutor, NoTools, ToolExecutor, UnavailableInvoker};
pub use status::StatusBoard;
