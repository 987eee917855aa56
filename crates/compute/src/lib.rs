pub mod command;
pub mod config;
pub mod engine;
pub mod handle;
pub mod pool;
pub mod queue;
pub mod registry;

pub use command::*;
pub use config::*;
pub use engine::*;
pub use handle::*;
pub use pool::*;
pub use queue::*;
pub use registry::*;
