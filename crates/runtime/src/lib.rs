pub mod event_bus;
pub mod pool;
pub mod work_queue;

pub use event_bus::*;
pub use pool::*;
pub use work_queue::*;
