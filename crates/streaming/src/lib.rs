pub mod cache;
pub mod loader;
pub mod residency;
pub mod source;
pub mod tabular;

pub use cache::*;
pub use loader::*;
pub use residency::*;
pub use source::*;
pub use tabular::*;
