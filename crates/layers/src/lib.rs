pub mod appearance;
pub mod cache;
pub mod computed;
pub mod layer;
pub mod prepare;
pub mod resolver;

pub use appearance::*;
pub use cache::*;
pub use computed::*;
pub use layer::*;
pub use prepare::*;
pub use resolver::*;
