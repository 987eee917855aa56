pub mod feature;
pub mod range;
pub mod time;

// Foundation crate: small, well-tested primitives only.
pub use feature::*;
pub use range::*;
pub use time::*;
