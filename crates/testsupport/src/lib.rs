//! Test support: isolated storage environments and row/expression
//! builders shared by the executor and session tests.

pub mod env;
pub mod fixtures;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::env::*;
    pub use crate::fixtures::*;
}
