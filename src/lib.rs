pub mod config;
pub mod executor;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export common types for convenience
pub use config::*;
pub use executor::*;
pub use model::*;
pub use traits::*;
