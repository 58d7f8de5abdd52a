pub mod catalog;
pub mod error;
pub mod selector;
pub mod types;

pub use error::{Result, ScorecardError};
