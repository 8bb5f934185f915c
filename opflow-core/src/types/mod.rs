//! Strongly-typed identifiers.

mod ids;

pub use ids::{ClientId, RunnerId, TaskId, TokenId};
