//! Path-expression evaluation over token data.
//!
//! A small textual grammar reads and writes arbitrarily nested fields of
//! process data: objects, arrays, maps, and lazily-retrieved persisted
//! entities. The engine uses it for parameter plumbing, the debugger for
//! inspection, and the script bridge for property paths.

mod eval;
mod parser;

pub use eval::Evaluator;
pub use parser::{parse, PathExpr, Segment, SegmentKind};

use crate::error::Result;
use crate::value::Value;
use bitflags::bitflags;

bitflags! {
    /// Error-strictness flags for read evaluation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GetFlags: u32 {
        /// A missing root object raises an error instead of yielding null.
        const OBJECT_MUST_EXIST = 1 << 0;
        /// A null or missing intermediate member raises an error instead of
        /// degrading the whole result to null.
        const MEMBER_MUST_EXIST = 1 << 1;
    }
}

bitflags! {
    /// Auto-vivification flags for write evaluation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetFlags: u32 {
        /// Instantiate a missing root object instead of failing.
        const CREATE_TOP_LEVEL_OBJECT = 1 << 0;
        /// Instantiate missing objects along the member path.
        const CREATE_INTERMEDIATE_OBJECTS = 1 << 1;
        /// Both creation flags.
        const CREATE_ALL_OBJECTS = Self::CREATE_TOP_LEVEL_OBJECT.bits()
            | Self::CREATE_INTERMEDIATE_OBJECTS.bits();
    }
}

/// Provider of id-based entity lookup for the `##` operator.
pub trait PersistenceContext: Send + Sync {
    /// Fetch the entity of the named type whose id is the given value.
    fn fetch(&self, type_name: &str, id: &Value) -> Result<Option<Value>>;
}
