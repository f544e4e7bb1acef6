//! Filter tree parsing and compilation.

mod compiler;
mod node;
mod operators;

pub use compiler::{compile, CompiledFilter};
pub use node::{FilterNode, LogicOp};
pub use operators::{builtin_builder, is_builtin_builder, JsonbContains, LowerEquals, Operator, PredicateBuilder};
