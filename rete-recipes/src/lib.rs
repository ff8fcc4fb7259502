//! Compiled query plans are trees of recipes: canonical descriptions
//! of what each node of a Rete network computes.  The runtime never
//! sees the declarative queries themselves; a compiler lowers them to
//! recipes, and the runtime turns every distinct recipe into exactly
//! one node.
//!
//! This crate only defines the vocabulary shared by both sides of that
//! contract: the values and tuples that flow through the network, the
//! masks that project them, the keys that name external relations,
//! and the recipes themselves.
mod expression;
mod key;
mod mask;
mod recipe;
mod value;

pub use expression::BinaryOp;
pub use expression::EvalError;
pub use expression::Expression;
pub use key::InputKey;
pub use key::KeyKind;
pub use key::Seed;
pub use mask::TupleMask;
pub use recipe::AggregateOperator;
pub use recipe::CompiledQuery;
pub use recipe::QueryId;
pub use recipe::Recipe;
pub use recipe::RecipeRef;
pub use value::Tuple;
pub use value::Value;
