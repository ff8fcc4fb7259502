//! An incremental Rete network.  Hosts hand the engine compiled query
//! plans (trees of `rete_recipes::Recipe`); the engine turns every
//! distinct recipe into exactly one node, subscribes the input nodes
//! to a backing model, and keeps every query's result set up to date
//! as the model changes.
//!
//! Updates flow through the network as `(tuple, timestamp, diff)`
//! triples.  Timeless evaluation stamps everything with the neutral
//! timestamp; timely evaluation lets timestamps grow along recursive
//! derivations, which makes cyclic support visible and removes the
//! need for delete-and-rederive.
mod boundary;
mod compiler;
mod config;
mod engine;
mod error;
mod matcher;
mod model;
mod network;
mod nodes;
mod timeline;
mod update;

#[cfg(test)]
mod reference;

pub use compiler::HintConfigurator;
pub use compiler::PlanRegistry;
pub use compiler::QueryCompiler;
pub use compiler::QueryHints;
pub use config::AggregatorArchitecture;
pub use config::EngineConfig;
pub use config::EnginePreset;
pub use config::TimelineRepresentation;
pub use config::TimelyConfiguration;
pub use engine::EngineState;
pub use engine::ReteEngine;
pub use error::ReteError;
pub use error::ReteResult;
pub use matcher::ListenerTag;
pub use matcher::MatchUpdateListener;
pub use matcher::PatternMatcher;
pub use model::BackingModel;
pub use model::Disconnectable;
pub use model::MemoryModel;
pub use model::ModelListener;
pub use timeline::Timeline;
pub use update::Direction;
pub use update::Interval;
pub use update::Timestamp;
pub use update::NEUTRAL;

pub use rete_recipes::AggregateOperator;
pub use rete_recipes::BinaryOp;
pub use rete_recipes::CompiledQuery;
pub use rete_recipes::EvalError;
pub use rete_recipes::Expression;
pub use rete_recipes::InputKey;
pub use rete_recipes::KeyKind;
pub use rete_recipes::QueryId;
pub use rete_recipes::Recipe;
pub use rete_recipes::RecipeRef;
pub use rete_recipes::Seed;
pub use rete_recipes::Tuple;
pub use rete_recipes::TupleMask;
pub use rete_recipes::Value;
