// Read-only queries over the structural graph

pub mod engine;

pub use engine::{MapQuery, MapScope, QueryEngine, RelationshipView, StructuralReport};
