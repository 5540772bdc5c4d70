//! The composition and inference engine for latent tree models.
//!
//! This module provides:
//! - **variable**: Discrete variables, the name registry, and assignments
//! - **distribution**: Validated probability tables, factors, and soft evidence
//! - **node**: Hierarchy nodes and their local probability lookups
//! - **graph**: The owning forest arena and structural validation
//! - **expression**: Factored joints and conditional queries
//! - **joint**: Breadth-first tree-to-joint composition
//! - **session**: The immutable query surface over a composed tree
//! - **selection**: Likelihood scoring and best-tree selection
//! - **errors**: Error taxonomy for model failures

pub mod distribution;
pub mod errors;
pub mod expression;
pub mod graph;
pub mod joint;
pub mod node;
pub mod selection;
pub mod session;
pub mod variable;
