//! A distributed fast multipole method (FMM) engine for 3D N-body
//! interactions: recursive-bisection partitioning, local octree
//! construction, upward/downward expansion passes, and a dual tree
//! traversal exchanged across ranks via Local Essential Trees.
//!
//! The [`orchestrator::Solver`] ties every component together; individual
//! components (partitioner, tree builder, traversal, LET exchange) are
//! public so that callers needing finer control over a solve can compose
//! them directly, as the original's single-node and multi-node drivers do.

pub mod body;
pub mod cell;
pub mod comm;
pub mod config;
pub mod error;
pub mod expansion;
pub mod geometry;
pub mod kernel;
pub mod let_exchange;
pub mod logger;
pub mod morton;
pub mod orchestrator;
pub mod partition;
pub mod radix_sort;
pub mod traversal;
pub mod tree;
pub mod wire;

pub use body::{Bodies, Body};
pub use cell::{Cell, Cells};
pub use comm::{Comm, LocalComm};
#[cfg(feature = "mpi")]
pub use comm::MpiComm;
pub use config::{Config, ConfigBuilder};
pub use error::{ConfigError, FmmError};
pub use kernel::{DirectKernel, Kernel};
pub use orchestrator::Solver;
