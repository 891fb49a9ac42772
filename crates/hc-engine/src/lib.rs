//! hc-engine: Processing graph and multi-threaded scheduler for Helicon
//!
//! Turns the project model from `hc-core` into an executable DAG and runs
//! it once per audio callback:
//!
//! - [`GraphBuilder`] snapshots the project into a [`Graph`] of nodes
//!   (ports, plugins, faders, sends, track processors, timing)
//! - [`GraphScheduler`] drains the graph over a worker-thread pool in
//!   dependency order
//! - [`Router`] owns the active graph, gates it against rebuilds, and
//!   carries the latency-compensation state (route latencies, preroll)

mod builder;
mod graph;
mod node;
mod router;
mod scheduler;

pub use builder::GraphBuilder;
pub use graph::Graph;
pub use node::{GraphNode, NodeKey, NodeOwner};
pub use router::Router;
pub use scheduler::GraphScheduler;
