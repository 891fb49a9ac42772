//! The processing graph: an immutable DAG snapshot of the project
//!
//! A graph is built once per structural change and never mutated afterwards
//! (hard rebuilds swap in a whole new graph). The only writable state is
//! atomic: per-cycle refcounts, the skip flags, and the latency caches that
//! a soft rebuild refreshes in place.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::node::{GraphNode, NodeKey, NodeOwner};

pub struct Graph {
    nodes: Vec<GraphNode>,
    /// Initial nodes minus the timing nodes; enqueued to the workers at
    /// cycle start
    pub trigger_nodes: Vec<NodeKey>,
    /// Nodes with no consumers
    pub terminal_nodes: Vec<NodeKey>,
    pub tempo_node: NodeKey,
    pub beats_per_bar_node: NodeKey,
    pub beat_unit_node: NodeKey,
    max_route_playback_latency: AtomicU32,
}

impl Graph {
    /// Called by the builder with fully wired nodes. Derives the per-node
    /// templates (refcounts, initial/terminal flags), the trigger/terminal
    /// lists and the latency caches.
    pub(crate) fn new(
        mut nodes: Vec<GraphNode>,
        tempo_node: NodeKey,
        beats_per_bar_node: NodeKey,
        beat_unit_node: NodeKey,
    ) -> Self {
        for node in &mut nodes {
            node.init_refcount = node.parentnodes.len() as u32;
            node.initial = node.parentnodes.is_empty();
            node.terminal = node.childnodes.is_empty();
        }

        let trigger_nodes = nodes
            .iter()
            .filter(|n| n.initial && !n.owner.is_timing())
            .map(|n| n.key)
            .collect();
        let terminal_nodes = nodes.iter().filter(|n| n.terminal).map(|n| n.key).collect();

        let graph = Self {
            nodes,
            trigger_nodes,
            terminal_nodes,
            tempo_node,
            beats_per_bar_node,
            beat_unit_node,
            max_route_playback_latency: AtomicU32::new(0),
        };
        graph.update_latencies();
        debug_assert!(graph.is_acyclic(), "graph contains a cycle:\n{}", graph.dump());
        graph
    }

    #[inline]
    pub fn node(&self, key: NodeKey) -> &GraphNode {
        &self.nodes[key.index()]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn timing_nodes(&self) -> [NodeKey; 3] {
        [self.tempo_node, self.beats_per_bar_node, self.beat_unit_node]
    }

    pub fn max_route_playback_latency(&self) -> u32 {
        self.max_route_playback_latency.load(Ordering::Relaxed)
    }

    /// Arm every node's refcount for a new cycle
    pub fn reset_refcounts(&self) {
        for node in &self.nodes {
            node.refcount.store(node.init_refcount, Ordering::Release);
        }
    }

    /// Recompute playback latencies in place.
    ///
    /// Re-reads each owner's reported latency, then accumulates route
    /// latencies in topological order: a node's route latency is its own
    /// latency plus the largest route latency among its producers. This is
    /// the soft-rebuild path; node identities and edges are untouched.
    pub fn update_latencies(&self) {
        for node in &self.nodes {
            node.playback_latency
                .store(node.owner.single_playback_latency(), Ordering::Relaxed);
        }

        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.parentnodes.len()).collect();
        let mut queue: VecDeque<NodeKey> = self
            .nodes
            .iter()
            .filter(|n| n.parentnodes.is_empty())
            .map(|n| n.key)
            .collect();

        let mut max_route = 0;
        while let Some(key) = queue.pop_front() {
            let node = self.node(key);
            let inherited = node
                .parentnodes
                .iter()
                .map(|p| self.node(*p).route_playback_latency.load(Ordering::Relaxed))
                .max()
                .unwrap_or(0);
            let route = node.playback_latency.load(Ordering::Relaxed) + inherited;
            node.route_playback_latency.store(route, Ordering::Relaxed);
            max_route = max_route.max(route);

            for child in &node.childnodes {
                indegree[child.index()] -= 1;
                if indegree[child.index()] == 0 {
                    queue.push_back(*child);
                }
            }
        }

        self.max_route_playback_latency
            .store(max_route, Ordering::Relaxed);
    }

    /// Every node reachable from an initial node in a topological pass;
    /// holds exactly when the graph is a DAG
    fn is_acyclic(&self) -> bool {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.parentnodes.len()).collect();
        let mut queue: VecDeque<NodeKey> = self
            .nodes
            .iter()
            .filter(|n| n.parentnodes.is_empty())
            .map(|n| n.key)
            .collect();
        let mut visited = 0;
        while let Some(key) = queue.pop_front() {
            visited += 1;
            for child in &self.node(key).childnodes {
                indegree[child.index()] -= 1;
                if indegree[child.index()] == 0 {
                    queue.push_back(*child);
                }
            }
        }
        visited == self.nodes.len()
    }

    /// Multi-line description of every node, for logs
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "graph: {} nodes, {} triggers, {} terminals, max route latency {}",
            self.nodes.len(),
            self.trigger_nodes.len(),
            self.terminal_nodes.len(),
            self.max_route_playback_latency()
        );
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  [{}] {} (refs {}, latency {}/{}){}{}",
                node.key.index(),
                node.owner.name(),
                node.init_refcount,
                node.playback_latency.load(Ordering::Relaxed),
                node.route_playback_latency.load(Ordering::Relaxed),
                if node.initial { " initial" } else { "" },
                if node.terminal { " terminal" } else { "" },
            );
            for child in &node.childnodes {
                let _ = writeln!(out, "    -> [{}] {}", child.index(), self.node(*child).owner.name());
            }
        }
        out
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("num_nodes", &self.nodes.len())
            .field("trigger_nodes", &self.trigger_nodes.len())
            .field("terminal_nodes", &self.terminal_nodes.len())
            .field("max_route_playback_latency", &self.max_route_playback_latency())
            .finish()
    }
}
