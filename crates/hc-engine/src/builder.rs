//! Graph construction from the live project
//!
//! The builder walks the project once and emits a node per schedulable
//! unit: one per port, one per port owner (track processor, plugin slot,
//! fader, send) and the three timing nodes. Edges come from two places:
//! each owner's input ports feed the owner and the owner feeds its output
//! ports, and every enabled entry of the connection table links its source
//! port's node to its destination port's node.

use std::collections::HashMap;
use std::sync::Arc;

use hc_core::{PortId, PortRef, Project};

use crate::graph::Graph;
use crate::node::{GraphNode, NodeKey, NodeOwner};

#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<GraphNode>,
    port_nodes: HashMap<PortId, NodeKey>,
}

impl GraphBuilder {
    /// Snapshot `project` into a new graph
    pub fn build(project: &Project) -> Graph {
        let mut builder = Self::default();

        let tempo_node = builder.add_node(NodeOwner::Tempo(project.tempo_map.clone()));
        let beats_per_bar_node =
            builder.add_node(NodeOwner::BeatsPerBar(project.tempo_map.clone()));
        let beat_unit_node = builder.add_node(NodeOwner::BeatUnit(project.tempo_map.clone()));

        for track in project.tracks.iter() {
            {
                let processor = track.processor.read();
                let key = builder.add_node(NodeOwner::TrackProcessor(track.processor.clone()));
                builder.add_owner_ports(key, [&processor.ins.l, &processor.ins.r], [&processor.outs.l, &processor.outs.r]);
            }
            for slot in track.channel.slots() {
                let key = builder.add_node(NodeOwner::Plugin(Arc::new(slot.clone())));
                builder.add_owner_ports(key, [&slot.ins.l, &slot.ins.r], [&slot.outs.l, &slot.outs.r]);
            }
            {
                let fader = track.channel.fader.read();
                let key = builder.add_node(NodeOwner::Fader(track.channel.fader.clone()));
                builder.add_owner_ports(key, [&fader.ins.l, &fader.ins.r], [&fader.outs.l, &fader.outs.r]);
            }
            for send in &track.channel.sends {
                let guard = send.read();
                let key = builder.add_node(NodeOwner::Send(send.clone()));
                builder.add_owner_ports(key, [&guard.ins.l, &guard.ins.r], [&guard.outs.l, &guard.outs.r]);
            }
        }

        for conn in project.connections.iter() {
            if !conn.enabled {
                continue;
            }
            // A connection to a port the project no longer owns would have
            // been removed with that port; both lookups must succeed.
            if let (Some(&src), Some(&dst)) = (
                builder.port_nodes.get(&conn.src),
                builder.port_nodes.get(&conn.dst),
            ) {
                builder.add_edge(src, dst);
            } else {
                log::error!("connection {:?} -> {:?} references an unknown port", conn.src, conn.dst);
            }
        }

        let graph = Graph::new(builder.nodes, tempo_node, beats_per_bar_node, beat_unit_node);
        log::debug!("built {graph:?}");
        graph
    }

    fn add_node(&mut self, owner: NodeOwner) -> NodeKey {
        let key = NodeKey(self.nodes.len());
        self.nodes.push(GraphNode::new(key, owner));
        key
    }

    fn add_port_node(&mut self, port: &PortRef) -> NodeKey {
        let id = port.read().id();
        if let Some(&key) = self.port_nodes.get(&id) {
            return key;
        }
        let key = self.add_node(NodeOwner::Port(port.clone()));
        self.port_nodes.insert(id, key);
        key
    }

    /// Port nodes around an owner: inputs feed the owner, the owner feeds
    /// its outputs
    fn add_owner_ports(&mut self, owner: NodeKey, ins: [&PortRef; 2], outs: [&PortRef; 2]) {
        for port in ins {
            let key = self.add_port_node(port);
            self.add_edge(key, owner);
        }
        for port in outs {
            let key = self.add_port_node(port);
            self.add_edge(owner, key);
        }
    }

    fn add_edge(&mut self, from: NodeKey, to: NodeKey) {
        self.nodes[from.index()].childnodes.push(to);
        self.nodes[to.index()].parentnodes.push(from);
    }
}
