//! Global port-to-port connection table
//!
//! Storage only: validation (existence, direction, cycle rejection) happens
//! in [`crate::Project`], which also keeps each destination port's source
//! list in sync with this table.

use serde::{Deserialize, Serialize};

use crate::PortId;

/// A directed port connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConnection {
    pub src: PortId,
    pub dst: PortId,
    /// Disabled connections stay in the table but carry no signal and
    /// produce no graph edge
    pub enabled: bool,
    /// Locked connections are the fixed intra-channel wiring (processor →
    /// slots → fader → sends) that user edits cannot remove directly
    pub locked: bool,
}

/// The project-wide connection set
#[derive(Debug, Default)]
pub struct PortConnectionTable {
    connections: Vec<PortConnection>,
}

impl PortConnectionTable {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PortConnection> {
        self.connections.iter()
    }

    pub fn contains(&self, src: PortId, dst: PortId) -> bool {
        self.connections
            .iter()
            .any(|c| c.src == src && c.dst == dst)
    }

    pub(crate) fn push(&mut self, conn: PortConnection) {
        self.connections.push(conn);
    }

    /// Flip a connection's enabled flag, returning its previous value
    pub(crate) fn set_enabled(&mut self, src: PortId, dst: PortId, enabled: bool) -> Option<bool> {
        let conn = self
            .connections
            .iter_mut()
            .find(|c| c.src == src && c.dst == dst)?;
        let prev = conn.enabled;
        conn.enabled = enabled;
        Some(prev)
    }

    pub(crate) fn remove(&mut self, src: PortId, dst: PortId) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c.src != src || c.dst != dst);
        self.connections.len() != before
    }

    /// Remove every connection touching `port`, returning the removed entries
    pub(crate) fn remove_touching(&mut self, port: PortId) -> Vec<PortConnection> {
        let (removed, kept) = self
            .connections
            .drain(..)
            .partition(|c| c.src == port || c.dst == port);
        self.connections = kept;
        removed
    }
}
