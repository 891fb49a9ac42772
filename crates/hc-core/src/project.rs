//! The live project: tracks, ports, connections, tempo
//!
//! This is the mutable state the user edits and the graph builder
//! snapshots. All mutation goes through `Project` so the port registry,
//! the connection table and each port's source list stay consistent, and
//! so no edit can introduce an audio-rate cycle (rejected here, before it
//! ever reaches the graph).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    BufferSize, Channel, ChannelSend, Fader, HcError, HcResult, PluginRef, PluginSlot, Port,
    PortConnection, PortConnectionTable, PortFlow, PortId, PortKind, PortRef, SampleRate,
    StereoPorts, TempoMap, Track, TrackId, TrackProcessor, Tracklist,
};

/// Creates ports and keeps the id → port map
#[derive(Debug)]
pub struct PortRegistry {
    next_id: u64,
    ports: HashMap<PortId, PortRef>,
    block_size: usize,
}

impl PortRegistry {
    pub fn new(block_size: usize) -> Self {
        Self {
            next_id: 1,
            ports: HashMap::new(),
            block_size,
        }
    }

    pub fn create_port(&mut self, name: impl Into<String>, kind: PortKind, flow: PortFlow) -> PortRef {
        let id = PortId(self.next_id);
        self.next_id += 1;
        let port = Arc::new(RwLock::new(Port::new(id, name, kind, flow, self.block_size)));
        self.ports.insert(id, port.clone());
        port
    }

    pub fn create_stereo(&mut self, prefix: &str, flow: PortFlow) -> StereoPorts {
        StereoPorts::new(
            self.create_port(format!("{prefix} L"), PortKind::Audio, flow),
            self.create_port(format!("{prefix} R"), PortKind::Audio, flow),
        )
    }

    pub fn get(&self, id: PortId) -> Option<&PortRef> {
        self.ports.get(&id)
    }

    pub fn remove(&mut self, id: PortId) -> Option<PortRef> {
        self.ports.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// The full editable project state
#[derive(Debug)]
pub struct Project {
    pub sample_rate: SampleRate,
    pub max_block_size: usize,
    pub tempo_map: Arc<TempoMap>,
    pub registry: PortRegistry,
    pub tracks: Tracklist,
    pub connections: PortConnectionTable,
    next_track_id: u64,
}

impl Project {
    pub fn new(sample_rate: SampleRate, buffer_size: BufferSize) -> Self {
        let block_size = buffer_size.as_usize();
        Self {
            sample_rate,
            max_block_size: block_size,
            tempo_map: Arc::new(TempoMap::new(sample_rate.as_f64())),
            registry: PortRegistry::new(block_size),
            tracks: Tracklist::new(),
            connections: PortConnectionTable::new(),
            next_track_id: 1,
        }
    }

    // ============ Track management ============

    /// Append a track with an empty channel; its processor output is wired
    /// to its fader through the locked chain.
    pub fn add_track(&mut self, name: impl Into<String>) -> TrackId {
        let name = name.into();
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;

        let proc_ins = self.registry.create_stereo(&format!("{name}/in"), PortFlow::Input);
        let proc_outs = self.registry.create_stereo(&format!("{name}/out"), PortFlow::Output);
        let fader_ins = self.registry.create_stereo(&format!("{name}/fader in"), PortFlow::Input);
        let fader_outs = self.registry.create_stereo(&format!("{name}/fader out"), PortFlow::Output);

        let processor = Arc::new(RwLock::new(TrackProcessor::new(proc_ins, proc_outs)));
        let fader = Arc::new(RwLock::new(Fader::new(fader_ins, fader_outs)));

        self.tracks.push(Track {
            id,
            name,
            processor,
            channel: Channel::new(fader),
            output: None,
        });
        self.rewire_track_chain(id);

        log::debug!("added track {id:?}");
        id
    }

    /// Remove a track along with all connections touching its ports
    pub fn remove_track(&mut self, id: TrackId) -> HcResult<()> {
        let track = self.tracks.remove(id).ok_or(HcError::TrackNotFound(id))?;

        let mut port_ids = Vec::new();
        collect_track_ports(&track, &mut port_ids);
        for pid in port_ids {
            for conn in self.connections.remove_touching(pid) {
                self.unlink_port_srcs(conn.src, conn.dst);
            }
            self.registry.remove(pid);
        }

        log::debug!("removed track {id:?}");
        Ok(())
    }

    /// Route a track's channel output to another track (or make it terminal)
    pub fn set_track_output(&mut self, id: TrackId, output: Option<TrackId>) -> HcResult<()> {
        if let Some(out) = output {
            if self.tracks.get(out).is_none() {
                return Err(HcError::TrackNotFound(out));
            }
            if out == id {
                return Err(HcError::InvalidConnection(
                    "track cannot output to itself".into(),
                ));
            }
        }

        let (fader_outs, old_output) = {
            let track = self.tracks.get(id).ok_or(HcError::TrackNotFound(id))?;
            (track.channel.fader.read().outs.clone(), track.output)
        };

        // Validate the new routing before unhooking anything, so a rejected
        // reroute leaves the previous wiring fully intact
        let new_dest_ins = match output {
            Some(out) => {
                let dest_ins = {
                    let dest = self.tracks.get(out).ok_or(HcError::TrackNotFound(out))?;
                    dest.processor.read().ins.clone()
                };
                let (fl, fr) = fader_outs.ids();
                let (dl, dr) = dest_ins.ids();
                for (src, dst) in [(fl, dl), (fr, dr)] {
                    if self.would_create_cycle(src, dst) {
                        log::warn!(
                            "rejecting output reroute {src:?} -> {dst:?}: would create a cycle"
                        );
                        return Err(HcError::CycleDetected { src, dst });
                    }
                }
                Some(dest_ins)
            }
            None => None,
        };

        // Unhook the previous destination
        if let Some(old) = old_output {
            if let Some(dest) = self.tracks.get(old) {
                let dest_ins = dest.processor.read().ins.clone();
                let (fl, fr) = fader_outs.ids();
                let (dl, dr) = dest_ins.ids();
                self.remove_connection(fl, dl);
                self.remove_connection(fr, dr);
            }
        }

        if let Some(dest_ins) = new_dest_ins {
            self.link_locked(&fader_outs, &dest_ins)?;
        }

        self.tracks
            .get_mut(id)
            .ok_or(HcError::TrackNotFound(id))?
            .output = output;
        Ok(())
    }

    // ============ Plugin slots ============

    /// Append an insert effect to a track's channel, rewiring the chain
    pub fn add_insert(&mut self, id: TrackId, instance: PluginRef) -> HcResult<usize> {
        let slot = self.create_slot(&instance)?;
        let track = self.tracks.get_mut(id).ok_or(HcError::TrackNotFound(id))?;
        track.channel.inserts.push(slot);
        let idx = track.channel.inserts.len() - 1;
        self.rewire_track_chain(id);
        Ok(idx)
    }

    /// Set a track's instrument slot, rewiring the chain
    pub fn set_instrument(&mut self, id: TrackId, instance: PluginRef) -> HcResult<()> {
        let slot = self.create_slot(&instance)?;
        let old = {
            let track = self.tracks.get_mut(id).ok_or(HcError::TrackNotFound(id))?;
            track.channel.instrument.replace(slot)
        };
        if let Some(old) = old {
            self.drop_slot_ports(&old);
        }
        self.rewire_track_chain(id);
        Ok(())
    }

    /// Remove an insert effect, rewiring the chain around the gap
    pub fn remove_insert(&mut self, id: TrackId, idx: usize) -> HcResult<PluginRef> {
        let slot = {
            let track = self.tracks.get_mut(id).ok_or(HcError::TrackNotFound(id))?;
            if idx >= track.channel.inserts.len() {
                return Err(HcError::InvalidParam(format!("no insert at slot {idx}")));
            }
            track.channel.inserts.remove(idx)
        };
        self.drop_slot_ports(&slot);
        self.rewire_track_chain(id);
        Ok(slot.instance)
    }

    /// Append a send to a track's channel; the send taps the fader output
    /// and its own output is connected to a destination with [`connect`].
    pub fn add_send(&mut self, id: TrackId) -> HcResult<usize> {
        let (name, fader_outs, n) = {
            let track = self.tracks.get(id).ok_or(HcError::TrackNotFound(id))?;
            (
                track.name.clone(),
                track.channel.fader.read().outs.clone(),
                track.channel.sends.len(),
            )
        };
        let ins = self
            .registry
            .create_stereo(&format!("{name}/send {n} in"), PortFlow::Input);
        let outs = self
            .registry
            .create_stereo(&format!("{name}/send {n} out"), PortFlow::Output);
        self.link_locked(&fader_outs, &ins)?;

        let send = Arc::new(RwLock::new(ChannelSend::new(ins, outs)));
        let track = self.tracks.get_mut(id).ok_or(HcError::TrackNotFound(id))?;
        track.channel.sends.push(send);
        Ok(n)
    }

    // ============ Port connections ============

    /// Connect two ports. Rejects unknown ports, wrong directions,
    /// duplicates, and any connection that would close an audio-rate
    /// cycle — the graph downstream assumes a DAG.
    pub fn connect(&mut self, src: PortId, dst: PortId) -> HcResult<()> {
        self.connect_inner(src, dst, false)
    }

    /// Remove a user connection
    pub fn disconnect(&mut self, src: PortId, dst: PortId) -> HcResult<()> {
        let conn = self
            .connections
            .iter()
            .find(|c| c.src == src && c.dst == dst)
            .copied();
        match conn {
            None => Err(HcError::InvalidConnection(format!(
                "{src:?} -> {dst:?} is not connected"
            ))),
            Some(c) if c.locked => Err(HcError::InvalidConnection(format!(
                "{src:?} -> {dst:?} is locked channel wiring"
            ))),
            Some(_) => {
                self.remove_connection(src, dst);
                Ok(())
            }
        }
    }

    /// Enable or disable a connection without removing it. A disabled
    /// connection carries no signal and produces no graph edge.
    pub fn set_connection_enabled(&mut self, src: PortId, dst: PortId, enabled: bool) -> HcResult<()> {
        let prev = self
            .connections
            .set_enabled(src, dst, enabled)
            .ok_or_else(|| {
                HcError::InvalidConnection(format!("{src:?} -> {dst:?} is not connected"))
            })?;
        if prev == enabled {
            return Ok(());
        }
        // Keep the destination's source list in step with the flag
        if enabled {
            if let (Some(src_port), Some(dst_port)) = (self.registry.get(src), self.registry.get(dst)) {
                dst_port.write().add_src(src_port.clone());
            }
        } else {
            self.unlink_port_srcs(src, dst);
        }
        Ok(())
    }

    fn connect_inner(&mut self, src: PortId, dst: PortId, locked: bool) -> HcResult<()> {
        let src_port = self
            .registry
            .get(src)
            .ok_or(HcError::PortNotFound(src))?
            .clone();
        let dst_port = self
            .registry
            .get(dst)
            .ok_or(HcError::PortNotFound(dst))?
            .clone();

        if src == dst {
            return Err(HcError::InvalidConnection("port cannot feed itself".into()));
        }
        if src_port.read().flow() != PortFlow::Output {
            return Err(HcError::InvalidConnection(format!(
                "{src:?} is not an output port"
            )));
        }
        if dst_port.read().flow() != PortFlow::Input {
            return Err(HcError::InvalidConnection(format!(
                "{dst:?} is not an input port"
            )));
        }
        if src_port.read().kind() != dst_port.read().kind() {
            return Err(HcError::InvalidConnection(
                "port kinds do not match".into(),
            ));
        }
        if self.connections.contains(src, dst) {
            return Err(HcError::AlreadyConnected { src, dst });
        }
        if self.would_create_cycle(src, dst) {
            log::warn!("rejecting connection {src:?} -> {dst:?}: would create a cycle");
            return Err(HcError::CycleDetected { src, dst });
        }

        self.connections.push(PortConnection {
            src,
            dst,
            enabled: true,
            locked,
        });
        dst_port.write().add_src(src_port);
        Ok(())
    }

    /// Would adding src → dst close a loop? Walks the port-level signal
    /// graph: table connections plus each owner's input → output edges.
    pub fn would_create_cycle(&self, src: PortId, dst: PortId) -> bool {
        let mut adjacency: HashMap<PortId, Vec<PortId>> = HashMap::new();
        for conn in self.connections.iter() {
            adjacency.entry(conn.src).or_default().push(conn.dst);
        }
        for track in self.tracks.iter() {
            track.owner_port_edges(|from, to| {
                adjacency.entry(from).or_default().push(to);
            });
        }

        // Cycle iff src is already reachable from dst
        let mut stack = vec![dst];
        let mut seen = HashSet::new();
        while let Some(p) = stack.pop() {
            if p == src {
                return true;
            }
            if seen.insert(p) {
                if let Some(next) = adjacency.get(&p) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        false
    }

    // ============ Internal wiring ============

    fn create_slot(&mut self, instance: &PluginRef) -> HcResult<PluginSlot> {
        let name = instance.read().name().to_string();
        let ins = self.registry.create_stereo(&format!("{name}/in"), PortFlow::Input);
        let outs = self.registry.create_stereo(&format!("{name}/out"), PortFlow::Output);
        Ok(PluginSlot::new(instance.clone(), ins, outs))
    }

    fn drop_slot_ports(&mut self, slot: &PluginSlot) {
        let (il, ir) = slot.ins.ids();
        let (ol, or) = slot.outs.ids();
        for pid in [il, ir, ol, or] {
            for conn in self.connections.remove_touching(pid) {
                self.unlink_port_srcs(conn.src, conn.dst);
            }
            self.registry.remove(pid);
        }
    }

    fn link_locked(&mut self, from: &StereoPorts, to: &StereoPorts) -> HcResult<()> {
        let (fl, fr) = from.ids();
        let (tl, tr) = to.ids();
        self.connect_inner(fl, tl, true)?;
        self.connect_inner(fr, tr, true)?;
        Ok(())
    }

    fn remove_connection(&mut self, src: PortId, dst: PortId) {
        if self.connections.remove(src, dst) {
            self.unlink_port_srcs(src, dst);
        }
    }

    fn unlink_port_srcs(&self, src: PortId, dst: PortId) {
        if let Some(dst_port) = self.registry.get(dst) {
            dst_port.write().remove_src(src);
        }
    }

    /// Rebuild the locked intra-channel wiring of a track:
    /// processor → MIDI FX → instrument → inserts → fader.
    fn rewire_track_chain(&mut self, id: TrackId) {
        let Some(track) = self.tracks.get(id) else {
            return;
        };

        // Port sets and stage order of the chain
        let mut chain: Vec<(StereoPorts, StereoPorts)> = Vec::new();
        {
            let p = track.processor.read();
            chain.push((p.ins.clone(), p.outs.clone()));
        }
        for slot in track.channel.slots() {
            chain.push((slot.ins.clone(), slot.outs.clone()));
        }
        {
            let fader = track.channel.fader.read();
            chain.push((fader.ins.clone(), fader.outs.clone()));
        }

        // Drop the existing locked wiring between chain stages
        let mut chain_ports = HashSet::new();
        for (ins, outs) in &chain {
            let (a, b) = ins.ids();
            let (c, d) = outs.ids();
            chain_ports.extend([a, b, c, d]);
        }
        let stale: Vec<(PortId, PortId)> = self
            .connections
            .iter()
            .filter(|c| c.locked && chain_ports.contains(&c.src) && chain_ports.contains(&c.dst))
            .map(|c| (c.src, c.dst))
            .collect();
        for (src, dst) in stale {
            self.remove_connection(src, dst);
        }

        // Relink in channel order
        for pair in chain.windows(2) {
            let (_, prev_outs) = &pair[0];
            let (next_ins, _) = &pair[1];
            if let Err(e) = self.link_locked(prev_outs, next_ins) {
                log::error!("channel rewire failed for track {id:?}: {e}");
            }
        }
    }
}

fn collect_track_ports(track: &Track, out: &mut Vec<PortId>) {
    let mut push_pair = |ports: &StereoPorts| {
        let (l, r) = ports.ids();
        out.push(l);
        out.push(r);
    };
    {
        let p = track.processor.read();
        push_pair(&p.ins);
        push_pair(&p.outs);
    }
    for slot in track.channel.slots() {
        push_pair(&slot.ins);
        push_pair(&slot.outs);
    }
    {
        let fader = track.channel.fader.read();
        push_pair(&fader.ins);
        push_pair(&fader.outs);
    }
    for send in &track.channel.sends {
        let send = send.read();
        push_pair(&send.ins);
        push_pair(&send.outs);
    }
}
