//! End-to-end tests: project edits through graph rebuilds to rendered audio

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serial_test::serial;

use hc_core::{
    BufferSize, Decibels, PassthroughPlugin, PluginInstance, PluginRef, ProcessTimeInfo, Project,
    Sample, SamplePosition, SampleRate,
};
use hc_engine::{NodeOwner, Router};

const BLOCK: u32 = 64;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn new_router() -> Router {
    Router::new(Arc::new(RwLock::new(Project::new(
        SampleRate::Hz48000,
        BufferSize::Samples64,
    ))))
}

fn cycle(position: u64) -> ProcessTimeInfo {
    ProcessTimeInfo::new(SamplePosition(position), 0, BLOCK)
}

/// Ignores its inputs and fills its outputs with a constant
struct Oscillator {
    name: String,
    level: Sample,
}

impl Oscillator {
    fn new(name: impl Into<String>, level: Sample) -> PluginRef {
        Arc::new(RwLock::new(Self {
            name: name.into(),
            level,
        }))
    }
}

impl PluginInstance for Oscillator {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, time: &ProcessTimeInfo, _inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        let (start, end) = time.range();
        for out in outputs.iter_mut() {
            let end = end.min(out.len());
            out[start..end].fill(self.level);
        }
    }
}

/// Counts its `process` invocations
struct CountingPlugin {
    name: String,
    calls: Arc<AtomicU32>,
}

impl CountingPlugin {
    fn new(name: &str) -> (PluginRef, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let plug = Arc::new(RwLock::new(Self {
            name: name.into(),
            calls: calls.clone(),
        }));
        (plug, calls)
    }
}

impl PluginInstance for CountingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, _time: &ProcessTimeInfo, _inputs: &[&[Sample]], _outputs: &mut [&mut [Sample]]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct FaultyPlugin;

impl PluginInstance for FaultyPlugin {
    fn name(&self) -> &str {
        "faulty"
    }

    fn process(&mut self, _time: &ProcessTimeInfo, _inputs: &[&[Sample]], _outputs: &mut [&mut [Sample]]) {
        panic!("plugin blew up");
    }
}

/// Left buffer of the master fader output
fn master_out(router: &Router, master: hc_core::TrackId) -> Vec<Sample> {
    let project = router.project().read();
    let track = project.tracks.get(master).unwrap();
    let fader = track.channel.fader.read();
    let out = fader.outs.l.read();
    out.buffer().to_vec()
}

#[test]
#[serial]
fn test_signal_reaches_master() {
    init_logs();
    let router = new_router();
    let master = {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let source = project.add_track("source");
        project.set_instrument(source, Oscillator::new("osc", 0.5)).unwrap();
        project.set_track_output(source, Some(master)).unwrap();
        master
    };
    router.recalc_graph(false);

    assert!(router.start_cycle(cycle(0)));
    assert!(master_out(&router, master).iter().all(|&s| s == 0.5));
}

#[test]
#[serial]
fn test_tracks_sum_and_cycles_are_deterministic() {
    let router = new_router();
    let master = {
        let mut project = router.project().write();
        let master = project.add_track("master");
        for (name, level) in [("a", 0.25), ("b", 0.5)] {
            let t = project.add_track(name);
            project.set_instrument(t, Oscillator::new(name, level)).unwrap();
            project.set_track_output(t, Some(master)).unwrap();
        }
        master
    };
    router.recalc_graph(false);

    for i in 0..3u32 {
        assert!(router.start_cycle(cycle(u64::from(i) * u64::from(BLOCK))));
        let out = master_out(&router, master);
        assert!(
            out.iter().all(|&s| (s - 0.75).abs() < 1e-12),
            "cycle {i} produced {out:?}"
        );
    }
}

#[test]
#[serial]
fn test_every_node_processes_exactly_once_per_cycle() {
    let router = new_router();
    let (routed, routed_calls) = CountingPlugin::new("routed");
    let (island, island_calls) = CountingPlugin::new("island");
    {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("source");
        project.set_instrument(t, routed).unwrap();
        project.set_track_output(t, Some(master)).unwrap();
        // A track routed nowhere is still part of every cycle
        let lone = project.add_track("lone");
        project.set_instrument(lone, island).unwrap();
    }
    router.recalc_graph(false);

    for i in 1..=3u32 {
        assert!(router.start_cycle(cycle(u64::from(i - 1) * u64::from(BLOCK))));
        assert_eq!(routed_calls.load(Ordering::SeqCst), i);
        assert_eq!(island_calls.load(Ordering::SeqCst), i);
    }
}

#[test]
#[serial]
fn test_route_latency_follows_worst_path() {
    let router = new_router();
    let (b, idx, d_in_l) = {
        let mut project = router.project().write();
        let d = project.add_track("d");
        let b = project.add_track("b");
        let c = project.add_track("c");
        let a = project.add_track("a");

        project.set_track_output(b, Some(d)).unwrap();
        project.set_track_output(c, Some(d)).unwrap();
        project.set_track_output(a, Some(b)).unwrap();

        // a also feeds c, through a send
        let send_idx = project.add_send(a).unwrap();
        let send_outs = project.tracks.get(a).unwrap().channel.sends[send_idx]
            .read()
            .outs
            .clone();
        let c_ins = project.tracks.get(c).unwrap().processor.read().ins.clone();
        project.connect(send_outs.ids().0, c_ins.ids().0).unwrap();
        project.connect(send_outs.ids().1, c_ins.ids().1).unwrap();

        let plug: PluginRef = Arc::new(RwLock::new(PassthroughPlugin::with_latency("look", 64)));
        let idx = project.add_insert(b, plug).unwrap();
        let d_in_l = project.tracks.get(d).unwrap().processor.read().ins.ids().0;
        (b, idx, d_in_l)
    };
    router.recalc_graph(false);
    // Only the path through b's insert carries latency
    assert_eq!(router.max_route_playback_latency(), 64);
    assert_eq!(producer_count(&router, d_in_l), 2);

    router.project().write().remove_insert(b, idx).unwrap();
    router.recalc_graph(false);
    assert_eq!(router.max_route_playback_latency(), 0);

    // Dropping b entirely leaves d with a single producer (c)
    router.project().write().remove_track(b).unwrap();
    router.recalc_graph(false);
    assert_eq!(router.max_route_playback_latency(), 0);
    assert_eq!(producer_count(&router, d_in_l), 1);
}

/// Number of producers feeding the graph node of the given input port
fn producer_count(router: &Router, port: hc_core::PortId) -> u32 {
    let graph = router.graph().unwrap();
    graph
        .nodes()
        .find(|n| matches!(&n.owner, NodeOwner::Port(p) if p.read().id() == port))
        .unwrap()
        .init_refcount
}

#[test]
#[serial]
fn test_soft_rebuild_keeps_graph_identity() {
    let router = new_router();
    let plug = Arc::new(RwLock::new(PassthroughPlugin::new("comp")));
    {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("gtr");
        project.set_track_output(t, Some(master)).unwrap();
        project.add_insert(t, plug.clone()).unwrap();
    }
    router.recalc_graph(false);
    let before = router.graph().unwrap();
    assert_eq!(router.max_route_playback_latency(), 0);

    plug.write().set_latency(32);
    router.recalc_graph(true);
    let after = router.graph().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(router.max_route_playback_latency(), 32);

    // Repeating the soft pass changes nothing
    router.recalc_graph(true);
    assert_eq!(router.max_route_playback_latency(), 32);

    // Lowering the reported latency lowers the cache, nothing else
    plug.write().set_latency(16);
    router.recalc_graph(true);
    assert_eq!(router.max_route_playback_latency(), 16);
    assert!(Arc::ptr_eq(&after, &router.graph().unwrap()));

    router.recalc_graph(false);
    let rebuilt = router.graph().unwrap();
    assert!(!Arc::ptr_eq(&after, &rebuilt));
}

#[test]
#[serial]
fn test_preroll_consumed_by_cycles() {
    let router = new_router();
    {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("delay");
        project.set_track_output(t, Some(master)).unwrap();
        let plug: PluginRef = Arc::new(RwLock::new(PassthroughPlugin::with_latency("look", 64)));
        project.add_insert(t, plug).unwrap();
    }
    router.recalc_graph(false);

    assert_eq!(router.remaining_latency_preroll(), 64);
    assert_eq!(router.global_offset(), 0);

    assert!(router.start_cycle(cycle(0)));
    assert_eq!(router.remaining_latency_preroll(), 0);
    assert_eq!(router.global_offset(), 64);
}

#[test]
#[serial]
fn test_plugin_panic_does_not_stall_the_cycle() {
    init_logs();
    let router = new_router();
    let master = {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("source");
        project.set_instrument(t, Oscillator::new("osc", 0.5)).unwrap();
        project
            .add_insert(t, Arc::new(RwLock::new(FaultyPlugin)))
            .unwrap();
        project.set_track_output(t, Some(master)).unwrap();
        master
    };
    router.recalc_graph(false);

    // Both cycles complete; the faulty slot simply contributes silence
    assert!(router.start_cycle(cycle(0)));
    assert!(router.start_cycle(cycle(u64::from(BLOCK))));
    assert!(master_out(&router, master).iter().all(|&s| s == 0.0));
}

#[test]
#[serial]
fn test_muted_master_renders_silence() {
    let router = new_router();
    let master = {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("source");
        project.set_instrument(t, Oscillator::new("osc", 0.5)).unwrap();
        project.set_track_output(t, Some(master)).unwrap();
        let fader = project.tracks.get(master).unwrap().channel.fader.clone();
        fader.write().set_muted(true);
        master
    };
    router.recalc_graph(false);

    assert!(router.start_cycle(cycle(0)));
    assert!(master_out(&router, master).iter().all(|&s| s == 0.0));
}

#[test]
#[serial]
fn test_fader_gain_applied_in_graph() {
    let router = new_router();
    let master = {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("source");
        project.set_instrument(t, Oscillator::new("osc", 1.0)).unwrap();
        project.set_track_output(t, Some(master)).unwrap();
        let fader = project.tracks.get(master).unwrap().channel.fader.clone();
        fader.write().set_gain(Decibels(-6.0));
        master
    };
    router.recalc_graph(false);

    assert!(router.start_cycle(cycle(0)));
    let expected = Decibels(-6.0).to_gain();
    assert!(master_out(&router, master)
        .iter()
        .all(|&s| (s - expected).abs() < 1e-9));
}

#[test]
#[serial]
fn test_skipped_node_contributes_silence() {
    let router = new_router();
    let master = {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("source");
        project.set_instrument(t, Oscillator::new("osc", 0.5)).unwrap();
        project.set_track_output(t, Some(master)).unwrap();
        master
    };
    router.recalc_graph(false);

    let graph = router.graph().unwrap();
    let osc_node = graph
        .nodes()
        .find(|n| matches!(&n.owner, NodeOwner::Plugin(slot) if slot.name() == "osc"))
        .unwrap();
    osc_node.set_skip_processing(true);

    assert!(router.start_cycle(cycle(0)));
    assert!(master_out(&router, master).iter().all(|&s| s == 0.0));
}

#[test]
#[serial]
fn test_disabled_connection_carries_no_signal() {
    let router = new_router();
    let master = {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("source");
        project.set_instrument(t, Oscillator::new("osc", 0.5)).unwrap();
        project.set_track_output(t, Some(master)).unwrap();

        let src = project.tracks.get(t).unwrap().channel.fader.read().outs.ids().0;
        let dst = project.tracks.get(master).unwrap().processor.read().ins.ids().0;
        project.set_connection_enabled(src, dst, false).unwrap();
        master
    };
    router.recalc_graph(false);

    assert!(router.start_cycle(cycle(0)));
    assert!(master_out(&router, master).iter().all(|&s| s == 0.0));
}

#[test]
#[serial]
fn test_single_worker_pool_completes_cycles() {
    let project = Arc::new(RwLock::new(Project::new(
        SampleRate::Hz48000,
        BufferSize::Samples64,
    )));
    let router = Router::with_workers(project, 1);
    let master = {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("source");
        project.set_instrument(t, Oscillator::new("osc", 0.5)).unwrap();
        project.set_track_output(t, Some(master)).unwrap();
        master
    };
    router.recalc_graph(false);

    assert!(router.start_cycle(cycle(0)));
    assert!(master_out(&router, master).iter().all(|&s| s == 0.5));
}

#[test]
#[serial]
fn test_rebuilds_and_cycles_are_exclusive() {
    init_logs();
    let router = Arc::new(new_router());
    {
        let mut project = router.project().write();
        let master = project.add_track("master");
        let t = project.add_track("source");
        project.set_instrument(t, Oscillator::new("osc", 0.5)).unwrap();
        project.set_track_output(t, Some(master)).unwrap();
    }
    router.recalc_graph(false);

    let rebuilder = {
        let router = router.clone();
        std::thread::spawn(move || {
            for _ in 0..50 {
                router.recalc_graph(false);
            }
        })
    };

    let mut ran = 0u32;
    let mut skipped = 0u32;
    for i in 0..500u64 {
        if router.start_cycle(cycle(i * u64::from(BLOCK))) {
            ran += 1;
        } else {
            skipped += 1;
        }
    }
    rebuilder.join().unwrap();
    log::info!("{ran} cycles ran, {skipped} skipped during rebuilds");

    // The gate never deadlocks and processing resumes once rebuilds stop
    assert!(router.start_cycle(cycle(0)));
    assert!(ran > 0);
}
