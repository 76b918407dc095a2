//! End-to-end profile pipeline: raw trial files through the factory,
//! combined files back through the factory, and drift between the results.

use std::fs;
use std::path::PathBuf;

use fdopt_ir::{CallTarget, Module, ModuleBuilder, Value};
use fdopt_profile::{
    CallStructure, CombinedEdgeProfile, EdgeDominatorTree, ProfileFactory, ProfileReader,
    ProfileWriter, RecordTag,
};

fn test_module() -> Module {
    let mut mb = ModuleBuilder::new();
    let work = mb.declare("work", 0);
    {
        let mut fb = mb.define_declared(work);
        let e = fb.entry_block();
        fb.ret(e, None);
        fb.finish();
    }
    let main = mb.declare("main", 1);
    {
        let mut fb = mb.define_declared(main);
        let a = fb.entry_block();
        let b = fb.block("left");
        let c = fb.block("right");
        let d = fb.block("join");
        fb.call(a, CallTarget::Direct(work), vec![], true);
        fb.cond_br(a, Value::Param(0), b, c);
        fb.br(b, d);
        fb.br(c, d);
        fb.call(d, CallTarget::Direct(work), vec![], true);
        fb.ret(d, None);
        fb.finish();
    }
    mb.set_entry(main);
    mb.finish()
}

fn scratch(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("fdopt_test_{}_{}", std::process::id(), name));
    p
}

/// Two raw trial files with different branch biases.
fn write_raw_trials(m: &Module) -> (PathBuf, PathBuf) {
    let edt = EdgeDominatorTree::new(m);
    let structure = CallStructure::build(m);
    let n = edt.edge_count();
    let slots = structure.slot_count();

    let write = |name: &str, scale: u32| -> PathBuf {
        let mut w = ProfileWriter::new(Vec::new());
        // argument record, like the instrumented runtime emits
        w.write_tag(RecordTag::Argument).unwrap();
        w.write_u32(5).unwrap();
        let mut buf = w.into_inner();
        buf.extend_from_slice(b"a.out\0\0\0"); // 5 bytes + 3 pad
        let mut w = ProfileWriter::new(buf);

        w.write_tag(RecordTag::Edge).unwrap();
        w.write_u32(n as u32).unwrap();
        for i in 0..n {
            w.write_u32(10 + scale * i as u32).unwrap();
        }

        w.write_tag(RecordTag::Call).unwrap();
        w.write_u32(slots as u32).unwrap();
        for i in 0..slots {
            w.write_u32(4 + scale + i as u32).unwrap();
        }

        let p = scratch(name);
        fs::write(&p, w.into_inner()).unwrap();
        p
    };
    (write("trial_a.prof", 1), write("trial_b.prof", 3))
}

#[test]
fn test_raw_files_through_factory() {
    let m = test_module();
    let (a, b) = write_raw_trials(&m);

    let mut factory = ProfileFactory::new(&m).with_bin_count(8);
    factory.build_profiles(&[&a, &b]).unwrap();

    assert!(factory.has_edge_cp());
    assert!(factory.has_call_cp());

    let edge = factory.take_edge_cp().unwrap();
    assert_eq!(edge.core().total_weight(), 2.0);
    let edt = EdgeDominatorTree::new(&m);
    assert_eq!(edge.core().size(), edt.edge_count());
    // the entry edge is always pinned at 1.0
    let h0 = edge.histogram(0).unwrap();
    assert!(h0.is_point());
    assert!((h0.mean(false) - 1.0).abs() < 1e-9);

    let call = factory.take_call_cp().unwrap();
    assert_eq!(call.core().total_weight(), 2.0);

    fs::remove_file(a).ok();
    fs::remove_file(b).ok();
}

#[test]
fn test_combined_round_trip_through_factory() {
    let m = test_module();
    let (a, b) = write_raw_trials(&m);

    // first factory: raw trials -> combined file on disk
    let mut factory = ProfileFactory::new(&m).with_bin_count(8);
    factory.build_profiles(&[&a, &b]).unwrap();
    let edge = factory.take_edge_cp().unwrap();
    let call = factory.take_call_cp().unwrap();

    let combined_path = scratch("combined.cp");
    let mut w = ProfileWriter::new(Vec::new());
    edge.serialize(&mut w).unwrap();
    call.serialize(&mut w).unwrap();
    fs::write(&combined_path, w.into_inner()).unwrap();

    // second factory: combined file back in
    let mut factory2 = ProfileFactory::new(&m).with_bin_count(8);
    factory2.build_profiles(&[&combined_path]).unwrap();
    let edge2 = factory2.take_edge_cp().unwrap();
    let call2 = factory2.take_call_cp().unwrap();

    assert_eq!(edge2.core().total_weight(), edge.core().total_weight());
    assert_eq!(call2.core().total_weight(), call.core().total_weight());

    // identical location -> distribution mappings: drift is zero everywhere
    let mut drift = Vec::new();
    edge.core()
        .print_drift(edge2.core(), "edge", &mut drift)
        .unwrap();
    let text = String::from_utf8(drift).unwrap();
    for line in text.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        let out0: f64 = cols[1].parse().unwrap();
        assert!(out0.abs() < 1e-6, "unexpected drift on {line}");
    }

    fs::remove_file(a).ok();
    fs::remove_file(b).ok();
    fs::remove_file(combined_path).ok();
}

#[test]
fn test_edge_profile_dense_positions_after_deserialize() {
    let m = test_module();
    let edt = EdgeDominatorTree::new(&m);
    let n = edt.edge_count();

    // a profile where only the entry edge has weight
    let mut cp = CombinedEdgeProfile::new(n);
    let mut w = ProfileWriter::new(Vec::new());
    w.write_u32(n as u32).unwrap();
    w.write_u32(7).unwrap(); // entry executed
    for _ in 1..n {
        w.write_u32(0).unwrap();
    }
    let raw = w.into_inner();
    let mut r = ProfileReader::new(raw.as_slice());
    cp.add_profile(&mut r, &edt).unwrap();
    cp.core_mut().build_histograms(4);

    let mut w = ProfileWriter::new(Vec::new());
    cp.serialize(&mut w).unwrap();
    let buf = w.into_inner();

    let mut r = ProfileReader::new(buf.as_slice());
    r.read_tag().unwrap();
    let cp2 = CombinedEdgeProfile::deserialize(&mut r, n).unwrap();
    // absent locations exist as empty histograms at their dense slots
    assert_eq!(cp2.core().size(), n);
    assert!(cp2.histogram(0).unwrap().non_zero());
    for i in 1..n {
        let h = cp2.histogram(i as u32).unwrap();
        if !h.non_zero() {
            assert_eq!(h.bins(), 0);
        }
    }
}
