//! End-to-end inliner scenarios: profile in, mutated module and reports
//! out.

use std::rc::Rc;

use fdopt_ir::{BinOp, CallTarget, FuncId, Module, ModuleBuilder, Value};
use fdopt_inline::{vl, Budget, Inliner, InlinerConfig, LogBuffers, LogSet};
use fdopt_profile::{CallStructure, CombinedCallProfile, ProfileReader, ProfileWriter};

/// main calls foo once; foo is ten straight-line instructions.
fn two_function_module() -> (Module, FuncId, FuncId) {
    let mut mb = ModuleBuilder::new();
    let foo = mb.declare("foo", 0);
    {
        let mut fb = mb.define_declared(foo);
        let e = fb.entry_block();
        for i in 0..10 {
            fb.binary(e, BinOp::Add, Value::Const(i), Value::Const(1));
        }
        fb.ret(e, None);
        fb.finish();
    }
    let main = mb.declare("main", 0);
    {
        let mut fb = mb.define_declared(main);
        let e = fb.entry_block();
        fb.call(e, CallTarget::Direct(foo), vec![], true);
        fb.ret(e, None);
        fb.finish();
    }
    mb.set_entry(main);
    (mb.finish(), main, foo)
}

/// A call profile whose every instrumented block ran `count` times per
/// entry (entry itself pinned at 1).
fn uniform_call_profile(module: &Module, trials: &[Vec<u32>]) -> CombinedCallProfile {
    let structure = CallStructure::build(module);
    let mut cp = CombinedCallProfile::new(Rc::clone(&structure));
    for counters in trials {
        assert_eq!(counters.len(), structure.slot_count());
        let mut w = ProfileWriter::new(Vec::new());
        w.write_u32(counters.len() as u32).unwrap();
        for &c in counters {
            w.write_u32(c).unwrap();
        }
        let raw = w.into_inner();
        let mut r = ProfileReader::new(raw.as_slice());
        cp.add_profile(&mut r).unwrap();
    }
    cp.core_mut().build_histograms(8);
    cp
}

fn quiet_inliner(config: InlinerConfig) -> (Inliner, LogBuffers) {
    let (logs, buffers) = LogSet::in_memory(vl::ERROR);
    (Inliner::with_logs(config, logs).unwrap(), buffers)
}

#[test]
fn test_single_step_inline() {
    let (mut module, main, foo) = two_function_module();
    // the call site sits in main's entry: a point profile at 1.0
    let cp = uniform_call_profile(&module, &[vec![1]]);

    let config = InlinerConfig {
        budget: Budget::Limit(20),
        ..Default::default()
    };
    let (mut inliner, buffers) = quiet_inliner(config);
    let stats = inliner.run(&mut module, &cp).unwrap();

    assert_eq!(stats.inline_count, 1);
    assert_eq!(stats.initial_candidates, 1);
    // the budget never grows and the one inline costs at most foo's size
    assert!(stats.final_budget <= stats.initial_budget);
    assert!(stats.initial_budget - stats.final_budget <= 10);

    // foo's body was spliced into main
    assert!(module.func(main).blocks.len() >= 3);

    // foo became dead and is reported as such
    assert!(buffers.dead_text().contains("foo"));
    assert!(buffers.hash_text().contains("D 00000000 foo"));
    assert!(buffers.count_text().contains("Calls inlined:   1"));
    let _ = foo;
}

#[test]
fn test_budget_zero_blocks_inlining() {
    let (mut module, _main, _foo) = two_function_module();
    let cp = uniform_call_profile(&module, &[vec![1]]);

    let config = InlinerConfig {
        // below foo's inline size, so the candidate is rejected as too big
        budget: Budget::Limit(2),
        ..Default::default()
    };
    let (mut inliner, _buffers) = quiet_inliner(config);
    let stats = inliner.run(&mut module, &cp).unwrap();

    assert_eq!(stats.inline_count, 0);
    assert_eq!(stats.too_big, 1);
}

#[test]
fn test_never_metric_inlines_nothing() {
    let (mut module, _main, _foo) = two_function_module();
    let cp = uniform_call_profile(&module, &[vec![1]]);

    let config = InlinerConfig {
        metric: "never".to_string(),
        budget: Budget::Unlimited,
        ..Default::default()
    };
    let (mut inliner, _buffers) = quiet_inliner(config);
    let stats = inliner.run(&mut module, &cp).unwrap();
    assert_eq!(stats.inline_count, 0);
}

/// main -> mid -> leaf: inlining mid into main synthesizes a main -> leaf
/// site whose histogram is the cross of the two originals, and the depth
/// limit retires candidates whose history is already long enough.
fn chain_module() -> (Module, FuncId, FuncId, FuncId) {
    let mut mb = ModuleBuilder::new();
    let leaf = mb.declare("leaf", 0);
    {
        let mut fb = mb.define_declared(leaf);
        let e = fb.entry_block();
        for i in 0..6 {
            fb.binary(e, BinOp::Add, Value::Const(i), Value::Const(2));
        }
        fb.ret(e, None);
        fb.finish();
    }
    let mid = mb.declare("mid", 0);
    {
        let mut fb = mb.define_declared(mid);
        let e = fb.entry_block();
        for i in 0..4 {
            fb.binary(e, BinOp::Mul, Value::Const(i), Value::Const(3));
        }
        fb.call(e, CallTarget::Direct(leaf), vec![], true);
        fb.ret(e, None);
        fb.finish();
    }
    let main = mb.declare("main", 0);
    {
        let mut fb = mb.define_declared(main);
        let e = fb.entry_block();
        fb.call(e, CallTarget::Direct(mid), vec![], true);
        fb.ret(e, None);
        fb.finish();
    }
    mb.set_entry(main);
    (mb.finish(), main, mid, leaf)
}

#[test]
fn test_chain_inlines_propagate_history() {
    let (mut module, main, _mid, _leaf) = chain_module();
    // slots: mid's entry (calls leaf), main's entry (calls mid)
    let cp = uniform_call_profile(&module, &[vec![1, 1], vec![1, 1]]);

    let config = InlinerConfig {
        budget: Budget::Unlimited,
        ..Default::default()
    };
    let (mut inliner, buffers) = quiet_inliner(config);
    let stats = inliner.run(&mut module, &cp).unwrap();

    // main->mid goes first; retiring dead `mid` removes the original
    // mid->leaf site, and the synthesized main->leaf copy then inlines
    assert_eq!(stats.inline_count, 2);
    assert_eq!(stats.new_cand, 1);
    assert_eq!(stats.dead_calls, 1);
    // everything folded into main; both callees are dead
    let dead = buffers.dead_text();
    assert!(dead.contains("mid"));
    assert!(dead.contains("leaf"));
    // the final main body holds all the arithmetic
    let main_insts: usize = module
        .func(main)
        .blocks
        .iter()
        .map(|b| b.insts.len())
        .sum();
    assert!(main_insts >= 10);
}

#[test]
fn test_depth_limit_parks_synthesized_candidates() {
    let (mut module, _main, _mid, _leaf) = chain_module();
    let cp = uniform_call_profile(&module, &[vec![1, 1]]);

    let config = InlinerConfig {
        budget: Budget::Unlimited,
        max_depth: 1,
        ..Default::default()
    };
    let (mut inliner, _buffers) = quiet_inliner(config);
    let stats = inliner.run(&mut module, &cp).unwrap();

    // main->mid inlines with an empty history; the synthesized main->leaf
    // copy carries history ["mid"] and hits the depth limit
    assert_eq!(stats.inline_count, 1);
    assert_eq!(stats.too_deep, 1);
}

#[test]
fn test_budget_is_monotonic_and_auto_scales() {
    let (module, _, _) = two_function_module();
    let _ = module;
    let config = InlinerConfig {
        budget: Budget::Auto,
        ..Default::default()
    };
    let (inliner, _buffers) = quiet_inliner(config);
    // tiny programs get the maximal growth factor
    assert_eq!(inliner.compute_budget(1000), 10_000);
    // huge programs get the minimal one
    assert_eq!(inliner.compute_budget(1_000_000), 50_000);
    // in between, the budget shrinks as programs grow
    let mid_small = inliner.compute_budget(10_000);
    let mid_large = inliner.compute_budget(100_000);
    assert!(mid_small > 0 && mid_large > 0);
    assert!(
        mid_small as f64 / 10_000.0 > mid_large as f64 / 100_000.0,
        "growth factor must shrink with size"
    );
}
