use apm_capture::flamegraph::{generate_flamegraph, generate_text_summary};
use apm_capture::profiler::{MergedStackTree, StackFrame};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

fn chain(functions: &[&str]) -> Vec<StackFrame> {
    functions.iter().map(|f| StackFrame::new(*f)).collect()
}

#[test]
fn test_collapsed_stacks_feed_flamegraph() {
    let tree = MergedStackTree::new();
    for _ in 0..3 {
        tree.add_sample(&chain(&["main", "dispatch", "render"]));
    }
    tree.add_sample(&chain(&["main", "dispatch"]));
    tree.add_sample(&chain(&["main", "gc"]));

    let stacks = tree.collapsed();
    assert_eq!(stacks[0].to_line(), "main;dispatch;render 3");
    assert_eq!(stacks.iter().map(|s| s.weight).sum::<u64>(), tree.sample_count());

    let svg = generate_flamegraph(&stacks, None).unwrap();
    assert!(svg.contains("render (3 samples, 60.00%)"));

    let summary = generate_text_summary(&stacks, 10, tree.sample_count());
    assert!(summary.contains("main;dispatch;render"));
    assert!(summary.contains("20.0%"));
}

#[test]
fn test_same_function_at_different_lines_are_distinct_frames() {
    let tree = MergedStackTree::new();
    tree.add_sample(&[
        StackFrame::new("main"),
        StackFrame::new("handle").with_location("server.rs", 10),
    ]);
    tree.add_sample(&[
        StackFrame::new("main"),
        StackFrame::new("handle").with_location("server.rs", 20),
    ]);

    let snapshot = tree.snapshot();
    assert_eq!(snapshot.roots.len(), 1);
    let main = snapshot.node(snapshot.roots[0]).unwrap();
    assert_eq!(main.count, 2);
    assert_eq!(main.children.len(), 2);
}

#[test]
fn test_concurrent_sampling_and_reading() {
    let tree = Arc::new(MergedStackTree::new());
    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for i in 0..1_000 {
                let leaf = if i % 2 == 0 { "even" } else { "odd" };
                tree.add_sample(&chain(&["main", leaf]));
            }
        })
    };

    for _ in 0..100 {
        let snapshot = tree.snapshot();
        let total: u64 = snapshot.collapsed().iter().map(|s| s.weight).sum();
        assert_eq!(total, snapshot.sample_count);
    }
    writer.join().unwrap();

    let snapshot = tree.snapshot();
    assert_eq!(snapshot.find_path(&["main"]).unwrap().count, 1_000);
    assert_eq!(snapshot.find_path(&["main", "odd"]).unwrap().count, 500);
}

fn chain_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 0..6)
        .prop_map(|names| names.into_iter().map(String::from).collect())
}

proptest! {
    #[test]
    fn property_each_sample_adds_one_along_its_path(chains in prop::collection::vec(chain_strategy(), 0..40)) {
        let tree = MergedStackTree::new();
        for names in &chains {
            let frames: Vec<StackFrame> = names.iter().map(|n| StackFrame::new(n.as_str())).collect();
            tree.add_sample(&frames);
        }

        let snapshot = tree.snapshot();
        let non_empty = chains.iter().filter(|c| !c.is_empty()).count() as u64;
        prop_assert_eq!(snapshot.sample_count, non_empty);

        let root_total: u64 = snapshot.roots.iter().map(|&r| snapshot.nodes[r].count).sum();
        prop_assert_eq!(root_total, non_empty);

        for names in chains.iter().filter(|c| !c.is_empty()) {
            let path: Vec<&str> = names.iter().map(String::as_str).collect();
            let expected = chains
                .iter()
                .filter(|other| other.len() >= names.len() && other[..names.len()] == names[..])
                .count() as u64;
            prop_assert_eq!(snapshot.find_path(&path).unwrap().count, expected);
        }
    }
}
