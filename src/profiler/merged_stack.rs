//! Merged stack tree built from periodic stack samples.
//!
//! Every sample is a call chain (outermost frame first). Chains that share a
//! prefix share the same path from the root, so the tree is a frequency map
//! of everything the thread was seen doing.
//!
//! Collapsed stacks are the folded text form of the same data, used for
//! flamegraph generation:
//! Format: "parent;child;grandchild samples"

use super::sample::StackFrame;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A single collapsed stack entry
///
/// **Public** - used by flamegraph generator and trace export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapsedStack {
    /// Stack trace as semicolon-separated string
    pub stack: String,

    /// Number of samples that ended at this stack
    pub weight: u64,
}

impl CollapsedStack {
    pub fn new(stack: String, weight: u64) -> Self {
        Self { stack, weight }
    }

    /// Render as a folded-stack line
    pub fn to_line(&self) -> String {
        format!("{} {}", self.stack, self.weight)
    }
}

/// One frame in the merged tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackNode {
    pub frame: StackFrame,

    /// Samples whose chain passed through this node
    pub count: u64,

    /// Samples whose chain ended at this node
    pub self_count: u64,

    /// Indexes into the snapshot's node list
    pub children: Vec<usize>,
}

#[derive(Debug, Default)]
struct Nodes {
    nodes: Vec<StackNode>,
    roots: Vec<usize>,
    sample_count: u64,
}

/// Frequency tree of sampled call stacks
///
/// Written only by the sampling scheduler; readable from any thread.
#[derive(Debug, Default)]
pub struct MergedStackTree {
    inner: Mutex<Nodes>,
}

/// Point-in-time copy of a `MergedStackTree`
#[derive(Debug, Clone, Default, Serialize)]
pub struct StackTreeSnapshot {
    pub nodes: Vec<StackNode>,
    pub roots: Vec<usize>,
    pub sample_count: u64,
}

impl MergedStackTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one sampled call chain into the tree
    ///
    /// **Public** - called once per sample by the profiling scheduler
    ///
    /// # Arguments
    /// * `frames` - Call chain, outermost frame first
    ///
    /// Each node on the chain's path is incremented by exactly one.
    /// Empty chains carry no information and are ignored.
    pub fn add_sample(&self, frames: &[StackFrame]) {
        if frames.is_empty() {
            return;
        }

        let mut inner = self.inner.lock();
        let Nodes {
            nodes,
            roots,
            sample_count,
        } = &mut *inner;

        let mut parent: Option<usize> = None;
        for frame in frames {
            let siblings = match parent {
                Some(idx) => &nodes[idx].children,
                None => &*roots,
            };
            let existing = siblings
                .iter()
                .copied()
                .find(|&idx| nodes[idx].frame == *frame);

            let idx = match existing {
                Some(idx) => idx,
                None => {
                    let idx = nodes.len();
                    nodes.push(StackNode {
                        frame: frame.clone(),
                        count: 0,
                        self_count: 0,
                        children: Vec::new(),
                    });
                    match parent {
                        Some(p) => nodes[p].children.push(idx),
                        None => roots.push(idx),
                    }
                    idx
                }
            };

            nodes[idx].count += 1;
            parent = Some(idx);
        }

        if let Some(leaf) = parent {
            nodes[leaf].self_count += 1;
        }
        *sample_count += 1;
    }

    /// Total number of merged samples
    pub fn sample_count(&self) -> u64 {
        self.inner.lock().sample_count
    }

    pub fn snapshot(&self) -> StackTreeSnapshot {
        let inner = self.inner.lock();
        StackTreeSnapshot {
            nodes: inner.nodes.clone(),
            roots: inner.roots.clone(),
            sample_count: inner.sample_count,
        }
    }

    /// Collapsed stacks, heaviest first
    pub fn collapsed(&self) -> Vec<CollapsedStack> {
        self.snapshot().collapsed()
    }
}

impl StackTreeSnapshot {
    pub fn node(&self, idx: usize) -> Option<&StackNode> {
        self.nodes.get(idx)
    }

    /// Follow `path` (outermost first) from the roots
    pub fn find_path(&self, path: &[&str]) -> Option<&StackNode> {
        let mut siblings = &self.roots;
        let mut found = None;
        for function in path {
            let idx = siblings
                .iter()
                .copied()
                .find(|&idx| self.nodes[idx].frame.function == *function)?;
            found = Some(&self.nodes[idx]);
            siblings = &self.nodes[idx].children;
        }
        found
    }

    pub fn max_depth(&self) -> usize {
        fn depth(snapshot: &StackTreeSnapshot, idx: usize) -> usize {
            1 + snapshot.nodes[idx]
                .children
                .iter()
                .map(|&child| depth(snapshot, child))
                .max()
                .unwrap_or(0)
        }
        self.roots.iter().map(|&root| depth(self, root)).max().unwrap_or(0)
    }

    /// Build collapsed stacks from the tree
    ///
    /// One entry per node where at least one sample ended, sorted by weight
    /// (descending) then by stack text.
    pub fn collapsed(&self) -> Vec<CollapsedStack> {
        let mut stacks = Vec::new();
        let mut path: Vec<&str> = Vec::new();
        for &root in &self.roots {
            self.collect(root, &mut path, &mut stacks);
        }

        stacks.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.stack.cmp(&b.stack)));

        debug!("Built {} unique collapsed stacks", stacks.len());

        stacks
    }

    fn collect<'a>(&'a self, idx: usize, path: &mut Vec<&'a str>, out: &mut Vec<CollapsedStack>) {
        let node = &self.nodes[idx];
        path.push(&node.frame.function);
        if node.self_count > 0 {
            out.push(CollapsedStack::new(path.join(";"), node.self_count));
        }
        for &child in &node.children {
            self.collect(child, path, out);
        }
        path.pop();
    }
}
