//! Aggregates transactional events into per-thread call trees.
//!
//! Each running transaction is a frame on its thread's stack. A transaction that begins while
//! another is running on the same thread becomes its child. Nodes are keyed by the config, the
//! event and the event config values, so one node aggregates every call with the same grouping.
use ahash::AHashMap;
use dbug_core::{Compiled, ConfigEvent, EndHook, Reporter, ReporterError, ReporterResult};
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProfileConfig {
    /// Seconds between printed reports; no periodic report when missing.
    print_interval: Option<f64>,
    /// Clear the statistics after each periodic report.
    reset: bool,
}

/// Aggregated statistics for one call path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileNode {
    pub key: String,
    pub count: u64,
    pub total: Duration,
    /// Total minus the time spent in children.
    pub intrinsic: Duration,
    pub children: Vec<ProfileNode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadProfile {
    pub thread: String,
    pub roots: Vec<ProfileNode>,
}

struct Node {
    key: String,
    children: Vec<usize>,
    parent: Option<usize>,
    count: u64,
    total: Duration,
    nested: Duration,
}

struct CallTree {
    thread: String,
    nodes: Vec<Node>,
    roots: Vec<usize>,
    stack: Vec<usize>,
}

impl CallTree {
    fn new() -> Self {
        Self {
            thread: thread::current()
                .name()
                .map_or_else(|| format!("{:?}", thread::current().id()), str::to_string),
            nodes: Vec::new(),
            roots: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// The child of the running frame with `key`, created on first use.
    fn child(&mut self, key: String) -> usize {
        let parent = self.stack.last().copied();
        let siblings = match parent {
            Some(parent) => &self.nodes[parent].children,
            None => &self.roots,
        };
        if let Some(&index) = siblings.iter().find(|&&i| self.nodes[i].key == key) {
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(Node {
            key,
            children: Vec::new(),
            parent,
            count: 0,
            total: Duration::ZERO,
            nested: Duration::ZERO,
        });
        match parent {
            Some(parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
        index
    }

    fn finish(&mut self, index: usize, elapsed: Duration) {
        if let Some(position) = self.stack.iter().rposition(|&i| i == index) {
            self.stack.remove(position);
        }
        let node = &mut self.nodes[index];
        node.total += elapsed;
        if let Some(parent) = node.parent {
            self.nodes[parent].nested += elapsed;
        }
    }

    fn snapshot(&self, index: usize) -> ProfileNode {
        let node = &self.nodes[index];
        ProfileNode {
            key: node.key.clone(),
            count: node.count,
            total: node.total,
            intrinsic: node.total.saturating_sub(node.nested),
            children: node.children.iter().map(|&i| self.snapshot(i)).collect(),
        }
    }

    fn reset(&mut self) {
        for node in &mut self.nodes {
            node.count = 0;
            node.total = Duration::ZERO;
            node.nested = Duration::ZERO;
        }
    }
}

#[derive(Default)]
struct ProfileState {
    threads: AHashMap<ThreadId, CallTree>,
    last_print: Option<Instant>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<ProfileState>,
    interval: Option<Duration>,
    reset: bool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ProfileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self) -> Vec<ThreadProfile> {
        let state = self.state();
        let mut report: Vec<ThreadProfile> = state
            .threads
            .values()
            .map(|tree| ThreadProfile {
                thread: tree.thread.clone(),
                roots: tree.roots.iter().map(|&i| tree.snapshot(i)).collect(),
            })
            .collect();
        report.sort_by(|a, b| a.thread.cmp(&b.thread));
        report
    }

    /// Logs the report when the print interval has elapsed.
    fn maybe_print(&self) {
        let Some(interval) = self.interval else {
            return;
        };
        {
            let mut state = self.state();
            let now = Instant::now();
            match state.last_print {
                Some(last) if now.duration_since(last) < interval => return,
                None => {
                    state.last_print = Some(now);
                    return;
                }
                _ => state.last_print = Some(now),
            }
        }
        log::info!(target: "dbug::profile", "{}", render(&self.report()));
        if self.reset {
            for tree in self.state().threads.values_mut() {
                tree.reset();
            }
        }
    }
}

fn event_key(event: &ConfigEvent) -> String {
    let config = event.config();
    let mut key = match config.id() {
        Some(id) => id.to_string(),
        None => config.anchor_type().type_name(),
    };
    let _ = write!(key, ":{}", event.event_type().name());
    let groups: Vec<String> = event
        .event_config_values()
        .iter()
        .flatten()
        .map(ToString::to_string)
        .collect();
    if !groups.is_empty() {
        let _ = write!(key, "[{}]", groups.join(", "));
    }
    key
}

/// Renders a report as an indented tree.
pub fn render(report: &[ThreadProfile]) -> String {
    fn write_node(out: &mut String, node: &ProfileNode, depth: usize) {
        let _ = writeln!(
            out,
            "{}{} count={} total={:?} intrinsic={:?}",
            "  ".repeat(depth),
            node.key,
            node.count,
            node.total,
            node.intrinsic
        );
        for child in &node.children {
            write_node(out, child, depth + 1);
        }
    }

    let mut out = String::new();
    for thread in report {
        let _ = writeln!(out, "thread {}", thread.thread);
        for root in &thread.roots {
            write_node(&mut out, root, 1);
        }
    }
    out
}

/// Profiles transactional events.
///
/// Configuration: `printInterval` (seconds between reports logged at info level) and `reset`
/// (clear statistics after each report).
#[derive(Default)]
pub struct ProfilingReporter {
    shared: Arc<Shared>,
}

impl ProfilingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> Vec<ThreadProfile> {
        self.shared.report()
    }

    pub fn reset(&self) {
        for tree in self.shared.state().threads.values_mut() {
            tree.reset();
        }
    }

    /// Enters a node for `event` on the current thread and returns it.
    fn enter(&self, event: &ConfigEvent, push: bool) -> (ThreadId, usize) {
        let thread = thread::current().id();
        let mut state = self.shared.state();
        let tree = state.threads.entry(thread).or_insert_with(CallTree::new);
        let index = tree.child(event_key(event));
        tree.nodes[index].count += 1;
        if push {
            tree.stack.push(index);
        }
        (thread, index)
    }
}

impl Reporter for ProfilingReporter {
    fn configure(&mut self, config: &serde_json::Value) -> ReporterResult<()> {
        if config.is_null() {
            return Ok(());
        }
        let config: ProfileConfig = serde_json::from_value(config.clone())
            .map_err(|err| ReporterError::config(err.to_string()))?;
        let interval = match config.print_interval {
            Some(seconds) => Some(Duration::try_from_secs_f64(seconds).map_err(|_| {
                ReporterError::config(format!("invalid print interval {seconds}"))
            })?),
            None => None,
        };
        self.shared = Arc::new(Shared {
            state: Mutex::default(),
            interval,
            reset: config.reset,
        });
        Ok(())
    }

    fn event_occurred(
        &self,
        event: &ConfigEvent,
        _configured: &Compiled,
        _compiled: &Compiled,
    ) -> ReporterResult<()> {
        self.enter(event, false);
        Ok(())
    }

    fn event_begun(
        &self,
        event: &ConfigEvent,
        _configured: &Compiled,
        _compiled: &Compiled,
    ) -> ReporterResult<Option<EndHook>> {
        let (thread, index) = self.enter(event, true);
        let shared = Arc::clone(&self.shared);
        Ok(Some(Box::new(move |event: &ConfigEvent| {
            let elapsed = event
                .occurrence()
                .duration()
                .and_then(|d| d.to_std().ok())
                .unwrap_or_default();
            if let Some(tree) = shared.state().threads.get_mut(&thread) {
                tree.finish(index, elapsed);
            }
            shared.maybe_print();
        })))
    }

    fn close(&self) -> ReporterResult<()> {
        if self.shared.interval.is_some() {
            log::info!(target: "dbug::profile", "{}", render(&self.report()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn nested_time_is_not_intrinsic() {
        let mut tree = CallTree::new();
        let outer = tree.child("load".to_string());
        tree.nodes[outer].count += 1;
        tree.stack.push(outer);
        for elapsed in [ms(3), ms(4)] {
            let inner = tree.child("parse".to_string());
            tree.nodes[inner].count += 1;
            tree.stack.push(inner);
            tree.finish(inner, elapsed);
        }
        tree.finish(outer, ms(10));
        assert!(tree.stack.is_empty());

        let root = tree.snapshot(outer);
        assert_eq!(root.count, 1);
        assert_eq!(root.total, ms(10));
        assert_eq!(root.intrinsic, ms(3));
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].count, 2);
        assert_eq!(root.children[0].total, ms(7));
        assert_eq!(root.children[0].intrinsic, ms(7));

        tree.reset();
        assert_eq!(tree.snapshot(outer).total, Duration::ZERO);
    }

    #[test]
    fn render_indents_children() {
        let report = vec![ThreadProfile {
            thread: "main".to_string(),
            roots: vec![ProfileNode {
                key: "cfg:load".to_string(),
                count: 1,
                total: ms(5),
                intrinsic: ms(2),
                children: vec![ProfileNode {
                    key: "cfg:parse".to_string(),
                    count: 2,
                    total: ms(3),
                    intrinsic: ms(3),
                    children: Vec::new(),
                }],
            }],
        }];
        assert_eq!(
            render(&report),
            "thread main\n  cfg:load count=1 total=5ms intrinsic=2ms\n    cfg:parse count=2 total=3ms intrinsic=3ms\n"
        );
    }

    #[test]
    fn bad_intervals_are_rejected() {
        let mut reporter = ProfilingReporter::new();
        let err = reporter
            .configure(&serde_json::json!({ "printInterval": -1.0 }))
            .unwrap_err();
        assert!(matches!(err, ReporterError::Config { .. }));
    }
}
