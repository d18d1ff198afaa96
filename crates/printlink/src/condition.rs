//! Composable error/state flags surfaced to the service.
//!
//! Conditions form a static tree declared at startup, typically the chain
//! `INTERNET > HTTP > TOKEN > API`. A node's effective state is its own
//! flag conjoined with every ancestor: the token cannot be "fine" while the
//! network is down. Each effective-state flip emits one event, coalesced
//! per subtree so a flapping link does not flood the queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use printlink_types::{Event, EventKind, EventSink, EventSource, Timestamp};

/// Changes within this window of a subtree's last emit are coalesced.
const COALESCE_WINDOW: Duration = Duration::from_millis(200);

struct CondNode {
    name: String,
    /// The node's own flag, before ancestor conjunction.
    ok: bool,
    reason: Option<String>,
    last_change: Timestamp,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Last time this node's subtree emitted, for coalescing.
    last_emit: Option<Instant>,
    /// Last effective state reported, to suppress repeats.
    reported: bool,
}

struct TreeInner {
    nodes: Vec<CondNode>,
    by_name: HashMap<String, usize>,
}

/// Point-in-time view of one condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionSnapshot {
    pub name: String,
    /// Effective state (own flag AND all ancestors).
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub last_change: Timestamp,
}

/// A static tree of named status flags.
pub struct ConditionTree {
    inner: Mutex<TreeInner>,
    sink: Arc<dyn EventSink>,
}

impl ConditionTree {
    /// Creates a tree from a root-to-leaf chain of names.
    ///
    /// All nodes start OK.
    pub fn chain(sink: Arc<dyn EventSink>, names: &[&str]) -> Self {
        assert!(!names.is_empty(), "condition chain must not be empty");
        let mut nodes = Vec::with_capacity(names.len());
        let mut by_name = HashMap::new();
        for (depth, name) in names.iter().enumerate() {
            let parent = depth.checked_sub(1);
            nodes.push(CondNode {
                name: (*name).to_string(),
                ok: true,
                reason: None,
                last_change: Timestamp::now(),
                parent,
                children: Vec::new(),
                last_emit: None,
                reported: true,
            });
            if let Some(parent) = parent {
                nodes[parent].children.push(depth);
            }
            by_name.insert((*name).to_string(), depth);
        }
        Self {
            inner: Mutex::new(TreeInner { nodes, by_name }),
            sink,
        }
    }

    /// The default connectivity chain.
    pub fn connectivity(sink: Arc<dyn EventSink>) -> Self {
        Self::chain(sink, &["INTERNET", "HTTP", "TOKEN", "API"])
    }

    /// Adds a child condition under `parent`. Startup-time only by
    /// convention; the tree shape never shrinks.
    pub fn add_child(&self, parent: &str, name: &str) -> bool {
        let mut inner = self.inner.lock().expect("condition lock poisoned");
        let Some(&parent_at) = inner.by_name.get(parent) else {
            return false;
        };
        if inner.by_name.contains_key(name) {
            return false;
        }
        let at = inner.nodes.len();
        inner.nodes.push(CondNode {
            name: name.to_string(),
            ok: true,
            reason: None,
            last_change: Timestamp::now(),
            parent: Some(parent_at),
            children: Vec::new(),
            last_emit: None,
            reported: true,
        });
        inner.nodes[parent_at].children.push(at);
        inner.by_name.insert(name.to_string(), at);
        true
    }

    /// Sets a node's flag; emits one event per effective-state flip in the
    /// node's subtree, coalesced within 200 ms.
    ///
    /// Returns false when the name is unknown.
    pub fn set(&self, name: &str, ok: bool, reason: Option<&str>) -> bool {
        let mut pending = Vec::new();
        {
            let mut inner = self.inner.lock().expect("condition lock poisoned");
            let Some(&at) = inner.by_name.get(name) else {
                return false;
            };
            if inner.nodes[at].ok != ok {
                inner.nodes[at].ok = ok;
                inner.nodes[at].last_change = Timestamp::now();
            }
            inner.nodes[at].reason = if ok { None } else { reason.map(str::to_string) };

            // Re-evaluate the whole subtree: flipping a parent flips the
            // effective state of every OK descendant.
            collect_flips(&mut inner, at, &mut pending);
        }

        for snapshot in pending {
            debug!(condition = %snapshot.name, ok = snapshot.ok, "condition changed");
            let mut event = Event::new(EventKind::ConditionChanged, EventSource::Sdk)
                .with_data("condition", Value::from(snapshot.name.as_str()))
                .with_data("ok", Value::from(snapshot.ok));
            if let Some(reason) = &snapshot.reason {
                event = event.with_reason(reason.clone());
            }
            self.sink.emit(event);
        }
        true
    }

    /// Effective state of a node; `None` for unknown names.
    pub fn get(&self, name: &str) -> Option<bool> {
        let inner = self.inner.lock().expect("condition lock poisoned");
        let &at = inner.by_name.get(name)?;
        Some(effective(&inner, at))
    }

    /// Snapshot of every condition, root first.
    pub fn snapshot(&self) -> Vec<ConditionSnapshot> {
        let inner = self.inner.lock().expect("condition lock poisoned");
        (0..inner.nodes.len())
            .map(|at| {
                let node = &inner.nodes[at];
                ConditionSnapshot {
                    name: node.name.clone(),
                    ok: effective(&inner, at),
                    reason: node.reason.clone(),
                    last_change: node.last_change,
                }
            })
            .collect()
    }

    /// Deepest condition whose *own* flag is false: the root cause to
    /// report.
    ///
    /// A node that is only failing by ancestor conjunction is not the
    /// problem, it is a symptom; with `TOKEN` down, `API` reads as not-OK
    /// too, but the thing to tell the user about is `TOKEN`.
    pub fn worst(&self) -> Option<ConditionSnapshot> {
        let inner = self.inner.lock().expect("condition lock poisoned");
        let mut worst: Option<usize> = None;
        let mut worst_depth = 0;
        for (at, node) in inner.nodes.iter().enumerate() {
            if node.ok {
                continue;
            }
            let depth = depth_of(&inner, at);
            if worst.is_none() || depth > worst_depth {
                worst = Some(at);
                worst_depth = depth;
            }
        }
        worst.map(|at| {
            let node = &inner.nodes[at];
            ConditionSnapshot {
                name: node.name.clone(),
                ok: false,
                reason: node.reason.clone(),
                last_change: node.last_change,
            }
        })
    }
}

fn depth_of(inner: &TreeInner, at: usize) -> usize {
    let mut depth = 0;
    let mut cursor = inner.nodes[at].parent;
    while let Some(parent) = cursor {
        depth += 1;
        cursor = inner.nodes[parent].parent;
    }
    depth
}

fn effective(inner: &TreeInner, at: usize) -> bool {
    let mut cursor = Some(at);
    while let Some(current) = cursor {
        if !inner.nodes[current].ok {
            return false;
        }
        cursor = inner.nodes[current].parent;
    }
    true
}

/// Walks the subtree rooted at `at`, recording nodes whose effective state
/// differs from what was last reported and whose coalescing window allows a
/// new emit.
fn collect_flips(inner: &mut TreeInner, at: usize, out: &mut Vec<ConditionSnapshot>) {
    let now = Instant::now();
    let mut stack = vec![at];
    while let Some(current) = stack.pop() {
        stack.extend(inner.nodes[current].children.iter().copied());

        let state = effective(inner, current);
        let node = &mut inner.nodes[current];
        if state == node.reported {
            continue;
        }
        if node.last_emit.is_some_and(|t| now.duration_since(t) < COALESCE_WINDOW) {
            // Within the window: remember the state, skip the event.
            node.reported = state;
            continue;
        }
        node.reported = state;
        node.last_emit = Some(now);
        out.push(ConditionSnapshot {
            name: node.name.clone(),
            ok: state,
            reason: node.reason.clone(),
            last_change: node.last_change,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    struct Captured(StdMutex<Vec<Event>>);

    impl EventSink for Captured {
        fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Captured {
        fn names(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.data["condition"].as_str().unwrap().to_string())
                .collect()
        }
    }

    fn tree() -> (ConditionTree, Arc<Captured>) {
        let sink = Arc::new(Captured::default());
        (ConditionTree::connectivity(sink.clone()), sink)
    }

    #[test]
    fn starts_all_ok() {
        let (t, sink) = tree();
        for name in ["INTERNET", "HTTP", "TOKEN", "API"] {
            assert_eq!(t.get(name), Some(true), "{name}");
        }
        assert!(t.worst().is_none());
        assert!(sink.names().is_empty());
    }

    #[test]
    fn own_flag_flips_emit_once() {
        let (t, sink) = tree();
        assert!(t.set("TOKEN", false, Some("rejected")));
        assert_eq!(t.get("TOKEN"), Some(false));
        // API is a child of TOKEN, so it flipped too.
        assert_eq!(t.get("API"), Some(false));
        let names = sink.names();
        assert!(names.contains(&"TOKEN".to_string()));
        assert!(names.contains(&"API".to_string()));
    }

    #[test]
    fn child_cannot_be_ok_under_bad_ancestor() {
        let (t, _) = tree();
        t.set("INTERNET", false, Some("cable unplugged"));
        t.set("API", true, None);
        assert_eq!(t.get("API"), Some(false), "ancestor still down");

        t.set("INTERNET", true, None);
        assert_eq!(t.get("API"), Some(true));
    }

    #[test]
    fn repeats_do_not_emit() {
        let (t, sink) = tree();
        t.set("HTTP", false, Some("500"));
        let first = sink.names().len();
        std::thread::sleep(COALESCE_WINDOW + Duration::from_millis(20));
        t.set("HTTP", false, Some("500 again"));
        assert_eq!(sink.names().len(), first, "same state must not re-emit");
    }

    #[test]
    fn flapping_is_coalesced() {
        let (t, sink) = tree();
        t.set("HTTP", false, Some("flap"));
        let after_first = sink.names().len();
        // Flip back immediately: inside the window, no second event.
        t.set("HTTP", true, None);
        assert_eq!(sink.names().len(), after_first);
        // State is still tracked correctly despite the suppressed event.
        assert_eq!(t.get("HTTP"), Some(true));
    }

    #[test]
    fn worst_is_deepest_own_failure() {
        let (t, _) = tree();
        t.set("HTTP", false, Some("dns"));
        t.set("TOKEN", false, Some("invalid"));

        // API fails only by inheritance; the cause to report is TOKEN.
        assert_eq!(t.get("API"), Some(false));
        let worst = t.worst().unwrap();
        assert_eq!(worst.name, "TOKEN");
        assert_eq!(worst.reason.as_deref(), Some("invalid"));
        assert!(!worst.ok);

        // Once TOKEN recovers, the remaining cause is HTTP.
        t.set("TOKEN", true, None);
        assert_eq!(t.worst().unwrap().name, "HTTP");
    }

    #[test]
    fn unknown_names_are_reported() {
        let (t, _) = tree();
        assert!(!t.set("COFFEE", false, None));
        assert!(t.get("COFFEE").is_none());
    }

    #[test]
    fn add_child_extends_the_tree() {
        let (t, _) = tree();
        assert!(t.add_child("HTTP", "CAMERA"));
        assert!(!t.add_child("HTTP", "CAMERA"), "duplicate names rejected");
        assert_eq!(t.get("CAMERA"), Some(true));
        t.set("HTTP", false, Some("down"));
        assert_eq!(t.get("CAMERA"), Some(false));
    }
}
