//! Hierarchical layout of the flow graph for the visual editor.
//!
//! The graph is not guaranteed to be a tree: screens link back to earlier
//! screens and several screens may share a child. Placement walks from the
//! roots depth first with a visiting set, so cycles terminate and every
//! node is placed exactly once. Leaves take consecutive horizontal slots and
//! parents sit over the centroid of the children they placed.
//!
//! The engine keeps no state between calls; every layout is computed from
//! the document snapshot it is given.

use crate::flow::document::FlowDocument;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub const NODE_WIDTH: f64 = 250.0;
pub const HORIZONTAL_GAP: f64 = 50.0;
pub const SLOT_WIDTH: f64 = NODE_WIDTH + HORIZONTAL_GAP;
pub const VERTICAL_SPACING: f64 = 200.0;

const LABEL_MAX_CHARS: usize = 40;

const BACK_EDGE_Z: i32 = 0;
const WEBHOOK_EDGE_Z: i32 = 1;
const FORWARD_EDGE_BASE_Z: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodePosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub depth: usize,
    pub label: String,
    /// Referenced by a button or webhook but not defined in the document
    pub missing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Back,
    Webhook,
    Forward,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeStyle {
    pub stroke: &'static str,
    pub dashed: bool,
    pub animated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeLayout {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
    pub kind: EdgeKind,
    pub style: EdgeStyle,
    pub z_index: i32,
    pub broken: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowLayout {
    pub nodes: Vec<NodePosition>,
    pub edges: Vec<EdgeLayout>,
}

impl FlowLayout {
    pub fn node(&self, id: &str) -> Option<&NodePosition> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

struct RawEdge {
    id: String,
    source: String,
    target: String,
    label: String,
    webhook: bool,
}

/// Graph extracted from a document: nodes in a stable order, edges in
/// document order.
struct FlowGraph {
    nodes: Vec<String>,
    defined: HashSet<String>,
    edges: Vec<RawEdge>,
    children: HashMap<String, Vec<String>>,
}

impl FlowGraph {
    fn from_document(document: &FlowDocument) -> Self {
        let mut nodes: Vec<String> = document.screens.keys().cloned().collect();
        let defined: HashSet<String> = nodes.iter().cloned().collect();
        let mut known = defined.clone();
        let mut edges = Vec::new();

        for (source, entry) in &document.screens {
            let mut index = 0;
            for node in entry.nodes() {
                for button in node.buttons() {
                    if let Some(target) = button.target() {
                        edges.push(RawEdge {
                            id: format!("e-{}-{}-{}", source, target, index),
                            source: source.clone(),
                            target: target.to_string(),
                            label: button.text.clone(),
                            webhook: false,
                        });
                        index += 1;
                    }
                }
                if let Some(target) = node.webhook_target() {
                    edges.push(RawEdge {
                        id: format!("wh-{}-{}", source, target),
                        source: source.clone(),
                        target: target.to_string(),
                        label: "on payment".to_string(),
                        webhook: true,
                    });
                }
            }
        }

        // Dangling targets become nodes in the order they are first referenced
        for edge in &edges {
            if known.insert(edge.target.clone()) {
                nodes.push(edge.target.clone());
            }
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &edges {
            if edge.source == edge.target {
                continue;
            }
            let list = children.entry(edge.source.clone()).or_default();
            if !list.contains(&edge.target) {
                list.push(edge.target.clone());
            }
        }

        Self {
            nodes,
            defined,
            edges,
            children,
        }
    }

    fn roots(&self, initial_screen: Option<&str>) -> Vec<String> {
        let has_incoming: HashSet<&str> = self
            .edges
            .iter()
            .filter(|edge| edge.source != edge.target)
            .map(|edge| edge.target.as_str())
            .collect();

        let mut roots = Vec::new();
        if let Some(initial) = initial_screen.filter(|id| self.defined.contains(*id)) {
            roots.push(initial.to_string());
        }
        for node in &self.nodes {
            if !has_incoming.contains(node.as_str()) && !roots.contains(node) {
                roots.push(node.clone());
            }
        }

        // Pure cycle: start anywhere
        if roots.is_empty() {
            if let Some(first) = self.nodes.first() {
                roots.push(first.clone());
            }
        }
        roots
    }
}

struct Placement<'g> {
    graph: &'g FlowGraph,
    positions: HashMap<String, (f64, usize)>,
    visiting: HashSet<String>,
    next_slot: usize,
}

impl<'g> Placement<'g> {
    fn new(graph: &'g FlowGraph) -> Self {
        Self {
            graph,
            positions: HashMap::new(),
            visiting: HashSet::new(),
            next_slot: 0,
        }
    }

    /// Places `id` and its unplaced descendants, returning the x it was given.
    ///
    /// Nodes already on the current path or already placed under another
    /// parent contribute no span and return `None`. The walk keeps its own
    /// stack so long chains of screens cannot exhaust the thread's stack.
    fn place(&mut self, id: &str, depth: usize) -> Option<f64> {
        if self.is_settled_or_open(id) {
            return None;
        }

        let graph = self.graph;
        let mut stack = vec![Frame::new(id.to_string(), depth)];
        self.visiting.insert(id.to_string());

        while let Some(frame) = stack.last_mut() {
            let next = graph
                .children
                .get(&frame.id)
                .and_then(|children| children.get(frame.next_child));

            if let Some(child) = next {
                frame.next_child += 1;
                if self.is_settled_or_open(child) {
                    continue;
                }
                let child_depth = frame.depth + 1;
                self.visiting.insert(child.clone());
                stack.push(Frame::new(child.clone(), child_depth));
                continue;
            }

            let Some(done) = stack.pop() else { break };
            let x = if done.child_xs.is_empty() {
                let x = self.next_slot as f64 * SLOT_WIDTH;
                self.next_slot += 1;
                x
            } else {
                done.child_xs.iter().sum::<f64>() / done.child_xs.len() as f64
            };

            self.visiting.remove(&done.id);
            self.positions.insert(done.id, (x, done.depth));

            match stack.last_mut() {
                Some(parent) => parent.child_xs.push(x),
                None => return Some(x),
            }
        }
        None
    }

    fn is_settled_or_open(&self, id: &str) -> bool {
        self.positions.contains_key(id) || self.visiting.contains(id)
    }
}

/// A node whose children are still being placed.
struct Frame {
    id: String,
    depth: usize,
    next_child: usize,
    child_xs: Vec<f64>,
}

impl Frame {
    fn new(id: String, depth: usize) -> Self {
        Self {
            id,
            depth,
            next_child: 0,
            child_xs: Vec::new(),
        }
    }
}

pub struct FlowLayoutEngine;

impl FlowLayoutEngine {
    pub fn layout(document: &FlowDocument) -> FlowLayout {
        let graph = FlowGraph::from_document(document);
        let mut placement = Placement::new(&graph);

        for root in graph.roots(document.initial_screen.as_deref()) {
            placement.place(&root, 0);
        }
        // Nodes only reachable through a cycle that no root enters
        for node in &graph.nodes {
            placement.place(node, 0);
        }

        let positions = placement.positions;

        let nodes = graph
            .nodes
            .iter()
            .map(|id| {
                let (x, depth) = positions.get(id).copied().unwrap_or((0.0, 0));
                NodePosition {
                    id: id.clone(),
                    x,
                    y: depth as f64 * VERTICAL_SPACING,
                    depth,
                    label: node_label(document, id),
                    missing: !graph.defined.contains(id),
                }
            })
            .collect();

        let edges = graph
            .edges
            .iter()
            .map(|edge| {
                let (source_x, source_depth) =
                    positions.get(&edge.source).copied().unwrap_or((0.0, 0));
                let (target_x, target_depth) =
                    positions.get(&edge.target).copied().unwrap_or((0.0, 0));
                let broken = !graph.defined.contains(&edge.target);

                let kind = if edge.webhook {
                    EdgeKind::Webhook
                } else if target_depth <= source_depth {
                    EdgeKind::Back
                } else {
                    EdgeKind::Forward
                };

                EdgeLayout {
                    id: edge.id.clone(),
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    label: edge.label.clone(),
                    kind,
                    style: edge_style(kind, broken),
                    z_index: edge_z_index(kind, (source_x - target_x).abs()),
                    broken,
                }
            })
            .collect();

        FlowLayout { nodes, edges }
    }
}

/// Straighter forward edges draw over long diagonal ones.
fn edge_z_index(kind: EdgeKind, horizontal_span: f64) -> i32 {
    match kind {
        EdgeKind::Back => BACK_EDGE_Z,
        EdgeKind::Webhook => WEBHOOK_EDGE_Z,
        EdgeKind::Forward => {
            let closeness = 1000.0 / (1.0 + horizontal_span / SLOT_WIDTH);
            FORWARD_EDGE_BASE_Z + closeness.round() as i32
        }
    }
}

fn edge_style(kind: EdgeKind, broken: bool) -> EdgeStyle {
    let mut style = match kind {
        EdgeKind::Back => EdgeStyle {
            stroke: "#94a3b8",
            dashed: true,
            animated: false,
        },
        EdgeKind::Webhook => EdgeStyle {
            stroke: "#22c55e",
            dashed: false,
            animated: true,
        },
        EdgeKind::Forward => EdgeStyle {
            stroke: "#64748b",
            dashed: false,
            animated: false,
        },
    };
    if broken {
        style.stroke = "#ef4444";
    }
    style
}

fn node_label(document: &FlowDocument, id: &str) -> String {
    let text = document
        .screen(id)
        .and_then(|entry| entry.first_text_node())
        .and_then(|node| node.text.as_deref())
        .map(str::trim)
        .unwrap_or_default();

    if text.is_empty() {
        return id.to_string();
    }

    let mut label: String = text.chars().take(LABEL_MAX_CHARS).collect();
    if text.chars().count() > LABEL_MAX_CHARS {
        label.push('…');
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(raw: &str) -> FlowDocument {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn leaves_take_consecutive_slots_and_parents_center() {
        let doc = document(
            r#"{"initial_screen": "start", "screens": {
                "start": {"text": "Welcome", "buttons": [[{"text": "A", "callback": "goto_a"}, {"text": "B", "callback": "goto_b"}]]},
                "a": {"text": "A"},
                "b": {"text": "B"}
            }}"#,
        );

        let layout = FlowLayoutEngine::layout(&doc);

        assert_eq!(layout.node("a").unwrap().x, 0.0);
        assert_eq!(layout.node("b").unwrap().x, SLOT_WIDTH);
        let start = layout.node("start").unwrap();
        assert_eq!(start.x, SLOT_WIDTH / 2.0);
        assert_eq!(start.y, 0.0);
        assert_eq!(layout.node("a").unwrap().y, VERTICAL_SPACING);
        assert_eq!(start.label, "Welcome");
    }

    #[test]
    fn edge_ids_follow_source_target_index() {
        let doc = document(
            r#"{"screens": {
                "start": [{"buttons": [[{"text": "Go", "callback": "goto_pay"}]]}, {"buttons": [[{"text": "Again", "callback": "goto_pay"}, {"text": "Site", "url": "https://x"}]]}],
                "pay": {"type": "payment", "webhook": "ok"},
                "ok": {"text": "Paid"}
            }}"#,
        );

        let layout = FlowLayoutEngine::layout(&doc);
        let ids: Vec<&str> = layout.edges.iter().map(|e| e.id.as_str()).collect();

        assert!(ids.contains(&"e-start-pay-0"));
        assert!(ids.contains(&"e-start-pay-1"));
        assert!(ids.contains(&"wh-pay-ok"));
        assert_eq!(layout.edges.len(), 3);
    }

    #[test]
    fn forward_edges_rank_by_straightness() {
        assert_eq!(edge_z_index(EdgeKind::Forward, 0.0), 1010);
        assert_eq!(edge_z_index(EdgeKind::Forward, SLOT_WIDTH), 510);
        assert!(edge_z_index(EdgeKind::Forward, 50.0 * SLOT_WIDTH) > WEBHOOK_EDGE_Z);
        assert_eq!(edge_z_index(EdgeKind::Webhook, 0.0), WEBHOOK_EDGE_Z);
        assert_eq!(edge_z_index(EdgeKind::Back, 0.0), BACK_EDGE_Z);
    }

    #[test]
    fn self_loops_are_back_edges() {
        let doc = document(
            r#"{"screens": {"menu": {"text": "Menu", "buttons": [[{"text": "Refresh", "callback": "goto_menu"}]]}}}"#,
        );

        let layout = FlowLayoutEngine::layout(&doc);

        assert_eq!(layout.nodes.len(), 1);
        assert_eq!(layout.edges[0].kind, EdgeKind::Back);
        assert!(layout.edges[0].style.dashed);
    }

    #[test]
    fn long_labels_are_truncated() {
        let doc = document(
            r#"{"screens": {"s": {"text": "This welcome text is definitely longer than forty characters"}}}"#,
        );

        let label = &FlowLayoutEngine::layout(&doc).nodes[0].label;
        assert_eq!(label.chars().count(), LABEL_MAX_CHARS + 1);
        assert!(label.ends_with('…'));
    }
}
