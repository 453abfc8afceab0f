//! Tree serialization: flat table rows and nested JSON documents
//!
//! Both read paths share the duration-threshold filter: a subtree survives
//! when the node itself passes on its own merit (threshold zero, unknown
//! duration, or `spent` at/above the threshold) or when any descendant does.
//! An ancestor kept only for a passing descendant still emits its own
//! row/document so the descendant keeps its path context — even when the
//! ancestor's own duration is below the threshold. That is the intended
//! filtering contract, surprising as the lone ancestor row can look.
//!
//! Optional fields follow an explicit dynamic-shape convention: absent means
//! omitted from serialized output (`meta`, `error`, `end`, `spent` when the
//! node is incomplete, `blocking` when false), never emitted as null or a
//! default.

use serde::Serialize;

use crate::timer::{Meta, TimerId, TimerNode, TimerTree};

fn is_false(value: &bool) -> bool {
    !*value
}

/// One flat row of [`TimerTree::to_table`] output
///
/// `name` is the colon-joined path from the rendered root, e.g.
/// `request:parse:tokenize`. `meta` is serialized to JSON text so the row
/// stays flat for row-oriented log sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    /// Start reading in milliseconds
    pub start: u64,
    /// End reading, absent while the timer is still open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    /// Colon-joined path from the rendered root
    pub name: String,
    /// Captured failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Elapsed milliseconds, absent while the timer is still open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spent: Option<u64>,
    /// Meta mapping rendered as JSON text, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    /// Blocking annotation, emitted only when true
    #[serde(skip_serializing_if = "is_false")]
    pub blocking: bool,
}

/// One node of [`TimerTree::to_json`] output, mirroring the tree shape
///
/// Unlike [`TableRow`], `name` is the bare node name and `meta` is the
/// original mapping. `children` holds only the subtrees that survived the
/// filter and is omitted from serialized output when empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceDocument {
    /// Start reading in milliseconds
    pub start: u64,
    /// End reading, absent while the timer is still open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    /// Bare node name
    pub name: String,
    /// Captured failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Elapsed milliseconds, absent while the timer is still open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spent: Option<u64>,
    /// Meta mapping, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    /// Blocking annotation, emitted only when true
    #[serde(skip_serializing_if = "is_false")]
    pub blocking: bool,
    /// Surviving child documents, in insertion order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceDocument>,
}

impl TimerTree {
    /// Render `root` and its descendants as flat rows in pre-order
    ///
    /// With `min_spent_millis` of zero every node is emitted, one row per
    /// node. With a positive threshold, subtrees in which neither the node
    /// nor any descendant passes are omitted entirely; a node that is still
    /// open (no `end`) always passes. Never fails; an incomplete node simply
    /// renders without `end` and `spent`.
    pub fn to_table(&self, root: TimerId, min_spent_millis: u64) -> Vec<TableRow> {
        self.to_table_prefixed(root, min_spent_millis, "")
    }

    /// Like [`to_table`](TimerTree::to_table) with an external path prefix
    ///
    /// A non-empty `name_prefix` is prepended (colon-joined) to every row
    /// name, as if the rendered root were attached under that path.
    pub fn to_table_prefixed(
        &self,
        root: TimerId,
        min_spent_millis: u64,
        name_prefix: &str,
    ) -> Vec<TableRow> {
        let mut rows = Vec::new();
        if self.subtree_passes(root, min_spent_millis) {
            self.push_rows(root, min_spent_millis, name_prefix, &mut rows);
        }
        rows
    }

    /// Render `root` and its descendants as a nested document
    ///
    /// The root document is always rendered; the filter prunes child
    /// subtrees at each level with the same policy as
    /// [`to_table`](TimerTree::to_table). Leaf documents serialize without a
    /// `children` field.
    pub fn to_json(&self, root: TimerId, min_spent_millis: u64) -> TraceDocument {
        let node = self.node(root);
        TraceDocument {
            start: node.start,
            end: node.end,
            name: node.name.clone(),
            error: node.error.clone(),
            spent: node.spent(),
            meta: node.meta.clone(),
            blocking: node.blocking,
            children: node
                .children
                .iter()
                .filter(|&&child| self.subtree_passes(child, min_spent_millis))
                .map(|&child| self.to_json(child, min_spent_millis))
                .collect(),
        }
    }

    fn push_rows(&self, id: TimerId, min: u64, prefix: &str, rows: &mut Vec<TableRow>) {
        let node = self.node(id);
        let path = if prefix.is_empty() {
            node.name.clone()
        } else {
            format!("{prefix}:{}", node.name)
        };
        rows.push(TableRow {
            start: node.start,
            end: node.end,
            name: path.clone(),
            error: node.error.clone(),
            spent: node.spent(),
            meta: node
                .meta
                .as_ref()
                .map(|meta| serde_json::Value::Object(meta.clone()).to_string()),
            blocking: node.blocking,
        });
        for &child in &node.children {
            if self.subtree_passes(child, min) {
                self.push_rows(child, min, &path, rows);
            }
        }
    }

    /// Self-or-any-descendant filter shared by both renderings
    fn subtree_passes(&self, id: TimerId, min: u64) -> bool {
        let node = self.node(id);
        passes_alone(node, min)
            || node
                .children
                .iter()
                .any(|&child| self.subtree_passes(child, min))
    }
}

/// A node passes on its own merit when there is no threshold, its duration is
/// still unknown, or its duration meets the threshold.
fn passes_alone(node: &TimerNode, min: u64) -> bool {
    if min == 0 {
        return true;
    }
    match node.spent() {
        None => true,
        Some(spent) => spent >= min,
    }
}
