//! Rebuilds the span hierarchy of a trace from its flat, parent-referencing
//! span list.
//!
//! Two linear passes: index every span by id, then attach each span to its
//! parent or, if the parent id is null or unknown, to the root list. Sibling
//! order is input order. Spans caught in a parent cycle are never reachable
//! from a root; they are reported by [`SpanForest::detached`] instead of
//! being walked.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::TraceSpan;

#[derive(Debug)]
pub struct SpanForest<'a> {
    spans: &'a [TraceSpan],
    roots: Vec<usize>,
    children: Vec<Vec<usize>>,
}

/// Owned-shape view of one node, convenient for JSON output.
#[derive(Debug, Serialize)]
pub struct SpanNode<'a> {
    #[serde(flatten)]
    pub span: &'a TraceSpan,
    pub children: Vec<SpanNode<'a>>,
}

impl<'a> SpanForest<'a> {
    pub fn build(spans: &'a [TraceSpan]) -> Self {
        // a repeated id resolves to its last occurrence
        let index: HashMap<&str, usize> = spans
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut roots = Vec::new();
        let mut children = vec![Vec::new(); spans.len()];
        let mut promoted = 0usize;

        for (i, span) in spans.iter().enumerate() {
            match span.parent_id.as_deref() {
                Some(parent) => match index.get(parent) {
                    Some(&p) => children[p].push(i),
                    None => {
                        promoted += 1;
                        roots.push(i);
                    }
                },
                None => roots.push(i),
            }
        }

        if promoted > 0 {
            tracing::debug!(promoted, "Spans with unknown parent promoted to roots");
        }

        let forest = Self {
            spans,
            roots,
            children,
        };

        let detached = forest.detached();
        if !detached.is_empty() {
            tracing::warn!(
                count = detached.len(),
                first = %detached[0].id,
                "Spans unreachable from any root (parent cycle)"
            );
        }

        forest
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &'a TraceSpan> + '_ {
        let spans = self.spans;
        self.roots.iter().map(move |&i| &spans[i])
    }

    /// Children of the span at input position `index`, in input order.
    pub fn children_of(&self, index: usize) -> impl Iterator<Item = &'a TraceSpan> + '_ {
        let spans = self.spans;
        self.children
            .get(index)
            .into_iter()
            .flatten()
            .map(move |&i| &spans[i])
    }

    /// Depth-first, pre-order: roots in input order, each followed by its
    /// subtree. Yields `(depth, span)` with roots at depth 0.
    pub fn walk(&self) -> DepthFirst<'_, 'a> {
        DepthFirst {
            forest: self,
            stack: self.roots.iter().rev().map(|&i| (i, 0)).collect(),
        }
    }

    /// Spans that no walk reaches: members and descendants of parent cycles.
    pub fn detached(&self) -> Vec<&'a TraceSpan> {
        let spans = self.spans;
        let mut seen = vec![false; spans.len()];
        for (i, _) in self.walk_indices() {
            seen[i] = true;
        }
        seen.iter()
            .enumerate()
            .filter(|(_, reached)| !**reached)
            .map(|(i, _)| &spans[i])
            .collect()
    }

    fn walk_indices(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&i| (i, 0)).collect();
        std::iter::from_fn(move || {
            let (i, depth) = stack.pop()?;
            stack.extend(self.children[i].iter().rev().map(|&c| (c, depth + 1)));
            Some((i, depth))
        })
    }

    pub fn tree(&self) -> Vec<SpanNode<'a>> {
        self.roots.iter().map(|&i| self.node(i)).collect()
    }

    fn node(&self, i: usize) -> SpanNode<'a> {
        let spans = self.spans;
        SpanNode {
            span: &spans[i],
            children: self.children[i].iter().map(|&c| self.node(c)).collect(),
        }
    }
}

pub struct DepthFirst<'f, 'a> {
    forest: &'f SpanForest<'a>,
    stack: Vec<(usize, usize)>,
}

impl<'f, 'a> Iterator for DepthFirst<'f, 'a> {
    type Item = (usize, &'a TraceSpan);

    fn next(&mut self) -> Option<Self::Item> {
        let (i, depth) = self.stack.pop()?;
        let forest = self.forest;
        self.stack
            .extend(forest.children[i].iter().rev().map(|&c| (c, depth + 1)));
        let spans = forest.spans;
        Some((depth, &spans[i]))
    }
}

// ============================================================================
// TESTS
// ============================================================================
