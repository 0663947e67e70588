use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{GraphStore, Label, Node, NodeId, NodePattern, Props, Rel};

#[derive(Debug, Clone)]
struct StoredNode {
    label: Label,
    props: Props,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: Vec<StoredNode>,
    edges: BTreeSet<(usize, &'static str, usize)>,
}

impl Inner {
    fn node(&self, index: usize) -> Node {
        Node {
            id: index.to_string(),
            props: self.nodes[index].props.clone(),
        }
    }

    fn matching(&self, pattern: &NodePattern) -> impl Iterator<Item = usize> + '_ {
        let pattern = pattern.clone();
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| pattern.matches(n.label, &n.props))
            .map(|(i, _)| i)
    }

    fn index(&self, id: &NodeId) -> Result<usize, StoreError> {
        id.parse::<usize>()
            .ok()
            .filter(|i| *i < self.nodes.len())
            .ok_or_else(|| StoreError::Query(format!("no node with id {}", id)))
    }

    fn insert(&mut self, label: Label, props: Props) -> usize {
        self.nodes.push(StoredNode { label, props });
        self.nodes.len() - 1
    }
}

/// In-process graph used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Query("memory store lock poisoned".to_string()))
    }

    /// Snapshot of every node with its label, in insertion order.
    pub fn nodes(&self) -> Vec<(Label, Props)> {
        self.lock()
            .map(|inner| {
                inner
                    .nodes
                    .iter()
                    .map(|n| (n.label, n.props.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.lock().map(|inner| inner.edges.len()).unwrap_or(0)
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn set_properties(&self, pattern: &NodePattern, props: &Props) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let hits: Vec<usize> = inner.matching(pattern).collect();
        for &i in &hits {
            inner.nodes[i].props.extend(props.clone());
        }
        Ok(hits.len())
    }

    async fn set_node(&self, id: &NodeId, props: &Props) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let i = inner.index(id)?;
        inner.nodes[i].props.extend(props.clone());
        Ok(())
    }

    async fn merge_node(
        &self,
        pattern: &NodePattern,
        on_create: &Props,
    ) -> Result<(NodeId, bool), StoreError> {
        let mut inner = self.lock()?;
        if let Some(i) = inner.matching(pattern).next() {
            return Ok((i.to_string(), false));
        }
        let mut props = pattern.key_props();
        props.extend(on_create.clone());
        Ok((inner.insert(pattern.label, props).to_string(), true))
    }

    async fn create_node(&self, label: Label, props: &Props) -> Result<NodeId, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner.insert(label, props.clone()).to_string())
    }

    async fn find_node(&self, pattern: &NodePattern) -> Result<Option<Node>, StoreError> {
        let inner = self.lock()?;
        let found = inner.matching(pattern).next();
        Ok(found.map(|i| inner.node(i)))
    }

    async fn find_nodes(
        &self,
        pattern: &NodePattern,
        absent: &[&str],
        limit: usize,
    ) -> Result<Vec<Node>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .matching(pattern)
            .filter(|&i| absent.iter().all(|k| !inner.nodes[i].props.contains_key(*k)))
            .take(limit)
            .map(|i| inner.node(i))
            .collect())
    }

    async fn find_related(
        &self,
        from: &NodeId,
        rel: Rel,
        target: &NodePattern,
    ) -> Result<Vec<Node>, StoreError> {
        let inner = self.lock()?;
        let from = inner.index(from)?;
        Ok(inner
            .edges
            .iter()
            .filter(|(src, r, _)| *src == from && *r == rel.as_str())
            .map(|(_, _, dst)| *dst)
            .filter(|&dst| target.matches(inner.nodes[dst].label, &inner.nodes[dst].props))
            .map(|dst| inner.node(dst))
            .collect())
    }

    async fn merge_related(
        &self,
        from: &NodeId,
        rel: Rel,
        target: &NodePattern,
        on_create: &Props,
    ) -> Result<(NodeId, bool), StoreError> {
        let mut inner = self.lock()?;
        let src = inner.index(from)?;
        let existing = inner
            .edges
            .iter()
            .filter(|(s, r, _)| *s == src && *r == rel.as_str())
            .map(|(_, _, dst)| *dst)
            .find(|&dst| target.matches(inner.nodes[dst].label, &inner.nodes[dst].props));
        if let Some(dst) = existing {
            return Ok((dst.to_string(), false));
        }

        let mut props = target.key_props();
        props.extend(on_create.clone());
        let dst = inner.insert(target.label, props);
        inner.edges.insert((src, rel.as_str(), dst));
        Ok((dst.to_string(), true))
    }

    async fn find_linked(
        &self,
        pattern: &NodePattern,
        rel: Rel,
        target: &NodePattern,
    ) -> Result<Option<Node>, StoreError> {
        let inner = self.lock()?;
        let found = inner
            .edges
            .iter()
            .filter(|(_, r, _)| *r == rel.as_str())
            .find(|&&(src, _, dst)| {
                let (from, to) = (&inner.nodes[src], &inner.nodes[dst]);
                pattern.matches(from.label, &from.props) && target.matches(to.label, &to.props)
            })
            .map(|&(src, _, _)| src);
        Ok(found.map(|i| inner.node(i)))
    }

    async fn create_linked(
        &self,
        label: Label,
        props: &Props,
        rel: Rel,
        to: &NodeId,
    ) -> Result<NodeId, StoreError> {
        let mut inner = self.lock()?;
        let dst = inner.index(to)?;
        let src = inner.insert(label, props.clone());
        inner.edges.insert((src, rel.as_str(), dst));
        Ok(src.to_string())
    }

    async fn merge_edge(&self, from: &NodeId, rel: Rel, to: &NodeId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let src = inner.index(from)?;
        let dst = inner.index(to)?;
        Ok(inner.edges.insert((src, rel.as_str(), dst)))
    }

    async fn count(&self, pattern: &NodePattern) -> Result<usize, StoreError> {
        Ok(self.lock()?.matching(pattern).count())
    }
}
