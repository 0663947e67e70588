use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl PropValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Int(i) => write!(f, "{}", i),
            PropValue::Bool(b) => write!(f, "{}", b),
            PropValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Text(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Text(s)
    }
}

impl From<i64> for PropValue {
    fn from(i: i64) -> Self {
        PropValue::Int(i)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Bool(b)
    }
}

pub type Props = BTreeMap<String, PropValue>;

/// Build a [`Props`] map from `key => value` pairs.
#[macro_export]
macro_rules! props {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::store::Props::new();
        $( map.insert($key.to_string(), $crate::store::PropValue::from($value)); )*
        map
    }};
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Word,
    Root,
    CorpusItem,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Word => "Word",
            Label::Root => "Root",
            Label::CorpusItem => "CorpusItem",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rel {
    /// Root -> Word, CorpusItem -> Word
    HasWord,
    /// Word -> Root
    BelongsToSemiticRoot,
}

impl Rel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rel::HasWord => "HAS_WORD",
            Rel::BelongsToSemiticRoot => "BELONGS_TO_SEMITIC_ROOT",
        }
    }
}

/// Matches nodes of one label whose properties equal any one of the
/// alternative property sets.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub label: Label,
    pub alternatives: Vec<Props>,
}

impl NodePattern {
    pub fn new(label: Label, props: Props) -> Self {
        Self {
            label,
            alternatives: vec![props],
        }
    }

    pub fn word(entry_id: &str) -> Self {
        Self::new(Label::Word, crate::props! { "entry_id" => entry_id })
    }

    pub fn root(arabic: &str) -> Self {
        Self::new(Label::Root, crate::props! { "arabic" => arabic })
    }

    /// A root spelled `text` in either its `arabic` or `n_root` property.
    pub fn root_by_text(text: &str) -> Self {
        Self {
            label: Label::Root,
            alternatives: vec![
                crate::props! { "arabic" => text },
                crate::props! { "n_root" => text },
            ],
        }
    }

    pub fn corpus_item(item_id: i64, corpus_id: i64) -> Self {
        Self::new(
            Label::CorpusItem,
            crate::props! { "item_id" => item_id, "corpus_id" => corpus_id },
        )
    }

    pub fn matches(&self, label: Label, props: &Props) -> bool {
        label == self.label
            && self
                .alternatives
                .iter()
                .any(|alt| alt.iter().all(|(k, v)| props.get(k) == Some(v)))
    }

    /// Properties used when the pattern has to be created.
    pub fn key_props(&self) -> Props {
        self.alternatives.first().cloned().unwrap_or_default()
    }
}

pub type NodeId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub props: Props,
}

impl Node {
    pub fn text(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(PropValue::as_text)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.props.get(key).and_then(PropValue::as_int)
    }
}

/// Operations the pipeline performs against the lexical graph.
///
/// Every call is its own transaction.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// `SET n += props` on every node matching `pattern`; returns the match count.
    async fn set_properties(&self, pattern: &NodePattern, props: &Props) -> Result<usize, StoreError>;

    async fn set_node(&self, id: &NodeId, props: &Props) -> Result<(), StoreError>;

    /// Find or create the node keyed by `pattern`; `on_create` is only applied
    /// to a new node. Returns the node id and whether it was created.
    async fn merge_node(
        &self,
        pattern: &NodePattern,
        on_create: &Props,
    ) -> Result<(NodeId, bool), StoreError>;

    async fn create_node(&self, label: Label, props: &Props) -> Result<NodeId, StoreError>;

    async fn find_node(&self, pattern: &NodePattern) -> Result<Option<Node>, StoreError>;

    /// Matching nodes that have none of the `absent` properties set.
    async fn find_nodes(
        &self,
        pattern: &NodePattern,
        absent: &[&str],
        limit: usize,
    ) -> Result<Vec<Node>, StoreError>;

    /// Nodes reachable over one outgoing `rel` edge from `from`.
    async fn find_related(
        &self,
        from: &NodeId,
        rel: Rel,
        target: &NodePattern,
    ) -> Result<Vec<Node>, StoreError>;

    /// Find or create a node behind an outgoing `rel` edge from `from`.
    async fn merge_related(
        &self,
        from: &NodeId,
        rel: Rel,
        target: &NodePattern,
        on_create: &Props,
    ) -> Result<(NodeId, bool), StoreError>;

    /// Some node matching `pattern` with an outgoing `rel` edge to a node
    /// matching `target`.
    async fn find_linked(
        &self,
        pattern: &NodePattern,
        rel: Rel,
        target: &NodePattern,
    ) -> Result<Option<Node>, StoreError>;

    /// Create a node together with its outgoing `rel` edge to `to`. Either both
    /// exist afterwards or neither does.
    async fn create_linked(
        &self,
        label: Label,
        props: &Props,
        rel: Rel,
        to: &NodeId,
    ) -> Result<NodeId, StoreError>;

    /// Returns true when the edge did not exist yet.
    async fn merge_edge(&self, from: &NodeId, rel: Rel, to: &NodeId) -> Result<bool, StoreError>;

    async fn count(&self, pattern: &NodePattern) -> Result<usize, StoreError>;
}
