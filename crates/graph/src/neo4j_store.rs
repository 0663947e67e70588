use async_trait::async_trait;
use neo4rs::{BoltMap, BoltString, BoltType, Graph, Query, Row};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{GraphStore, Label, Node, NodeId, NodePattern, PropValue, Props, Rel};

impl From<PropValue> for BoltType {
    fn from(value: PropValue) -> Self {
        match value {
            PropValue::Int(i) => BoltType::from(i),
            PropValue::Bool(b) => BoltType::from(b),
            PropValue::Text(s) => BoltType::from(s),
        }
    }
}

fn bolt_map(props: &Props) -> BoltType {
    let mut map = BoltMap::new();
    for (key, value) in props {
        map.put(BoltString::from(key.as_str()), BoltType::from(value.clone()));
    }
    BoltType::Map(map)
}

fn prop_from_bolt(value: BoltType) -> Option<PropValue> {
    match value {
        BoltType::String(s) => Some(PropValue::Text(s.value)),
        BoltType::Integer(i) => Some(PropValue::Int(i.value)),
        BoltType::Boolean(b) => Some(PropValue::Bool(b.value)),
        BoltType::Float(f) => Some(PropValue::Text(f.value.to_string())),
        _ => None,
    }
}

fn props_from_bolt(value: BoltType) -> Props {
    match value {
        BoltType::Map(map) => map
            .value
            .into_iter()
            .filter_map(|(k, v)| prop_from_bolt(v).map(|p| (k.value, p)))
            .collect(),
        _ => Props::new(),
    }
}

fn node_from_row(row: &Row) -> Node {
    Node {
        id: row.get::<String>("id").unwrap_or_default(),
        props: row
            .get::<BoltType>("props")
            .map(props_from_bolt)
            .unwrap_or_default(),
    }
}

/// Cypher text plus the parameters it refers to.
struct Cypher {
    text: String,
    params: Vec<(String, BoltType)>,
}

impl Cypher {
    fn new() -> Self {
        Self {
            text: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, fragment: &str) -> &mut Self {
        self.text.push_str(fragment);
        self.text.push('\n');
        self
    }

    fn param(&mut self, name: &str, value: impl Into<BoltType>) -> &mut Self {
        self.params.push((name.to_string(), value.into()));
        self
    }

    /// `(n.a = $p0_0 AND n.b = $p0_1) OR (...)` for the pattern's alternatives.
    fn condition(&mut self, var: &str, pattern: &NodePattern) -> String {
        let mut alternatives = Vec::new();
        for (a, props) in pattern.alternatives.iter().enumerate() {
            let mut terms = Vec::new();
            for (p, (key, value)) in props.iter().enumerate() {
                let name = format!("{}{}_{}", var, a, p);
                terms.push(format!("{}.`{}` = ${}", var, key, name));
                self.param(&name, value.clone());
            }
            if terms.is_empty() {
                alternatives.push("true".to_string());
            } else {
                alternatives.push(format!("({})", terms.join(" AND ")));
            }
        }
        if alternatives.is_empty() {
            "true".to_string()
        } else {
            format!("({})", alternatives.join(" OR "))
        }
    }

    fn query(&self) -> Query {
        self.params
            .iter()
            .fold(Query::new(self.text.clone()), |q, (k, v)| q.param(k, v.clone()))
    }
}

/// [`GraphStore`] backed by a Neo4j server over Bolt.
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, StoreError> {
        let graph = Graph::new(uri, user, password).await?;
        graph.run(Query::new("RETURN 1".to_string())).await?;
        info!(uri = uri, "Connected to Neo4j");
        Ok(Self::new(graph))
    }

    /// Initialize schema: create lookup indexes
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let indexes = [
            ("word_entry_id_index", "Word", "entry_id"),
            ("root_arabic_index", "Root", "arabic"),
            ("root_sem_id_index", "Root", "sem_id"),
            ("corpus_item_id_index", "CorpusItem", "item_id"),
        ];
        for (name, label, key) in indexes {
            let query = Query::new(format!(
                "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
                name, label, key
            ));
            self.graph.run(query).await?;
        }
        debug!(count = indexes.len(), "Neo4j indexes ensured");
        Ok(())
    }

    /// Release the connection pool.
    pub fn close(self) {
        drop(self.graph);
        info!("Neo4j connection closed");
    }

    async fn fetch(&self, cypher: &Cypher) -> Result<Vec<Row>, StoreError> {
        let mut result = self.graph.execute(cypher.query()).await?;
        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_count(&self, cypher: &Cypher) -> Result<usize, StoreError> {
        let rows = self.fetch(cypher).await?;
        Ok(rows
            .first()
            .map(|row| row.get::<i64>("count").unwrap_or(0) as usize)
            .unwrap_or(0))
    }

    async fn fetch_id(&self, cypher: &Cypher) -> Result<NodeId, StoreError> {
        self.fetch(cypher)
            .await?
            .first()
            .map(|row| row.get::<String>("id").unwrap_or_default())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StoreError::Query("query returned no node".to_string()))
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn set_properties(&self, pattern: &NodePattern, props: &Props) -> Result<usize, StoreError> {
        let mut cypher = Cypher::new();
        let condition = cypher.condition("n", pattern);
        cypher
            .push(&format!("MATCH (n:{}) WHERE {}", pattern.label.as_str(), condition))
            .push("SET n += $props")
            .push("RETURN count(n) AS count")
            .param("props", bolt_map(props));
        self.fetch_count(&cypher).await
    }

    async fn set_node(&self, id: &NodeId, props: &Props) -> Result<(), StoreError> {
        let mut cypher = Cypher::new();
        cypher
            .push("MATCH (n) WHERE elementId(n) = $id")
            .push("SET n += $props")
            .param("id", id.clone())
            .param("props", bolt_map(props));
        self.graph.run(cypher.query()).await?;
        Ok(())
    }

    async fn merge_node(
        &self,
        pattern: &NodePattern,
        on_create: &Props,
    ) -> Result<(NodeId, bool), StoreError> {
        if let Some(node) = self.find_node(pattern).await? {
            return Ok((node.id, false));
        }
        let mut props = pattern.key_props();
        props.extend(on_create.clone());
        let id = self.create_node(pattern.label, &props).await?;
        Ok((id, true))
    }

    async fn create_node(&self, label: Label, props: &Props) -> Result<NodeId, StoreError> {
        let mut cypher = Cypher::new();
        cypher
            .push(&format!("CREATE (n:{})", label.as_str()))
            .push("SET n += $props")
            .push("RETURN elementId(n) AS id")
            .param("props", bolt_map(props));
        self.fetch_id(&cypher).await
    }

    async fn find_node(&self, pattern: &NodePattern) -> Result<Option<Node>, StoreError> {
        Ok(self.find_nodes(pattern, &[], 1).await?.into_iter().next())
    }

    async fn find_nodes(
        &self,
        pattern: &NodePattern,
        absent: &[&str],
        limit: usize,
    ) -> Result<Vec<Node>, StoreError> {
        let mut cypher = Cypher::new();
        let mut condition = cypher.condition("n", pattern);
        for key in absent {
            condition.push_str(&format!(" AND n.`{}` IS NULL", key));
        }
        cypher
            .push(&format!("MATCH (n:{}) WHERE {}", pattern.label.as_str(), condition))
            .push("RETURN elementId(n) AS id, properties(n) AS props")
            .push("LIMIT $limit")
            .param("limit", limit as i64);
        Ok(self.fetch(&cypher).await?.iter().map(node_from_row).collect())
    }

    async fn find_related(
        &self,
        from: &NodeId,
        rel: Rel,
        target: &NodePattern,
    ) -> Result<Vec<Node>, StoreError> {
        let mut cypher = Cypher::new();
        let condition = cypher.condition("n", target);
        cypher
            .push(&format!(
                "MATCH (a)-[:{}]->(n:{})",
                rel.as_str(),
                target.label.as_str()
            ))
            .push(&format!("WHERE elementId(a) = $from AND {}", condition))
            .push("RETURN elementId(n) AS id, properties(n) AS props")
            .param("from", from.clone());
        Ok(self.fetch(&cypher).await?.iter().map(node_from_row).collect())
    }

    async fn merge_related(
        &self,
        from: &NodeId,
        rel: Rel,
        target: &NodePattern,
        on_create: &Props,
    ) -> Result<(NodeId, bool), StoreError> {
        if let Some(node) = self.find_related(from, rel, target).await?.into_iter().next() {
            return Ok((node.id, false));
        }

        let mut props = target.key_props();
        props.extend(on_create.clone());
        let mut cypher = Cypher::new();
        cypher
            .push("MATCH (a) WHERE elementId(a) = $from")
            .push(&format!(
                "CREATE (a)-[:{}]->(n:{})",
                rel.as_str(),
                target.label.as_str()
            ))
            .push("SET n += $props")
            .push("RETURN elementId(n) AS id")
            .param("from", from.clone())
            .param("props", bolt_map(&props));
        Ok((self.fetch_id(&cypher).await?, true))
    }

    async fn find_linked(
        &self,
        pattern: &NodePattern,
        rel: Rel,
        target: &NodePattern,
    ) -> Result<Option<Node>, StoreError> {
        let mut cypher = Cypher::new();
        let source = cypher.condition("n", pattern);
        let dest = cypher.condition("t", target);
        cypher
            .push(&format!(
                "MATCH (n:{})-[:{}]->(t:{})",
                pattern.label.as_str(),
                rel.as_str(),
                target.label.as_str()
            ))
            .push(&format!("WHERE {} AND {}", source, dest))
            .push("RETURN elementId(n) AS id, properties(n) AS props")
            .push("LIMIT 1");
        Ok(self.fetch(&cypher).await?.first().map(node_from_row))
    }

    async fn create_linked(
        &self,
        label: Label,
        props: &Props,
        rel: Rel,
        to: &NodeId,
    ) -> Result<NodeId, StoreError> {
        let mut cypher = Cypher::new();
        cypher
            .push("MATCH (t) WHERE elementId(t) = $to")
            .push(&format!("CREATE (n:{})-[:{}]->(t)", label.as_str(), rel.as_str()))
            .push("SET n += $props")
            .push("RETURN elementId(n) AS id")
            .param("to", to.clone())
            .param("props", bolt_map(props));
        self.fetch_id(&cypher).await
    }

    async fn merge_edge(&self, from: &NodeId, rel: Rel, to: &NodeId) -> Result<bool, StoreError> {
        let mut cypher = Cypher::new();
        cypher
            .push("MATCH (a) WHERE elementId(a) = $from")
            .push("MATCH (b) WHERE elementId(b) = $to")
            .push(&format!("OPTIONAL MATCH (a)-[existing:{}]->(b)", rel.as_str()))
            .push("WITH a, b, count(existing) AS before")
            .push(&format!("MERGE (a)-[:{}]->(b)", rel.as_str()))
            .push("RETURN before AS count")
            .param("from", from.clone())
            .param("to", to.clone());
        let rows = self.fetch(&cypher).await?;
        if rows.is_empty() {
            return Err(StoreError::Query(format!(
                "cannot link {} to {}: node missing",
                from, to
            )));
        }
        Ok(rows[0].get::<i64>("count").unwrap_or(0) == 0)
    }

    async fn count(&self, pattern: &NodePattern) -> Result<usize, StoreError> {
        let mut cypher = Cypher::new();
        let condition = cypher.condition("n", pattern);
        cypher
            .push(&format!("MATCH (n:{}) WHERE {}", pattern.label.as_str(), condition))
            .push("RETURN count(n) AS count");
        self.fetch_count(&cypher).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;

    #[test]
    fn test_condition_binds_every_alternative() {
        let mut cypher = Cypher::new();
        let condition = cypher.condition("n", &NodePattern::root_by_text("س-ل-م"));
        assert_eq!(condition, "((n.`arabic` = $n0_0) OR (n.`n_root` = $n1_0))");
        assert_eq!(cypher.params.len(), 2);
    }

    #[test]
    fn test_two_patterns_use_distinct_parameters() {
        let mut cypher = Cypher::new();
        let source = cypher.condition("n", &NodePattern::word("E1"));
        let dest = cypher.condition("t", &NodePattern::root("س-ل-م"));
        assert_eq!(source, "((n.`entry_id` = $n0_0))");
        assert_eq!(dest, "((t.`arabic` = $t0_0))");
        assert_eq!(cypher.params.len(), 2);
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        let mut cypher = Cypher::new();
        let condition = cypher.condition("n", &NodePattern::new(Label::Word, props! {}));
        assert_eq!(condition, "(true)");
        assert!(cypher.params.is_empty());
    }
}
