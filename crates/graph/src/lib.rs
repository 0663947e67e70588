//! Lexical graph access: the store abstraction, the Neo4j and in-memory
//! backends, and the operations that write annotations and Semitic
//! reference data into the graph.

pub mod corpus;
pub mod error;
pub mod memory;
pub mod neo4j_store;
pub mod reconcile;
pub mod retry;
pub mod roots;
pub mod store;
pub mod throttle;
pub mod wazn;
pub mod words;

pub use corpus::{CorpusLinkReport, CorpusLinker};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use neo4j_store::Neo4jStore;
pub use reconcile::{ReconcileReport, Reconciler, write_unmatched_report};
pub use retry::RetryPolicy;
pub use roots::{ReconstructedRoot, RootIngestReport, RootIngestor, RootType, reconstruct_root};
pub use store::{GraphStore, Label, Node, NodeId, NodePattern, PropValue, Props, Rel};
pub use throttle::Throttle;
pub use wazn::{WaznReport, apply_itype_wazn};
pub use words::{WordIngestReport, WordIngestor, resolve_sem_id};
