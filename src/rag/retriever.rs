//! # Retriever
//!
//! Embeds a query and maps the nearest index rows back to passages. The
//! [`KnowledgeBase`] bundles the store and the embedder; it is built once at
//! startup and shared read-only by every request and voice session.

use crate::rag::embedder::Embedder;
use crate::rag::error::RagError;
use crate::rag::passage::{Passage, PassageStore};
use std::sync::Arc;
use tracing::debug;

/// A retrieved passage with the index data it was found with.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub position: usize,
    pub distance: f32,
}

/// Passage store plus the embedder that produced its index.
pub struct KnowledgeBase {
    store: PassageStore,
    embedder: Arc<dyn Embedder>,
}

impl KnowledgeBase {
    /// Pair a store with an embedder. Fails if their dimensions disagree.
    pub fn new(store: PassageStore, embedder: Arc<dyn Embedder>) -> Result<Self, RagError> {
        let index_dim = store.index().dimension();
        if !store.index().is_empty() && index_dim != embedder.dimension() {
            return Err(RagError::Embedding(format!(
                "embedder '{}' produces {}-d vectors but the index holds {}-d vectors",
                embedder.model_id(),
                embedder.dimension(),
                index_dim
            )));
        }
        Ok(Self { store, embedder })
    }

    pub fn store(&self) -> &PassageStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }
}

/// Top-K passage search over a [`KnowledgeBase`].
#[derive(Clone)]
pub struct Retriever {
    knowledge: Arc<KnowledgeBase>,
}

impl Retriever {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    /// Passages most similar to `query`, nearest first, at most `max(top_k, 1)` of them.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RagError> {
        Ok(self
            .search_scored(query, top_k)?
            .into_iter()
            .map(|hit| hit.passage)
            .collect())
    }

    /// Same as [`Retriever::search`] but keeps the index position and distance.
    ///
    /// Index rows with no metadata entry are dropped, so the result can be
    /// shorter than `top_k` even when the index is large enough.
    pub fn search_scored(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>, RagError> {
        let top_k = top_k.max(1);
        let store = self.knowledge.store();

        let vector = self.knowledge.embedder().embed(query)?;
        let neighbors = store.index().search(&vector, top_k)?;

        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            match store.get(neighbor.position) {
                Some(passage) => results.push(ScoredPassage {
                    passage: passage.clone(),
                    position: neighbor.position,
                    distance: neighbor.distance,
                }),
                None => debug!(
                    position = neighbor.position,
                    passages = store.len(),
                    "Dropping index hit without metadata"
                ),
            }
        }

        debug!(top_k, retrieved = results.len(), "Retrieval finished");
        Ok(results)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::rag::index::VectorIndex;

    #[test]
    fn test_search_returns_nearest_first() {
        let retriever = Retriever::new(line_knowledge(10));
        let results = retriever.search_scored("first", 3).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_query_near_third_then_first() {
        let rows = vec![
            vec![1.0, 0.0],
            vec![10.0, 10.0],
            vec![0.0, 0.0],
            vec![20.0, 0.0],
            vec![0.0, 20.0],
        ];
        let passages: Vec<Passage> = (1..=5).map(passage).collect();
        let store = PassageStore::from_parts(passages.clone(), VectorIndex::from_rows(rows).unwrap());
        let embedder = TableEmbedder {
            dim: 2,
            table: vec![("مكافأة نهاية الخدمة".to_string(), vec![0.2, 0.0])],
        };
        let knowledge = Arc::new(KnowledgeBase::new(store, Arc::new(embedder)).unwrap());

        let results = Retriever::new(knowledge).search("مكافأة نهاية الخدمة", 2).unwrap();
        assert_eq!(results, vec![passages[2].clone(), passages[0].clone()]);
    }

    #[test]
    fn test_search_is_bounded_and_clamped() {
        let retriever = Retriever::new(line_knowledge(4));
        assert_eq!(retriever.search("first", 10).unwrap().len(), 4);
        // top_k = 0 behaves like 1
        assert_eq!(retriever.search("first", 0).unwrap().len(), 1);
    }

    #[test]
    fn test_search_is_deterministic() {
        let retriever = Retriever::new(line_knowledge(10));
        let a = retriever.search("middle", 5).unwrap();
        let b = retriever.search("middle", 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_out_of_range_positions_are_dropped() {
        // 20 index rows but only 10 metadata entries
        let rows = (0..20).map(|i| vec![i as f32]).collect();
        let passages = (0..10).map(passage).collect();
        let store = PassageStore::from_parts(passages, VectorIndex::from_rows(rows).unwrap());
        let embedder = TableEmbedder {
            dim: 1,
            table: vec![("far".to_string(), vec![15.0])],
        };
        let knowledge = Arc::new(KnowledgeBase::new(store, Arc::new(embedder)).unwrap());
        let retriever = Retriever::new(knowledge);

        let results = retriever.search_scored("far", 10).unwrap();
        assert!(results.iter().all(|r| r.position < 10));
        // rows 15, 14, 16, 13, 17, 12, 18, 11, 19, 10 are the ten nearest; none has metadata
        assert!(results.is_empty());

        // the eleventh nearest row is 9, the only one backed by metadata
        let results = retriever.search_scored("far", 11).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![9]);
    }

    #[test]
    fn test_dimension_mismatch_rejected_at_construction() {
        let store = PassageStore::from_parts(
            vec![passage(0)],
            VectorIndex::from_rows(vec![vec![0.0, 0.0, 0.0]]).unwrap(),
        );
        let embedder = TableEmbedder { dim: 2, table: Vec::new() };
        assert!(matches!(
            KnowledgeBase::new(store, Arc::new(embedder)),
            Err(RagError::Embedding(_))
        ));
    }

    #[test]
    fn test_embedder_failure_propagates() {
        let store = PassageStore::from_parts(Vec::new(), VectorIndex::from_rows(Vec::new()).unwrap());
        let knowledge = Arc::new(KnowledgeBase::new(store, Arc::new(FailingEmbedder)).unwrap());
        let retriever = Retriever::new(knowledge);
        assert!(matches!(retriever.search("سؤال", 3), Err(RagError::Embedding(_))));
    }
}
