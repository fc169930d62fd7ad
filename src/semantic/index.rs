//! In-memory vector index with cosine distance search.
//!
//! Stores resume embeddings together with their text and metadata and
//! answers top-k nearest neighbour queries.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Free-form string metadata attached to an entry.
pub type Metadata = BTreeMap<String, String>;

/// A stored resume: its vector plus what is needed to show it again.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    /// The embedding vector
    pub vector: Vec<f32>,
    /// Text the vector was computed from
    pub text: String,
    pub metadata: Metadata,
}

/// A query hit. `distance` is `1 - cosine similarity`.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
    pub text: String,
    pub metadata: Metadata,
}

/// In-memory vector index.
///
/// Entries are kept in insertion order, which is also the tie-break order
/// for equal distances. Re-adding an existing id replaces that entry in
/// place.
///
/// All vectors must share one dimensionality. It is fixed by the first
/// stored vector; a later vector (stored or queried) of another size is a
/// caller bug and is rejected with [`IndexError::DimensionMismatch`].
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    /// id -> position in `entries`
    positions: HashMap<String, usize>,
    dimensions: Option<usize>,
}

impl VectorIndex {
    /// Create a new empty vector index. Dimensions are fixed on first add.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index with known dimensions and pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            dimensions: Some(dimensions),
        }
    }

    /// Expected embedding dimensions, if fixed yet.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an entry by id.
    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.positions.get(id).map(|&pos| &self.entries[pos])
    }

    /// Whether `id` is stored.
    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// All ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Iterate over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Add a batch of entries.
    ///
    /// The whole batch is validated before anything is written: ids must be
    /// distinct within the batch, every vector must have the index's
    /// dimensionality and a non-zero norm. On error the index is unchanged.
    pub fn add_entries(&mut self, batch: Vec<IndexEntry>) -> Result<(), IndexError> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let dimensions = self.dimensions.unwrap_or(first.vector.len());

        let mut seen = HashSet::with_capacity(batch.len());
        for entry in &batch {
            if !seen.insert(entry.id.as_str()) {
                return Err(IndexError::DuplicateId(entry.id.clone()));
            }
            Self::check_vector(&entry.vector, dimensions)?;
        }

        self.dimensions = Some(dimensions);
        for entry in batch {
            match self.positions.get(&entry.id) {
                Some(&pos) => self.entries[pos] = entry,
                None => {
                    self.positions.insert(entry.id.clone(), self.entries.len());
                    self.entries.push(entry);
                }
            }
        }

        Ok(())
    }

    /// Insert or replace a single entry.
    #[cfg(test)]
    pub fn insert(&mut self, entry: IndexEntry) -> Result<(), IndexError> {
        self.add_entries(vec![entry])
    }

    /// Remove an entry by id.
    pub fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        let pos = self.positions.remove(id)?;
        let entry = self.entries.remove(pos);

        // shift positions of everything after the removed entry
        for p in self.positions.values_mut() {
            if *p > pos {
                *p -= 1;
            }
        }

        Some(entry)
    }

    /// Find the `k` entries nearest to `query`.
    ///
    /// Results are ordered by ascending distance; equal distances keep
    /// insertion order. Fewer than `k` entries yields all of them and an
    /// empty index yields an empty result.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidK);
        }

        let Some(dimensions) = self.dimensions else {
            return Ok(vec![]);
        };
        Self::check_vector(query, dimensions)?;
        let query_norm = norm(query);

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (1.0 - cosine(query, query_norm, &entry.vector), entry))
            .collect();

        // stable sort keeps insertion order among ties
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, entry)| Neighbor {
                id: entry.id.clone(),
                distance,
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    /// Clear all entries. The dimensionality stays fixed if it was set.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    fn check_vector(v: &[f32], dimensions: usize) -> Result<(), IndexError> {
        if v.len() != dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: v.len(),
            });
        }
        if norm(v) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }
        Ok(())
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity of `a` and `b`, given `a`'s norm.
fn cosine(a: &[f32], a_norm: f32, b: &[f32]) -> f32 {
    let b_norm = norm(b);
    if b_norm < f32::EPSILON {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (a_norm * b_norm)).clamp(-1.0, 1.0)
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector has {got} dimensions, index holds {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("zero-norm vectors cannot be stored or queried")]
    ZeroNormVector,

    #[error("id '{0}' appears twice in one batch")]
    DuplicateId(String),

    #[error("k must be at least 1")]
    InvalidK,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            text: format!("text of {id}"),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new();
        assert_eq!(index.dimensions(), None);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let mut index = VectorIndex::new();
        index.insert(entry("a.txt", vec![1.0, 0.0, 0.0])).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.dimensions(), Some(3));
        assert!(index.contains("a.txt"));

        let stored = index.get("a.txt").unwrap();
        assert_eq!(stored.text, "text of a.txt");
        assert_eq!(stored.vector, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let mut index = VectorIndex::new();
        index.insert(entry("a", vec![1.0, 0.0, 0.0])).unwrap();

        let result = index.insert(entry("b", vec![1.0, 0.0, 0.0, 0.0]));
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, got: 4 })
        ));
    }

    #[test]
    fn test_insert_zero_norm_rejected() {
        let mut index = VectorIndex::new();
        let result = index.insert(entry("a", vec![0.0, 0.0, 0.0]));
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_readd_replaces_in_place() {
        let mut index = VectorIndex::new();
        index
            .add_entries(vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])])
            .unwrap();

        let mut replacement = entry("a", vec![0.0, 1.0]);
        replacement.text = "updated".to_string();
        index.insert(replacement).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a").unwrap().text, "updated");
        assert_eq!(index.ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut index = VectorIndex::new();
        index.insert(entry("keep", vec![1.0, 0.0])).unwrap();

        let result = index.add_entries(vec![
            entry("new", vec![0.0, 1.0]),
            entry("bad", vec![0.0, 0.0]),
        ]);
        assert!(result.is_err());
        assert_eq!(index.len(), 1);
        assert!(!index.contains("new"));
    }

    #[test]
    fn test_duplicate_id_in_batch() {
        let mut index = VectorIndex::new();
        let result = index.add_entries(vec![entry("a", vec![1.0]), entry("a", vec![2.0])]);
        assert!(matches!(result, Err(IndexError::DuplicateId(id)) if id == "a"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut index = VectorIndex::new();
        index
            .add_entries(vec![
                entry("a", vec![1.0, 0.0]),
                entry("b", vec![0.0, 1.0]),
                entry("c", vec![1.0, 1.0]),
            ])
            .unwrap();

        let removed = index.remove("a");
        assert!(removed.is_some());
        assert!(!index.contains("a"));
        assert_eq!(index.get("c").unwrap().id, "c");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_query_basic() {
        let mut index = VectorIndex::new();

        // Insert two orthogonal vectors
        index
            .add_entries(vec![entry("a", vec![1.0, 0.0, 0.0]), entry("b", vec![0.0, 1.0, 0.0])])
            .unwrap();

        // Query similar to first vector
        let results = index.query(&[1.0, 0.1, 0.0], 10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a"); // Should be most similar
        assert!(results[0].distance < results[1].distance);
        assert!((results[1].distance - (1.0 - 0.1 / 1.01f32.sqrt())).abs() < 1e-5);
    }

    #[test]
    fn test_query_exact_match_distance_zero() {
        let mut index = VectorIndex::new();
        index.insert(entry("a", vec![0.6, 0.8])).unwrap();

        let results = index.query(&[0.6, 0.8], 1).unwrap();
        assert!(results[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_query_with_limit() {
        let mut index = VectorIndex::new();

        for i in 0..10 {
            index
                .insert(entry(&format!("r{i}"), vec![1.0, i as f32 * 0.1, 0.0]))
                .unwrap();
        }

        let results = index.query(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "r0");
    }

    #[test]
    fn test_query_fewer_entries_than_k() {
        let mut index = VectorIndex::new();
        index
            .add_entries(vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])])
            .unwrap();

        assert_eq!(index.query(&[1.0, 0.0], 5).unwrap().len(), 2);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new();
        index
            .add_entries(vec![
                entry("z", vec![0.0, 1.0]),
                entry("m", vec![0.0, 1.0]),
                entry("a", vec![0.0, 1.0]),
            ])
            .unwrap();

        let ids: Vec<_> = index
            .query(&[0.0, 1.0], 3)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["z", "m", "a"]);
    }

    #[test]
    fn test_query_empty_index() {
        let index = VectorIndex::new();
        assert!(index.query(&[1.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_query_zero_k() {
        let index = VectorIndex::new();
        assert!(matches!(index.query(&[1.0], 0), Err(IndexError::InvalidK)));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let mut index = VectorIndex::new();
        index.insert(entry("a", vec![1.0, 0.0])).unwrap();

        let result = index.query(&[1.0, 0.0, 0.0], 1);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_clear_keeps_dimensions() {
        let mut index = VectorIndex::new();
        index.insert(entry("a", vec![1.0, 0.0])).unwrap();
        index.clear();

        assert!(index.is_empty());
        assert_eq!(index.dimensions(), Some(2));
        assert!(index.insert(entry("b", vec![1.0, 0.0, 0.0])).is_err());
    }
}
