use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, in source frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// Euclidean distance between two vectors of equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// One enrolled face: the enrollee identifier and its signature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSignature {
    pub enrollee_id: String,
    pub vector: Vec<f32>,
}

#[derive(Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("catalog arrays differ in length: {ids} ids, {vectors} vectors")]
    LengthMismatch { ids: usize, vectors: usize },
    #[error("duplicate enrollee id in catalog: {0}")]
    DuplicateId(String),
    #[error("signature dimension {actual} does not match catalog dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("signature vector is empty")]
    EmptyVector,
    #[error("enrollee id is empty")]
    EmptyId,
}

/// Whether an upsert added a new enrollee or replaced an existing signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Ordered catalog of enrolled signatures.
///
/// Ids are unique and every vector shares one dimension. Order is
/// insertion order; replacing a signature keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingCatalog {
    signatures: Vec<FaceSignature>,
}

impl EncodingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from the parallel `ids` / `vectors` arrays of the
    /// persisted form, validating every catalog invariant.
    pub fn from_parts(ids: Vec<String>, vectors: Vec<Vec<f32>>) -> Result<Self, CatalogError> {
        if ids.len() != vectors.len() {
            return Err(CatalogError::LengthMismatch {
                ids: ids.len(),
                vectors: vectors.len(),
            });
        }

        let mut catalog = Self::new();
        for (id, vector) in ids.into_iter().zip(vectors) {
            if catalog.contains(&id) {
                return Err(CatalogError::DuplicateId(id));
            }
            catalog.upsert(id, vector)?;
        }
        Ok(catalog)
    }

    /// Split the catalog into parallel `ids` / `vectors` arrays.
    pub fn to_parts(&self) -> (Vec<String>, Vec<Vec<f32>>) {
        self.signatures
            .iter()
            .map(|s| (s.enrollee_id.clone(), s.vector.clone()))
            .unzip()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FaceSignature> {
        self.signatures.iter()
    }

    pub fn get(&self, enrollee_id: &str) -> Option<&FaceSignature> {
        self.signatures.iter().find(|s| s.enrollee_id == enrollee_id)
    }

    pub fn contains(&self, enrollee_id: &str) -> bool {
        self.get(enrollee_id).is_some()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.signatures.iter().map(|s| s.enrollee_id.as_str()).collect()
    }

    /// Dimension shared by every vector, or `None` for an empty catalog.
    pub fn dimension(&self) -> Option<usize> {
        self.signatures.first().map(|s| s.vector.len())
    }

    /// Replace the vector for `enrollee_id` in place, or append a new entry.
    pub fn upsert(
        &mut self,
        enrollee_id: impl Into<String>,
        vector: Vec<f32>,
    ) -> Result<UpsertOutcome, CatalogError> {
        let enrollee_id = enrollee_id.into();
        if enrollee_id.is_empty() {
            return Err(CatalogError::EmptyId);
        }
        if vector.is_empty() {
            return Err(CatalogError::EmptyVector);
        }
        if let Some(expected) = self.dimension() {
            if vector.len() != expected {
                return Err(CatalogError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        match self
            .signatures
            .iter_mut()
            .find(|s| s.enrollee_id == enrollee_id)
        {
            Some(existing) => {
                existing.vector = vector;
                Ok(UpsertOutcome::Replaced)
            }
            None => {
                self.signatures.push(FaceSignature {
                    enrollee_id,
                    vector,
                });
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    /// Remove an enrollee. Returns false if it was not enrolled.
    pub fn remove(&mut self, enrollee_id: &str) -> bool {
        let before = self.signatures.len();
        self.signatures.retain(|s| s.enrollee_id != enrollee_id);
        self.signatures.len() != before
    }
}

/// Result of matching a probe vector against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Match {
        enrollee_id: String,
        /// `1 - distance`, clamped to [0, 1].
        confidence: f32,
        distance: f32,
    },
    NoMatch,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match { .. })
    }

    pub fn enrollee_id(&self) -> Option<&str> {
        match self {
            MatchResult::Match { enrollee_id, .. } => Some(enrollee_id),
            MatchResult::NoMatch => None,
        }
    }
}
