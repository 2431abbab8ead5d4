use serde::{Deserialize, Serialize};

/// Default maximum Euclidean distance between two L2-normalized ArcFace
/// embeddings for them to count as the same person.
///
/// For unit vectors `d = sqrt(2 - 2·cos)`, so 1.10 corresponds to a cosine
/// similarity of roughly 0.40.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 1.10;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map the box (and its landmarks) into a frame `factor` times larger.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// A known person: label taken from the reference image file stem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub label: String,
    pub embedding: Embedding,
}

impl Identity {
    /// Name written to the attendance ledger and drawn on the overlay.
    pub fn attendance_name(&self) -> String {
        self.label.to_uppercase()
    }
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest identity (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Gallery index of the nearest identity, set only on a match.
    pub index: Option<usize>,
    /// Label of the matched identity, set only on a match.
    pub label: Option<String>,
}

impl MatchResult {
    fn miss(distance: f32) -> Self {
        Self { matched: false, distance, index: None, label: None }
    }
}

/// Strategy for comparing a probe embedding against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[Identity], tolerance: f32) -> MatchResult;
}

/// Nearest-neighbour matcher on Euclidean distance.
///
/// The nearest identity wins; ties keep the lowest index. The winner is
/// accepted only if its distance is within `tolerance`. Identities whose
/// embedding length differs from the probe's are never candidates.
pub struct DistanceMatcher;

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[Identity], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in gallery.iter().enumerate() {
            if identity.embedding.dim() != probe.dim() {
                tracing::debug!(
                    label = %identity.label,
                    expected = probe.dim(),
                    got = identity.embedding.dim(),
                    "embedding dimension mismatch, skipping identity"
                );
                continue;
            }
            let dist = probe.distance(&identity.embedding);
            if best_idx.is_none() || dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => MatchResult {
                matched: true,
                distance: best_dist,
                index: Some(idx),
                label: Some(gallery[idx].label.clone()),
            },
            _ => MatchResult::miss(best_dist),
        }
    }
}
