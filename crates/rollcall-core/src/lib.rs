//! rollcall-core: face detection, recognition and the reference gallery.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference, behind the [`FaceEngine`]
//! trait.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod gallery;
pub mod recognizer;
pub mod types;

pub use engine::{EngineError, FaceEngine, OnnxEngine};
pub use gallery::{Gallery, GalleryError, LoadReport};
pub use types::{
    BoundingBox, DistanceMatcher, Embedding, Identity, MatchResult, Matcher,
    DEFAULT_MATCH_TOLERANCE,
};
