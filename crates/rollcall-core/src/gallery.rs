//! Reference gallery: one identity per face photo in a directory.

use crate::engine::FaceEngine;
use crate::types::{Embedding, Identity};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What happened to each file during a load.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped_no_face: Vec<String>,
    pub skipped_undecodable: Vec<String>,
    pub skipped_duplicate: Vec<String>,
    /// The engine returned an error on these files.
    pub skipped_failed: Vec<String>,
}

/// Known identities, immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    /// Build a gallery from pre-computed identities.
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    /// Load every image in `dir`, in file name order.
    ///
    /// Files that do not decode are skipped silently; images without a face,
    /// images the engine fails on, and repeated stems are skipped with a warning.
    pub fn load<E: FaceEngine + ?Sized>(
        dir: &Path,
        engine: &mut E,
    ) -> Result<(Self, LoadReport), GalleryError> {
        let io_err = |source| GalleryError::Io { path: dir.to_path_buf(), source };

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()
            .map_err(io_err)?;
        paths.retain(|p| p.is_file());
        paths.sort();

        tracing::info!(dir = %dir.display(), files = paths.len(), "loading reference images");

        let mut report = LoadReport::default();
        let mut seen = HashSet::new();
        let mut identities = Vec::new();

        for path in paths {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(label) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::debug!(file = %file_name, error = %e, "not a decodable image, skipping");
                    report.skipped_undecodable.push(file_name);
                    continue;
                }
            };

            if seen.contains(&label) {
                tracing::warn!(file = %file_name, label = %label, "duplicate label, skipping");
                report.skipped_duplicate.push(file_name);
                continue;
            }

            match first_embedding(engine, &image) {
                Ok(Some(embedding)) => {
                    tracing::debug!(file = %file_name, label = %label, "reference face encoded");
                    seen.insert(label.clone());
                    report.loaded.push(label.clone());
                    identities.push(Identity { label, embedding });
                }
                Ok(None) => {
                    tracing::warn!(file = %file_name, "no face detected in reference image, skipping");
                    report.skipped_no_face.push(file_name);
                }
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "failed to encode reference image, skipping");
                    report.skipped_failed.push(file_name);
                }
            }
        }

        tracing::info!(
            loaded = report.loaded.len(),
            no_face = report.skipped_no_face.len(),
            undecodable = report.skipped_undecodable.len(),
            duplicate = report.skipped_duplicate.len(),
            failed = report.skipped_failed.len(),
            "encoding complete"
        );

        Ok((Self { identities }, report))
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Embedding of the most confident face, or `None` when there is no face.
fn first_embedding<E: FaceEngine + ?Sized>(
    engine: &mut E,
    image: &image::RgbImage,
) -> Result<Option<Embedding>, crate::engine::EngineError> {
    let faces = engine.locate(image)?;
    let Some(first) = faces.first() else {
        return Ok(None);
    };
    Ok(engine.encode(image, std::slice::from_ref(first))?.into_iter().next())
}
