// ABOUTME: Semantic exercise corpus with local embedding inference and filtered search
// ABOUTME: Loads corpus and vector table from disk, ranks exercises by cosine similarity
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

pub mod embedder;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::CorpusConfig;
use crate::errors::{AppError, AppResult};
use embedder::{cosine_similarity, CandleEmbedder, TextEmbedder};

/// One stretching exercise from the corpus, denormalized with its muscle group
/// metadata so search results carry everything prompt construction needs.
#[derive(Debug, Clone)]
pub struct ExerciseRecord {
    pub id: String,
    pub muscle: String,
    pub title: String,
    pub summary: String,
    pub steps: Vec<String>,
    pub effects: Vec<String>,
    pub cautions: Vec<String>,
    pub source_url: Option<String>,
    /// Occupations this muscle group is associated with. Empty when the
    /// corpus carries no occupation metadata for the group.
    pub occupations: Vec<String>,
}

/// A ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: ExerciseRecord,
    pub score: f32,
}

// ============================================================================
// Corpus file format
// ============================================================================

#[derive(Debug, Deserialize)]
struct CorpusFile {
    // serde_json's preserve_order feature keeps the file's muscle order,
    // which fixes the corpus iteration order used for tie-breaking.
    muscles: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MuscleGroup {
    #[serde(default)]
    info: MuscleInfo,
    #[serde(default)]
    exercises: Vec<ExerciseEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct MuscleInfo {
    #[serde(default)]
    occupations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExerciseEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(rename = "abstract", default)]
    summary: Option<String>,
    #[serde(default)]
    enhanced_metadata: Option<EnhancedMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct EnhancedMetadata {
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    effects: Vec<String>,
    #[serde(default)]
    cautions: Vec<String>,
    #[serde(default)]
    source_url: Option<String>,
}

// ============================================================================
// Loaded index
// ============================================================================

struct LoadedIndex {
    records: Vec<ExerciseRecord>,
    vectors: HashMap<String, Vec<f32>>,
    embedder: Arc<dyn TextEmbedder>,
}

impl LoadedIndex {
    fn load(config: &CorpusConfig, embedder: Option<Arc<dyn TextEmbedder>>) -> AppResult<Self> {
        let records = load_corpus(&config.data_path)?;
        let vectors = load_vectors(&config.embeddings_path)?;

        let dangling = records
            .iter()
            .filter(|r| !vectors.contains_key(&r.id))
            .count();
        if dangling > 0 {
            warn!(
                missing = dangling,
                total = records.len(),
                "corpus entries without embedding vectors are excluded from search"
            );
        }

        let embedder: Arc<dyn TextEmbedder> = match embedder {
            Some(e) => e,
            None => Arc::new(CandleEmbedder::load(&config.model_dir, &config.model_id)?),
        };

        if let Some(vector) = vectors.values().next() {
            if vector.len() != embedder.dimensions() {
                return Err(AppError::config(format!(
                    "embedding table dimension {} does not match model dimension {}",
                    vector.len(),
                    embedder.dimensions()
                )));
            }
        }

        info!(
            exercises = records.len(),
            vectors = vectors.len(),
            model = embedder.model_id(),
            "corpus index loaded"
        );

        Ok(Self {
            records,
            vectors,
            embedder,
        })
    }

    /// Ranks corpus entries against a query vector.
    ///
    /// Filters are applied first; when fewer than `top_k` entries survive,
    /// the result is backfilled with the best unfiltered entries so callers
    /// always receive `top_k` results when the corpus is large enough.
    fn rank(
        &self,
        query_vector: &[f32],
        body_parts: &[String],
        occupation: Option<&str>,
        top_k: usize,
    ) -> Vec<SearchHit> {
        let parts_lower: Vec<String> = body_parts.iter().map(|p| p.to_lowercase()).collect();
        let occupation_lower = occupation.map(str::to_lowercase);

        let mut hits: Vec<SearchHit> = Vec::new();
        for record in &self.records {
            let Some(vector) = self.vectors.get(&record.id) else {
                continue;
            };
            if !matches_filters(record, &parts_lower, occupation_lower.as_deref()) {
                continue;
            }
            hits.push(SearchHit {
                record: record.clone(),
                score: cosine_similarity(query_vector, vector),
            });
        }

        // Stable sort keeps corpus order for equal scores.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);

        if hits.len() < top_k {
            // Backfill with the best unselected entries. Filtered hits keep
            // their lead, and the tail is itself sorted by score so the whole
            // result stays non-increasing.
            let taken: HashSet<String> = hits.iter().map(|h| h.record.id.clone()).collect();
            let mut tail: Vec<SearchHit> = self
                .records
                .iter()
                .filter(|record| !taken.contains(&record.id))
                .filter_map(|record| {
                    let vector = self.vectors.get(&record.id)?;
                    Some(SearchHit {
                        record: record.clone(),
                        score: cosine_similarity(query_vector, vector),
                    })
                })
                .collect();
            tail.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
            tail.truncate(top_k - hits.len());
            hits.append(&mut tail);
        }

        hits
    }
}

fn matches_filters(record: &ExerciseRecord, parts_lower: &[String], occupation: Option<&str>) -> bool {
    if !parts_lower.is_empty() {
        let muscle = record.muscle.to_lowercase();
        if !parts_lower.iter().any(|part| muscle.contains(part)) {
            return false;
        }
    }
    if let Some(occupation) = occupation {
        // Entries without occupation metadata never match an occupation filter.
        if record.occupations.is_empty() {
            return false;
        }
        let matched = record
            .occupations
            .iter()
            .any(|occ| occupation.contains(&occ.to_lowercase()));
        if !matched {
            return false;
        }
    }
    true
}

fn load_corpus(path: &Path) -> AppResult<Vec<ExerciseRecord>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        AppError::config(format!("failed to read corpus file {}: {e}", path.display()))
    })?;
    let file: CorpusFile = serde_json::from_str(&raw).map_err(|e| {
        AppError::config(format!("corpus file {} is malformed: {e}", path.display()))
    })?;

    let mut records = Vec::new();
    for (muscle, value) in file.muscles {
        let group: MuscleGroup = serde_json::from_value(value).map_err(|e| {
            AppError::config(format!("corpus entry for {muscle} is malformed: {e}"))
        })?;
        for (position, entry) in group.exercises.into_iter().enumerate() {
            let metadata = entry.enhanced_metadata.unwrap_or_default();
            let id = entry
                .id
                .unwrap_or_else(|| format!("{muscle}_{position}"));
            let summary = entry.summary.unwrap_or_default();
            records.push(ExerciseRecord {
                id,
                muscle: muscle.clone(),
                title: entry.title,
                summary,
                steps: metadata.steps,
                effects: metadata.effects,
                cautions: metadata.cautions,
                source_url: metadata.source_url,
                occupations: group.info.occupations.clone(),
            });
        }
    }

    if records.is_empty() {
        return Err(AppError::config(format!(
            "corpus file {} contains no exercises",
            path.display()
        )));
    }
    Ok(records)
}

fn load_vectors(path: &Path) -> AppResult<HashMap<String, Vec<f32>>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        AppError::config(format!(
            "failed to read embedding table {}: {e}",
            path.display()
        ))
    })?;
    let vectors: HashMap<String, Vec<f32>> = serde_json::from_str(&raw).map_err(|e| {
        AppError::config(format!(
            "embedding table {} is malformed: {e}",
            path.display()
        ))
    })?;
    if vectors.is_empty() {
        return Err(AppError::config(format!(
            "embedding table {} contains no vectors",
            path.display()
        )));
    }
    Ok(vectors)
}

// ============================================================================
// Index lifecycle
// ============================================================================

enum IndexState {
    Uninitialized,
    Ready(Arc<LoadedIndex>),
    Failed(String),
}

/// Process-wide corpus index with an explicit lifecycle.
///
/// Loading is idempotent: concurrent initializers serialize on the state
/// lock and only the first performs the load. A failed load poisons the
/// index, so later calls fail fast instead of retrying a broken data set.
pub struct CorpusIndex {
    config: CorpusConfig,
    state: RwLock<IndexState>,
    embedder_override: Option<Arc<dyn TextEmbedder>>,
}

impl CorpusIndex {
    #[must_use]
    pub fn new(config: CorpusConfig) -> Self {
        Self {
            config,
            state: RwLock::new(IndexState::Uninitialized),
            embedder_override: None,
        }
    }

    /// Builds an index backed by the given embedder instead of loading a
    /// model from disk. Used by tests and by deployments that share one
    /// embedder across components.
    #[must_use]
    pub fn with_embedder(config: CorpusConfig, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            config,
            state: RwLock::new(IndexState::Uninitialized),
            embedder_override: Some(embedder),
        }
    }

    /// Loads the corpus, embedding table, and embedding model.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when any input file is missing or
    /// malformed. The same error is returned by every later call once a
    /// load has failed.
    pub async fn initialize(&self) -> AppResult<()> {
        {
            let state = self.state.read().await;
            match &*state {
                IndexState::Ready(_) => return Ok(()),
                IndexState::Failed(reason) => return Err(AppError::index_unavailable(reason)),
                IndexState::Uninitialized => {}
            }
        }

        let mut state = self.state.write().await;
        match &*state {
            IndexState::Ready(_) => Ok(()),
            IndexState::Failed(reason) => Err(AppError::index_unavailable(reason)),
            IndexState::Uninitialized => {
                let config = self.config.clone();
                let embedder = self.embedder_override.clone();
                let loaded = tokio::task::spawn_blocking(move || LoadedIndex::load(&config, embedder))
                    .await
                    .map_err(|e| AppError::internal(format!("corpus load task failed: {e}")))?;
                match loaded {
                    Ok(index) => {
                        *state = IndexState::Ready(Arc::new(index));
                        Ok(())
                    }
                    Err(e) => {
                        *state = IndexState::Failed(e.to_string());
                        Err(e)
                    }
                }
            }
        }
    }

    pub async fn is_ready(&self) -> bool {
        matches!(&*self.state.read().await, IndexState::Ready(_))
    }

    /// Drops the loaded corpus and model. The index can be initialized again.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        *state = IndexState::Uninitialized;
    }

    /// Searches the corpus for exercises semantically close to `query`.
    ///
    /// Initializes the index on first use. The query embedding and ranking
    /// run on a blocking thread because model inference is CPU bound.
    ///
    /// # Errors
    ///
    /// Returns `IndexUnavailable` when the corpus failed to load and
    /// `InvalidInput` when `top_k` is zero.
    pub async fn search(
        &self,
        query: &str,
        body_parts: &[String],
        occupation: Option<&str>,
        top_k: usize,
    ) -> AppResult<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(AppError::invalid_input("top_k must be positive"));
        }

        self.initialize().await?;
        let index = {
            let state = self.state.read().await;
            match &*state {
                IndexState::Ready(index) => Arc::clone(index),
                IndexState::Failed(reason) => return Err(AppError::index_unavailable(reason)),
                IndexState::Uninitialized => {
                    return Err(AppError::index_unavailable("corpus index not initialized"))
                }
            }
        };

        let query = query.to_string();
        let body_parts = body_parts.to_vec();
        let occupation = occupation.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            let query_vector = index.embedder.embed(&query)?;
            Ok(index.rank(&query_vector, &body_parts, occupation.as_deref(), top_k))
        })
        .await
        .map_err(|e| AppError::internal(format!("corpus search task failed: {e}")))?
    }
}
