//! Search queries, results and progress reporting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of results requested from the search service.
pub const DEFAULT_RESULT_LIMIT: u32 = 10;

/// Identifier family of a query input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Protein Data Bank entry id (e.g. `1TUP`).
    Pdb,
    /// `UniProt` accession (e.g. `P04637`).
    Uniprot,
}

impl IdentifierKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pdb => "pdb",
            Self::Uniprot => "uniprot",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of similarity search requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// 3D structural similarity (default).
    #[default]
    Structure,
    /// Sequence similarity.
    Sequence,
}

impl SearchType {
    /// Returns the search type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Structure => "structure",
            Self::Sequence => "sequence",
        }
    }

    /// Parses a search type string, falling back to [`SearchType::Structure`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sequence" | "seq" => Self::Sequence,
            _ => Self::Structure,
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options sent with a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of results.
    pub limit: u32,
    /// Whether to request superposition transforms.
    pub superposition: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RESULT_LIMIT,
            superposition: true,
        }
    }
}

/// A search as issued by the user.
///
/// Immutable once issued; a newer query always supersedes an older one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Raw identifier entered by the user.
    pub input_value: String,
    /// Identifier family, once known.
    pub input_type: Option<IdentifierKind>,
    /// Request options.
    pub options: SearchOptions,
}

impl SearchQuery {
    /// Creates a query with default options and an unknown identifier kind.
    #[must_use]
    pub fn new(input_value: impl Into<String>) -> Self {
        Self {
            input_value: input_value.into(),
            input_type: None,
            options: SearchOptions::default(),
        }
    }

    /// Sets the identifier kind.
    #[must_use]
    pub const fn with_input_type(mut self, kind: IdentifierKind) -> Self {
        self.input_type = Some(kind);
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.options.limit = limit;
        self
    }

    /// Sets whether superposition transforms are requested.
    #[must_use]
    pub const fn with_superposition(mut self, superposition: bool) -> Self {
        self.options.superposition = superposition;
        self
    }

    /// Returns the trimmed identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.input_value.trim()
    }
}

/// One aligned candidate structure returned by the search service.
///
/// Results keep the service's ranking; they are never re-sorted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Identifier of the aligned structure, unique within a result set.
    #[serde(alias = "object_id")]
    pub object_id: String,
    /// Fraction of query residues aligned (0.0 to 1.0).
    #[serde(alias = "aligned_percentage", default)]
    pub aligned_percentage: f64,
    /// Root-mean-square deviation of the superposition, in angstroms.
    #[serde(default)]
    pub rmsd: f64,
    /// Row-major 3x3 rotation superposing the target onto the query.
    #[serde(alias = "rotation_matrix", default)]
    pub rotation_matrix: Option<[[f64; 3]; 3]>,
    /// Translation applied after rotation.
    #[serde(alias = "translation_vector", default)]
    pub translation_vector: Option<[f64; 3]>,
    /// Fraction of aligned residues that are sequence-identical (0.0 to 1.0).
    #[serde(alias = "sequence_aligned_percentage", default)]
    pub sequence_aligned_percentage: f64,
    /// TM-score normalized by the query length (0.0 to 1.0).
    #[serde(alias = "tm_score", default)]
    pub tm_score: f64,
    /// TM-score normalized by the target length (0.0 to 1.0).
    #[serde(alias = "tm_score_target", default)]
    pub tm_score_target: f64,
}

impl SearchResult {
    /// Creates a result with the given id and scores; transforms are unset.
    #[must_use]
    pub fn new(object_id: impl Into<String>, rmsd: f64, tm_score: f64, aligned: f64) -> Self {
        Self {
            object_id: object_id.into(),
            aligned_percentage: aligned,
            rmsd,
            rotation_matrix: None,
            translation_vector: None,
            sequence_aligned_percentage: 0.0,
            tm_score,
            tm_score_target: tm_score,
        }
    }

    /// Sets the superposition transform.
    #[must_use]
    pub const fn with_transform(mut self, rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        self.rotation_matrix = Some(rotation);
        self.translation_vector = Some(translation);
        self
    }

    /// Returns true if all score fields fall inside their documented ranges.
    #[must_use]
    pub fn has_valid_scores(&self) -> bool {
        let unit = 0.0..=1.0;
        unit.contains(&self.aligned_percentage)
            && unit.contains(&self.sequence_aligned_percentage)
            && unit.contains(&self.tm_score)
            && unit.contains(&self.tm_score_target)
            && self.rmsd >= 0.0
            && self.rmsd.is_finite()
    }
}

/// Stage of a running search job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    /// The request is being prepared or the first poll is in flight.
    Initializing,
    /// The job is waiting in the service queue.
    Queued,
    /// The job is running; results may be partial.
    Processing,
    /// The job finished with results.
    Completed,
}

impl ProgressStage {
    /// Returns the stage as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }
}

/// Transient progress report for a running search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Current stage.
    pub stage: ProgressStage,
    /// Position in the service queue, if queued.
    pub queue_position: Option<u32>,
    /// Attempt number (1-based).
    pub attempt: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Human-readable status line.
    pub message: String,
    /// Number of non-authoritative results seen so far.
    pub partial_results_count: Option<usize>,
}

impl ProgressInfo {
    /// Creates a progress report.
    #[must_use]
    pub fn new(stage: ProgressStage, attempt: u32, max_attempts: u32) -> Self {
        let message = match stage {
            ProgressStage::Initializing => "Starting search".to_string(),
            ProgressStage::Queued => format!("Waiting in queue (attempt {attempt}/{max_attempts})"),
            ProgressStage::Processing => {
                format!("Processing search (attempt {attempt}/{max_attempts})")
            },
            ProgressStage::Completed => "Search completed".to_string(),
        };
        Self {
            stage,
            queue_position: None,
            attempt,
            max_attempts,
            message,
            partial_results_count: None,
        }
    }

    /// Sets the queue position and rewrites the message to include it.
    #[must_use]
    pub fn with_queue_position(mut self, position: Option<u32>) -> Self {
        self.queue_position = position;
        if let Some(position) = position {
            self.message = format!(
                "Queue position {position} (attempt {}/{})",
                self.attempt, self.max_attempts
            );
        }
        self
    }

    /// Sets the partial result count.
    #[must_use]
    pub const fn with_partial_results(mut self, count: Option<usize>) -> Self {
        self.partial_results_count = count;
        self
    }
}
