//! Structured procedure construction.

use crate::models::{
    ComponentKind, Procedure, ProcedureStep, RepresentationKind, StructureFormat, Transform,
};
use crate::search::{Identifier, classify_identifier};

/// Color of the query structure.
pub const QUERY_COLOR: &str = "#4f7cac";
/// Color of the aligned target structure.
pub const TARGET_COLOR: &str = "#e07a5f";

/// Where a structure file is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureSource {
    /// Download URL.
    pub url: String,
    /// File format at that URL.
    pub format: StructureFormat,
}

impl StructureSource {
    /// Resolves the download location of a structure id.
    ///
    /// - `AF-...` ids are AlphaFold DB models (mmCIF).
    /// - UniProt accessions map to their AlphaFold model `AF-<acc>-F1`.
    /// - Anything else is treated as a PDB entry, optionally with a `_<chain>`
    ///   suffix, served as `BinaryCIF` from RCSB.
    #[must_use]
    pub fn for_id(id: &str) -> Self {
        let id = id.trim();
        if id.to_uppercase().starts_with("AF-") {
            return Self::alphafold(&id.to_uppercase());
        }
        if let Identifier::Uniprot(accession) = classify_identifier(id) {
            return Self::alphafold(&format!("AF-{accession}-F1"));
        }
        let entry = id.split('_').next().unwrap_or(id).to_lowercase();
        Self {
            url: format!("https://models.rcsb.org/{entry}.bcif"),
            format: StructureFormat::Bcif,
        }
    }

    fn alphafold(model_id: &str) -> Self {
        Self {
            url: format!("https://alphafold.ebi.ac.uk/files/{model_id}-model_v4.cif"),
            format: StructureFormat::Mmcif,
        }
    }
}

/// Builder for [`Procedure`]s.
///
/// Calls mirror the engine's own pipeline:
/// download, parse, build structure, then components and representations.
#[derive(Debug, Clone, Default)]
pub struct ProcedureBuilder {
    steps: Vec<ProcedureStep>,
}

impl ProcedureBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Adds a download step.
    #[must_use]
    pub fn download(mut self, url: impl Into<String>, label: impl Into<String>) -> Self {
        self.steps.push(ProcedureStep::Download {
            url: url.into(),
            label: label.into(),
        });
        self
    }

    /// Adds a parse step.
    #[must_use]
    pub fn parse(mut self, format: StructureFormat) -> Self {
        self.steps.push(ProcedureStep::Parse { format });
        self
    }

    /// Adds a build-structure step.
    #[must_use]
    pub fn build_structure(mut self, model_index: u32) -> Self {
        self.steps.push(ProcedureStep::BuildStructure { model_index });
        self
    }

    /// Adds a transform step.
    #[must_use]
    pub fn transform(mut self, transform: Transform) -> Self {
        self.steps.push(ProcedureStep::Transform { transform });
        self
    }

    /// Adds a component selection step.
    #[must_use]
    pub fn add_component(mut self, kind: ComponentKind) -> Self {
        self.steps.push(ProcedureStep::AddComponent { kind });
        self
    }

    /// Adds a representation step.
    #[must_use]
    pub fn add_representation(mut self, kind: RepresentationKind) -> Self {
        self.steps.push(ProcedureStep::AddRepresentation { kind });
        self
    }

    /// Adds a uniform color step.
    #[must_use]
    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.steps.push(ProcedureStep::Color {
            color: color.into(),
        });
        self
    }

    /// Adds the full pipeline for one structure shown as a colored cartoon.
    ///
    /// The transform, when given, is applied right after the structure is built.
    #[must_use]
    pub fn cartoon_structure(
        self,
        id: &str,
        label: &str,
        transform: Option<Transform>,
        color: &str,
    ) -> Self {
        let source = StructureSource::for_id(id);
        let builder = self
            .download(source.url, label)
            .parse(source.format)
            .build_structure(0);
        let builder = match transform {
            Some(transform) => builder.transform(transform),
            None => builder,
        };
        builder
            .add_component(ComponentKind::Polymer)
            .add_representation(RepresentationKind::Cartoon)
            .color(color)
    }

    /// Finishes the procedure.
    #[must_use]
    pub fn build(self) -> Procedure {
        Procedure { steps: self.steps }
    }
}

/// Builds the superposition procedure for a query and one aligned target.
#[must_use]
pub fn alignment_procedure(
    query_id: &str,
    target_id: &str,
    transform: Option<Transform>,
) -> Procedure {
    ProcedureBuilder::new()
        .cartoon_structure(query_id, "query", None, QUERY_COLOR)
        .cartoon_structure(target_id, "target", transform, TARGET_COLOR)
        .build()
}
