//! Structured visualization procedures.
//!
//! A procedure is an ordered list of engine-neutral steps describing how a
//! scene's molecular state is built. It replaces generated source text: the
//! engine adapter interprets the steps directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// File format of a downloaded structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureFormat {
    /// mmCIF text.
    Mmcif,
    /// `BinaryCIF`.
    Bcif,
    /// Legacy PDB text.
    Pdb,
}

impl StructureFormat {
    /// Returns the format as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mmcif => "mmcif",
            Self::Bcif => "bcif",
            Self::Pdb => "pdb",
        }
    }
}

/// Component selector within a built structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Polymer chains.
    Polymer,
    /// Small-molecule ligands.
    Ligand,
    /// Everything in the structure.
    All,
}

/// Molecular representation style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentationKind {
    /// Secondary-structure cartoon.
    Cartoon,
    /// Ball-and-stick atoms.
    BallAndStick,
    /// Molecular surface.
    Surface,
}

/// Superposition transform in column-major layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// 3x3 rotation, column-major.
    pub rotation: [f64; 9],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        translation: [0.0; 3],
    };

    /// Builds a transform from a row-major rotation matrix.
    ///
    /// The matrix is transposed and then flattened, which yields column-major order.
    #[must_use]
    pub fn from_row_major(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        let mut flat = [0.0; 9];
        for (col, slot) in flat.chunks_exact_mut(3).enumerate() {
            for (row, value) in slot.iter_mut().enumerate() {
                *value = rotation[row][col];
            }
        }
        Self {
            rotation: flat,
            translation,
        }
    }

    /// Returns the 4x4 homogeneous matrix, column-major.
    #[must_use]
    pub fn to_mat4(&self) -> [f64; 16] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0], r[1], r[2], 0.0, //
            r[3], r[4], r[5], 0.0, //
            r[6], r[7], r[8], 0.0, //
            t[0], t[1], t[2], 1.0,
        ]
    }
}

/// One step of a visualization procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProcedureStep {
    /// Fetch a structure file.
    Download {
        /// Source URL.
        url: String,
        /// Label used by later steps to refer to this structure.
        label: String,
    },
    /// Parse the most recently downloaded data.
    Parse {
        /// File format.
        format: StructureFormat,
    },
    /// Build a model from the parsed trajectory.
    BuildStructure {
        /// Model index within the file.
        model_index: u32,
    },
    /// Apply a rigid-body transform to the current structure.
    Transform {
        /// Transform to apply.
        transform: Transform,
    },
    /// Select a component of the current structure.
    AddComponent {
        /// Component selector.
        kind: ComponentKind,
    },
    /// Add a representation to the current component.
    AddRepresentation {
        /// Representation style.
        kind: RepresentationKind,
    },
    /// Color the current representation uniformly.
    Color {
        /// Hex color, `#rrggbb`.
        color: String,
    },
}

impl fmt::Display for ProcedureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download { url, label } => write!(f, "download({label}, {url})"),
            Self::Parse { format } => write!(f, "parse({})", format.as_str()),
            Self::BuildStructure { model_index } => write!(f, "build_structure({model_index})"),
            Self::Transform { transform } => {
                let values: Vec<String> =
                    transform.to_mat4().iter().map(|v| format!("{v}")).collect();
                write!(f, "transform([{}])", values.join(", "))
            },
            Self::AddComponent { kind } => write!(f, "add_component({kind:?})"),
            Self::AddRepresentation { kind } => write!(f, "add_representation({kind:?})"),
            Self::Color { color } => write!(f, "color({color})"),
        }
    }
}

/// Ordered visualization procedure for a scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    /// Steps in execution order.
    pub steps: Vec<ProcedureStep>,
}

impl Procedure {
    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the procedure has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the download labels in order.
    #[must_use]
    pub fn structure_labels(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                ProcedureStep::Download { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}
