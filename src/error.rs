use thiserror::Error;

/// Errors raised while extracting or matching grid topologies.
#[derive(Error, Debug)]
pub enum Error {
    /// Every starting line has been explored and no further ring can be produced.
    #[error("explored all starting lines, no topology remains")]
    NoTopologyRemains,

    #[error("no building year known for the asset at ({x}, {y}) or anywhere upstream")]
    MissingBuildingYear { x: f64, y: f64 },

    /// A line was expected to connect at a point but neither endpoint lies within tolerance.
    #[error("no connection found at ({x}, {y})")]
    NoConnectionFound { x: f64, y: f64 },

    #[error("line index {0} is not present in the line index")]
    UnknownLine(usize),

    /// A deserialised navigation line has fewer than two coordinates.
    #[error("navigation line {index} has {points} coordinates, at least 2 are needed")]
    DegenerateLine { index: usize, points: usize },

    #[error("no candidate topology could be evaluated against the target")]
    NoCandidateEvaluated,

    #[error("archetype {0} is not present in the library")]
    UnknownArchetype(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
