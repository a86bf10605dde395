//! Trait seams between crates.

pub mod storage;

pub use storage::{
    IAnalysisResults, IComparisons, IExportChunks, IRunStore, IRuns, IStages,
};
