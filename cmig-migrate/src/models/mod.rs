//! Data models for cmig-migrate
//!
//! - Typed source records (output of the parsing boundary)
//! - Target relational entities
//! - Checkpoint, blob manifest/progress and report artifacts

pub mod blob;
pub mod checkpoint;
pub mod ids;
pub mod report;
pub mod source;
pub mod target;

pub use blob::{
    BlobManifest, BlobManifestEntry, BlobMigrationProgress, FailedFile, UrlMapping,
    UrlMappingArtifact,
};
pub use checkpoint::{CheckpointRecord, Phase, PhaseCounters, PhaseState};
pub use report::{
    CheckResult, CheckSeverity, MigrationReport, PhaseReport, RecordError, RecordErrorKind,
    ValidationReport,
};
pub use source::{ActorRef, AnalysisPayload, AudioAsset, SourceCaseRecord, TranscriptSegment};
pub use target::{
    CaseStatus, DecisionMaker, RecordType, TargetAccount, TargetAnalysis, TargetCase,
    ORIGIN_APP, ORIGIN_MIGRATION,
};
