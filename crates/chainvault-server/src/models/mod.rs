//! Ledger models

pub mod job;

pub use job::{
    ChainRecord, ChainRecordStatus, ConvertedArtifact, EncryptedPayloadRecord, Job, JobState,
    JobTransition, NewJob, SourceFile,
};
