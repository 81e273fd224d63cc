//! Row decoding

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt::Display;
use std::str::FromStr;

use super::{LedgerError, LedgerResult};
use crate::models::{
    ChainRecord, ConvertedArtifact, EncryptedPayloadRecord, Job, JobTransition, SourceFile,
};

fn parse_col<T>(row: &SqliteRow, col: &str) -> LedgerResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(col)?;
    raw.parse()
        .map_err(|e| LedgerError::Corrupt(format!("column {}: {}", col, e)))
}

fn parse_opt_col<T>(row: &SqliteRow, col: &str) -> LedgerResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| LedgerError::Corrupt(format!("column {}: {}", col, e)))
    })
    .transpose()
}

pub(super) fn job(row: &SqliteRow) -> LedgerResult<Job> {
    Ok(Job {
        id: row.try_get("id")?,
        source_file: SourceFile {
            name: row.try_get("source_name")?,
            format: parse_col(row, "source_format")?,
            size: row.try_get("source_size")?,
            checksum: row.try_get("source_checksum")?,
            location: row.try_get("source_location")?,
        },
        state: parse_col(row, "state")?,
        network: parse_col(row, "network")?,
        encryption_tier: parse_col(row, "encryption_tier")?,
        infer_types: row.try_get("infer_types")?,
        version: row.try_get("version")?,
        failed_stage: parse_opt_col(row, "failed_stage")?,
        error: row.try_get("error")?,
        cancel_requested: row.try_get("cancel_requested")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(super) fn transition(row: &SqliteRow) -> LedgerResult<JobTransition> {
    Ok(JobTransition {
        job_id: row.try_get("job_id")?,
        seq: row.try_get("seq")?,
        from_state: parse_opt_col(row, "from_state")?,
        to_state: parse_col(row, "to_state")?,
        detail: row.try_get("detail")?,
        at: row.try_get("at")?,
    })
}

pub(super) fn artifact(row: &SqliteRow) -> LedgerResult<ConvertedArtifact> {
    Ok(ConvertedArtifact {
        job_id: row.try_get("job_id")?,
        location: row.try_get("location")?,
        json_checksum: row.try_get("json_checksum")?,
        byte_size: row.try_get("byte_size")?,
        row_count: row.try_get("row_count")?,
        table_count: row.try_get("table_count")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(super) fn payload(row: &SqliteRow) -> LedgerResult<EncryptedPayloadRecord> {
    Ok(EncryptedPayloadRecord {
        job_id: row.try_get("job_id")?,
        location: row.try_get("location")?,
        content_hash: row.try_get("content_hash")?,
        key_id: row.try_get("key_id")?,
        algorithm: row.try_get("algorithm")?,
        tier: parse_col(row, "tier")?,
        byte_size: row.try_get("byte_size")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(super) fn chain_record(row: &SqliteRow) -> LedgerResult<ChainRecord> {
    Ok(ChainRecord {
        job_id: row.try_get("job_id")?,
        network: parse_col(row, "network")?,
        tx_hash: row.try_get("tx_hash")?,
        status: parse_col(row, "status")?,
        confirmations: row.try_get("confirmations")?,
        attempts: row.try_get("attempts")?,
        error: row.try_get("error")?,
        submitted_at: row.try_get("submitted_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
