use super::tables::{normalize_unit, round_to_i64, translate_record_type, translate_status};
use super::MapContext;
use crate::identity::canonical_id_of;
use crate::models::ids::{case_id_for, case_number_for};
use crate::models::{SourceCaseRecord, TargetCase};
use uuid::Uuid;

/// Build the case row for a source record under its parent account
///
/// Returns `None` when the record has no customer identifier (it can never
/// have a parent account).
pub fn map_case(record: &SourceCaseRecord, account_id: Uuid, ctx: &MapContext) -> Option<TargetCase> {
    canonical_id_of(record)?;

    let created_at = record
        .created_at
        .or(record.updated_at)
        .unwrap_or(ctx.migrated_at);

    Some(TargetCase {
        id: case_id_for(&record.source_id),
        case_number: case_number_for(&record.source_id),
        account_id,
        status: translate_status(record.status.as_deref()),
        record_type: translate_record_type(record.record_type.as_deref()),
        unit: normalize_unit(record.unit.as_deref()),
        transcript: record.transcript.clone(),
        summary: record.summary.clone(),
        audio_url: record.audio.as_ref().map(|a| a.uri.clone()),
        duration_seconds: record
            .audio
            .as_ref()
            .and_then(|a| a.duration_seconds)
            .filter(|d| *d >= 0.0)
            .and_then(round_to_i64),
        owner_id: ctx.owner_id.clone(),
        source_id: record.source_id.clone(),
        created_at,
        updated_at: record.updated_at.unwrap_or(created_at),
    })
}
