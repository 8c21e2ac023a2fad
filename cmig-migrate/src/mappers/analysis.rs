use super::tables::{round_to_i64, translate_decision_maker};
use super::MapContext;
use crate::models::ids::analysis_id_for;
use crate::models::{SourceCaseRecord, TargetAnalysis};
use serde_json::Value;
use uuid::Uuid;

/// Build the analysis row for a case
///
/// Returns `None` when the record carries no usable analysis payload.
pub fn map_analysis(
    record: &SourceCaseRecord,
    case_id: Uuid,
    account_id: Uuid,
    ctx: &MapContext,
) -> Option<TargetAnalysis> {
    let payload = record.analysis.as_ref().filter(|a| a.is_usable())?;

    Some(TargetAnalysis {
        id: analysis_id_for(&record.source_id),
        case_id,
        account_id,
        decision_maker: translate_decision_maker(payload.decision_maker.as_deref()),
        overall_score: payload.overall_score.and_then(round_to_i64),
        summary: payload.summary.clone(),
        payload: Value::Object(payload.stages.clone()),
        source_id: record.source_id.clone(),
        created_at: record
            .updated_at
            .or(record.created_at)
            .unwrap_or(ctx.migrated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisPayload, DecisionMaker};
    use chrono::Utc;
    use serde_json::json;

    fn payload(stages: Value) -> AnalysisPayload {
        AnalysisPayload {
            stages: stages.as_object().cloned().unwrap_or_default(),
            decision_maker: Some("yes".into()),
            overall_score: Some(72.5),
            summary: None,
        }
    }

    #[test]
    fn test_analysis_carries_stages_verbatim() {
        let mut record = SourceCaseRecord::new("A1");
        let stages = json!({"metrics": {"score": 3, "notes": ["a", "b"]}, "champion": null});
        record.analysis = Some(payload(stages.clone()));

        let ctx = MapContext::new("p", Utc::now());
        let analysis = map_analysis(&record, Uuid::new_v4(), Uuid::new_v4(), &ctx).unwrap();
        assert_eq!(analysis.payload, stages);
        assert_eq!(analysis.decision_maker, DecisionMaker::Yes);
        assert_eq!(analysis.overall_score, Some(73));
    }

    #[test]
    fn test_no_payload_no_analysis() {
        let record = SourceCaseRecord::new("A1");
        let ctx = MapContext::new("p", Utc::now());
        assert!(map_analysis(&record, Uuid::new_v4(), Uuid::new_v4(), &ctx).is_none());
    }

    #[test]
    fn test_empty_payload_no_analysis() {
        let mut record = SourceCaseRecord::new("A1");
        record.analysis = Some(AnalysisPayload {
            stages: Default::default(),
            decision_maker: Some("yes".into()),
            overall_score: None,
            summary: None,
        });
        let ctx = MapContext::new("p", Utc::now());
        assert!(map_analysis(&record, Uuid::new_v4(), Uuid::new_v4(), &ctx).is_none());
    }
}
