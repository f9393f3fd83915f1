//! HTTP handlers for risk report submission and listing.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::{RiskReportEntry, RiskReportList, RiskReportReceipt, RiskReportSubmission};

use crate::{
    database::{NewRiskReport, ReportStore},
    error::AppError,
    models::Coordinate,
    risk::assess,
    AppState,
};

fn store(state: &AppState) -> Result<&dyn ReportStore, AppError> {
    state.reports.as_deref().ok_or(AppError::StorageUnavailable)
}

/// Validate and score a submission.
pub fn prepare_report(submission: RiskReportSubmission) -> Result<NewRiskReport, AppError> {
    let reason = submission
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    let missing: Vec<&str> = [
        ("reason", reason.is_none()),
        ("start_lat", submission.start_lat.is_none()),
        ("start_lng", submission.start_lng.is_none()),
        ("end_lat", submission.end_lat.is_none()),
        ("end_lng", submission.end_lng.is_none()),
    ]
    .into_iter()
    .filter_map(|(field, absent)| absent.then_some(field))
    .collect();

    let (Some(reason), Some(start_lat), Some(start_lng), Some(end_lat), Some(end_lng)) = (
        reason,
        submission.start_lat,
        submission.start_lng,
        submission.end_lat,
        submission.end_lng,
    ) else {
        return Err(AppError::MissingFields(missing.join(", ")));
    };

    let start = Coordinate::new(start_lat, start_lng)?;
    let end = Coordinate::new(end_lat, end_lng)?;
    let category = submission
        .category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let assessment = assess(&reason, category.as_deref());

    Ok(NewRiskReport {
        reason,
        category,
        start,
        end,
        danger_score: assessment.score,
        danger_level: assessment.level,
        user_type: submission.user_type,
        age: submission.age,
    })
}

/// POST /api/risk-report-submit
pub async fn submit_report(
    State(state): State<AppState>,
    Json(submission): Json<RiskReportSubmission>,
) -> Result<(StatusCode, Json<RiskReportReceipt>), AppError> {
    let report = prepare_report(submission)?;
    let level = report.danger_level;
    let saved = store(&state)?.insert_report(report).await?;

    Ok((
        StatusCode::CREATED,
        Json(RiskReportReceipt {
            success: true,
            id: saved.id,
            score: saved.danger_score,
            level,
        }),
    ))
}

/// GET /api/complaintsmap
pub async fn list_reports(State(state): State<AppState>) -> Result<Json<RiskReportList>, AppError> {
    let reports = store(&state)?.list_reports().await?;
    let data = reports
        .iter()
        .map(|report| report.to_entry())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(RiskReportList {
        success: true,
        data,
    }))
}

/// GET /api/complaintsmap/:id
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RiskReportEntry>, AppError> {
    let report = store(&state)?.get_report(id).await?;
    Ok(Json(report.to_entry()?))
}
