use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Query,
    },
    Json,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

use super::{OrganisationAccount, PlanCatalogEntry, TopUpReceipt, UsageService, UseCreditReceipt};

/// key: billing-api -> usage endpoints
pub async fn set_plan(
    Extension(service): Extension<Arc<UsageService>>,
    payload: Result<Json<SetPlanRequest>, JsonRejection>,
) -> AppResult<Json<OrganisationAccount>> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let account = service.set_plan(&payload.org_id, &payload.plan).await?;
    Ok(Json(account))
}

pub async fn set_user_limit(
    Extension(service): Extension<Arc<UsageService>>,
    payload: Result<Json<SetUserLimitRequest>, JsonRejection>,
) -> AppResult<Json<OrganisationAccount>> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let account = service
        .set_user_limit(&payload.org_id, payload.limit)
        .await?;
    Ok(Json(account))
}

pub async fn get_org(
    Extension(service): Extension<Arc<UsageService>>,
    query: Result<Query<GetOrgQuery>, QueryRejection>,
) -> AppResult<Json<OrganisationAccount>> {
    let Query(query) =
        query.map_err(|err| AppError::InvalidInput(format!("malformed query: {err}")))?;
    let org_id = query
        .org_id
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("org_id parameter is required".into()))?;
    let account = service.get_org(&org_id).await?;
    Ok(Json(account))
}

pub async fn use_credit(
    Extension(service): Extension<Arc<UsageService>>,
    payload: Result<Json<UseCreditRequest>, JsonRejection>,
) -> AppResult<Json<UseCreditReceipt>> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let receipt = service
        .use_credit(&payload.org_id, &payload.user_id, &payload.enquiry_id)
        .await?;
    Ok(Json(receipt))
}

pub async fn top_up(
    Extension(service): Extension<Arc<UsageService>>,
    payload: Result<Json<TopUpRequest>, JsonRejection>,
) -> AppResult<Json<TopUpReceipt>> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let receipt = service.top_up(&payload.org_id, payload.credits).await?;
    Ok(Json(receipt))
}

pub async fn list_plans(
    Extension(service): Extension<Arc<UsageService>>,
) -> Json<Vec<PlanCatalogEntry>> {
    Json(service.catalog().entries())
}

fn invalid_body(err: JsonRejection) -> AppError {
    AppError::InvalidInput(format!("malformed request body: {err}"))
}

#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    pub org_id: String,
    pub plan: String,
}

#[derive(Debug, Deserialize)]
pub struct SetUserLimitRequest {
    pub org_id: String,
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct GetOrgQuery {
    #[serde(default)]
    pub org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UseCreditRequest {
    pub org_id: String,
    pub user_id: String,
    pub enquiry_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub org_id: String,
    pub credits: i64,
}
