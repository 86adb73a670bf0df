use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    api::error::ApiError,
    auth::{require_bearer, AuthToken},
    config::Config,
    controller::{AppState, TickReport},
    domain::EquipmentKind,
    registry::EquipmentSnapshot,
};

pub fn router(state: AppState, cfg: &Config) -> Router {
    let token = AuthToken::new(cfg.auth.token.clone());
    Router::new()
        .route("/status", get(get_status))
        .route("/equipment", get(list_equipment).post(register_equipment))
        .route(
            "/equipment/:id",
            get(get_equipment).delete(unregister_equipment),
        )
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(token, require_bearer))
}

/// Registered appliance as shown by the admin API.
#[derive(Debug, Serialize)]
pub struct EquipmentInfo {
    pub id: String,
    pub kind: EquipmentKind,
    pub priority: u8,
    pub current_mode: u32,
    pub prior_mode: u32,
    pub suspended: bool,
}

impl From<EquipmentSnapshot> for EquipmentInfo {
    fn from(snap: EquipmentSnapshot) -> Self {
        Self {
            id: snap.id,
            kind: snap.kind,
            priority: snap.priority,
            current_mode: snap.current_mode,
            prior_mode: snap.prior_mode,
            suspended: snap.suspended,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub equipment_total: usize,
    pub equipment_suspended: usize,
    pub last_tick: Option<TickReport>,
}

pub async fn get_status(State(st): State<AppState>) -> impl IntoResponse {
    let status = SystemStatus {
        equipment_total: st.registry.len(),
        equipment_suspended: st.registry.suspended_snapshot().len(),
        last_tick: st.controller.last_report().await,
    };
    (StatusCode::OK, Json(status))
}

pub async fn list_equipment(State(st): State<AppState>) -> impl IntoResponse {
    let equipment: Vec<EquipmentInfo> = st
        .registry
        .all_snapshot()
        .into_iter()
        .map(EquipmentInfo::from)
        .collect();
    (StatusCode::OK, Json(equipment))
}

pub async fn get_equipment(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EquipmentInfo>, ApiError> {
    st.registry
        .get(&id)
        .map(|snap| Json(EquipmentInfo::from(snap)))
        .ok_or_else(|| ApiError::NotFound(format!("equipment {id}")))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 128))]
    pub uid: String,
    #[serde(default)]
    pub control_address: String,
    #[validate(length(min = 1))]
    pub adapter: String,
}

pub async fn register_equipment(
    State(st): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    match st
        .registration
        .register(&req.uid, &req.control_address, &req.adapter)
        .await
    {
        Ok(true) => {
            let info = st
                .registry
                .get(&req.uid)
                .map(EquipmentInfo::from)
                .ok_or_else(|| {
                    ApiError::InternalError("record vanished after registration".into())
                })?;
            Ok((StatusCode::CREATED, Json(info)))
        }
        Ok(false) => Err(ApiError::Conflict(format!("uid {} already registered", req.uid))),
        Err(e) => Err(ApiError::BadRequest(e.to_string())),
    }
}

pub async fn unregister_equipment(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    // Absent ids are a no-op by contract, so the outcome is the same.
    st.registration.unregister(&id);
    StatusCode::NO_CONTENT
}
