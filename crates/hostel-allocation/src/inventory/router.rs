use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::domain::{Bed, BedId, OccupantRef, RoomId};
use super::lifecycle::{BedLifecycleManager, SweepReport};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct HoldBedRequest {
    #[serde(alias = "occupantRef")]
    pub occupant_ref: String,
    #[serde(default, alias = "ttlSeconds")]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AllocateBedRequest {
    #[serde(alias = "occupantRef")]
    pub occupant_ref: String,
}

/// Router exposing the bed lifecycle to collaborating services.
pub fn inventory_router(manager: Arc<BedLifecycleManager>) -> Router {
    Router::new()
        .route("/api/v1/beds/:bed_id", get(bed_handler))
        .route("/api/v1/beds/:bed_id/hold", post(hold_handler))
        .route("/api/v1/beds/:bed_id/allocate", post(allocate_handler))
        .route("/api/v1/beds/:bed_id/release", post(release_handler))
        .route("/api/v1/beds/:bed_id/block", post(block_handler))
        .route("/api/v1/beds/:bed_id/unblock", post(unblock_handler))
        .route("/api/v1/cleanup-expired-holds", post(sweep_handler))
        .route("/api/v1/rooms/:room_id/beds", get(room_beds_handler))
        .route(
            "/api/v1/rooms/:room_id/beds/available",
            get(available_beds_handler),
        )
        .with_state(manager)
}

fn occupant(raw: String) -> Result<OccupantRef, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(crate::error::ServiceError::validation("occupant_ref must not be empty").into());
    }
    Ok(OccupantRef(trimmed.to_string()))
}

pub(crate) async fn bed_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
    Path(bed_id): Path<String>,
) -> Result<Json<Bed>, AppError> {
    Ok(Json(manager.bed(&BedId(bed_id))?))
}

pub(crate) async fn hold_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
    Path(bed_id): Path<String>,
    Json(payload): Json<HoldBedRequest>,
) -> Result<Json<Bed>, AppError> {
    let occupant = occupant(payload.occupant_ref)?;
    Ok(Json(manager.hold(
        &BedId(bed_id),
        occupant,
        payload.ttl_seconds,
    )?))
}

pub(crate) async fn allocate_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
    Path(bed_id): Path<String>,
    Json(payload): Json<AllocateBedRequest>,
) -> Result<Json<Bed>, AppError> {
    let occupant = occupant(payload.occupant_ref)?;
    Ok(Json(manager.allocate(&BedId(bed_id), occupant)?))
}

pub(crate) async fn release_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
    Path(bed_id): Path<String>,
) -> Result<Json<Bed>, AppError> {
    Ok(Json(manager.release(&BedId(bed_id))?))
}

pub(crate) async fn block_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
    Path(bed_id): Path<String>,
) -> Result<Json<Bed>, AppError> {
    Ok(Json(manager.block(&BedId(bed_id))?))
}

pub(crate) async fn unblock_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
    Path(bed_id): Path<String>,
) -> Result<Json<Bed>, AppError> {
    Ok(Json(manager.unblock(&BedId(bed_id))?))
}

pub(crate) async fn sweep_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(manager.sweep_expired_holds()?))
}

pub(crate) async fn room_beds_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Bed>>, AppError> {
    Ok(Json(manager.beds_in_room(&RoomId(room_id))?))
}

pub(crate) async fn available_beds_handler(
    State(manager): State<Arc<BedLifecycleManager>>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Bed>>, AppError> {
    Ok(Json(manager.available_beds_in_room(&RoomId(room_id))?))
}
