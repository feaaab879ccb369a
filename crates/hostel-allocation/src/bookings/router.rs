use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use super::domain::{Booking, BookingId, BookingPatch, NewBooking};
use super::service::BookingService;
use crate::error::AppError;

pub fn booking_router(service: Arc<BookingService>) -> Router {
    Router::new()
        .route("/api/v1/bookings", post(create_handler))
        .route(
            "/api/v1/bookings/:booking_id",
            get(get_handler).patch(update_handler),
        )
        .with_state(service)
}

pub(crate) async fn create_handler(
    State(service): State<Arc<BookingService>>,
    Json(payload): Json<NewBooking>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = service.create(payload)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub(crate) async fn get_handler(
    State(service): State<Arc<BookingService>>,
    Path(booking_id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(service.get(&BookingId(booking_id))?))
}

pub(crate) async fn update_handler(
    State(service): State<Arc<BookingService>>,
    Path(booking_id): Path<String>,
    Json(patch): Json<BookingPatch>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(service.update(&BookingId(booking_id), patch)?))
}
