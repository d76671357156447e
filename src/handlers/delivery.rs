use crate::cart::DeliverySelection;
use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use std::sync::Arc;

/// Creates the router for the delivery catalog
pub fn delivery_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_delivery_options))
}

/// The closed delivery catalog, default option first.
async fn list_delivery_options(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let options = state
        .services
        .delivery
        .list_options()
        .await
        .map_err(map_service_error)?;

    let options: Vec<DeliverySelection> = options.into_iter().map(Into::into).collect();
    Ok(success_response(options))
}
