use axum::{Router, routing::{delete, get}};
use crate::{AppState, controllers::alerts_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route(
            "/alerts",
            get(alerts_controller::get_alerts).post(alerts_controller::post_create_alert),
        )
        .route("/alerts/:id", delete(alerts_controller::delete_alert))
}
