pub mod metrics;
pub mod snapshot;

pub use metrics::get_metrics;
pub use snapshot::get_snapshot;

use actix_web::{HttpResponse, Responder};

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy"
    }))
}
