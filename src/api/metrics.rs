use actix_web::{HttpResponse, Responder};

use crate::metrics::METRICS;

pub async fn get_metrics() -> impl Responder {
    match METRICS.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            log::error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().body(format!("Failed to render metrics: {}", e))
        }
    }
}
