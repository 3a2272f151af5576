use actix_web::{web, HttpResponse, Responder};

use crate::state::AppState;

/// 最近一次采集的完整快照；第一个周期完成前返回 404
pub async fn get_snapshot(data: web::Data<AppState>) -> impl Responder {
    let state = match data.lock() {
        Ok(state) => state,
        Err(poisoned) => poisoned.into_inner(),
    };

    match &state.last_snapshot {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "status": "error",
            "message": format!("No collection cycle has completed yet on node '{}'", state.node)
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::health;
    use crate::models::{CollectedMetrics, ProjectMetrics};
    use crate::state::{new_state, Snapshot};
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn test_snapshot_before_and_after_first_cycle() {
        let state = new_state("node-1");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/api/snapshot", web::get().to(get_snapshot)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/snapshot").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);

        let mut metrics = CollectedMetrics::new();
        metrics.insert(
            "web".to_string(),
            ProjectMetrics {
                process_count: 2,
                ..Default::default()
            },
        );
        state.lock().unwrap().last_snapshot = Some(Snapshot {
            timestamp: 1,
            node: "node-1".into(),
            cycle: 1,
            metrics,
        });

        let req = test::TestRequest::get().uri("/api/snapshot").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["metrics"]["web"]["process_count"], 2);
        assert_eq!(body["cycle"], 1);
    }

    #[actix_rt::test]
    async fn test_health() {
        let app = test::init_service(App::new().route("/health", web::get().to(health))).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
    }
}
