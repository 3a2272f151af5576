use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::ApiGatewayConfig;
use crate::models::{CollectedMetrics, RemoteTask, TaskResult};

const METRICS_TIMEOUT: Duration = Duration::from_secs(15);
const TASKS_TIMEOUT: Duration = Duration::from_secs(10);

/// 上报到 `/metrics` 的请求体
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Unix 时间戳（秒）
    pub timestamp: u64,
    pub node_hostname: String,
    pub metrics_data: CollectedMetrics,
}

impl MetricsPayload {
    pub fn new(node_hostname: &str, metrics_data: CollectedMetrics) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            timestamp,
            node_hostname: node_hostname.to_string(),
            metrics_data,
        }
    }
}

/// API 网关客户端：上报指标、拉取任务、回报任务结果。
///
/// 失败只返回错误，不重试，也不在本地缓存。
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    node: String,
}

impl ApiClient {
    pub fn new(gateway: &ApiGatewayConfig, node: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: gateway.url.trim_end_matches('/').to_string(),
            token: gateway.token.clone(),
            node: node.to_string(),
        })
    }

    pub fn metrics_url(&self) -> String {
        format!("{}/metrics", self.base_url)
    }

    pub fn tasks_url(&self) -> String {
        format!("{}/tasks", self.base_url)
    }

    pub fn task_result_url(&self, task_id: &str) -> String {
        format!("{}/tasks/{}/result", self.base_url, task_id)
    }

    /// 快照的所有权转交给发送方
    pub async fn send_metrics(&self, metrics: CollectedMetrics) -> Result<()> {
        let endpoint = self.metrics_url();
        let payload = MetricsPayload::new(&self.node, metrics);

        log::info!("Sending metrics to {} for node {}...", endpoint, self.node);
        let resp = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.token)
            .timeout(METRICS_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to send HTTP request to {}", endpoint))?;

        let status = resp.status();
        if status.is_success() {
            log::info!("Metrics sent successfully to {}. Status: {}", endpoint, status);
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        log::error!(
            "Error sending metrics to {}. Status: {}, Body: {}",
            endpoint,
            status,
            body
        );
        bail!("API gateway at {} returned error status {}", endpoint, status)
    }

    pub async fn fetch_tasks(&self) -> Result<Vec<RemoteTask>> {
        let endpoint = self.tasks_url();
        let resp = self
            .client
            .get(&endpoint)
            .query(&[("node", self.node.as_str())])
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(TASKS_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("failed to fetch tasks from {}", endpoint))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            log::error!(
                "Error fetching tasks from {}. Status: {}, Body: {}",
                endpoint,
                status,
                body
            );
            bail!("API gateway at {} returned error status {} for tasks", endpoint, status);
        }

        // 网关没有任务时可能返回 `null`
        let tasks = resp
            .json::<Option<Vec<RemoteTask>>>()
            .await
            .with_context(|| format!("failed to decode tasks JSON from {}", endpoint))?
            .unwrap_or_default();
        if !tasks.is_empty() {
            log::info!("Fetched {} task(s) from {}", tasks.len(), endpoint);
        }
        Ok(tasks)
    }

    pub async fn send_task_result(&self, task_id: &str, result: &TaskResult) -> Result<()> {
        let endpoint = self.task_result_url(task_id);
        log::info!("Sending result for task {} to {}...", task_id, endpoint);

        let resp = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.token)
            .timeout(TASKS_TIMEOUT)
            .json(result)
            .send()
            .await
            .with_context(|| format!("failed to send task result for {} to {}", task_id, endpoint))?;

        let status = resp.status();
        if status == reqwest::StatusCode::OK || status == reqwest::StatusCode::CREATED {
            log::info!("Successfully sent result for task {}. Status: {}", task_id, status);
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        log::error!(
            "Error sending task result for {}. Status: {}, Body: {}",
            task_id,
            status,
            body
        );
        bail!(
            "API gateway at {} returned error status {} for task result {}",
            endpoint,
            status,
            task_id
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, ProjectMetrics, SYSTEM_KEY};
    use actix_web::http::{header, StatusCode};
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// 假网关收到的一次请求
    #[derive(Debug, Clone)]
    pub(crate) struct Recorded {
        pub(crate) method: String,
        pub(crate) path: String,
        pub(crate) query: String,
        pub(crate) authorization: Option<String>,
        pub(crate) body: String,
    }

    impl Recorded {
        pub(crate) fn json(&self) -> Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    /// 各个端点的应答
    #[derive(Clone)]
    pub(crate) struct Replies {
        pub(crate) metrics: u16,
        pub(crate) tasks: (u16, &'static str),
        pub(crate) result: u16,
    }

    impl Default for Replies {
        fn default() -> Self {
            Self {
                metrics: 200,
                tasks: (200, "[]"),
                result: 201,
            }
        }
    }

    struct GatewayState {
        replies: Replies,
        requests: Mutex<Vec<Recorded>>,
    }

    async fn gateway(req: HttpRequest, body: web::Bytes, data: web::Data<GatewayState>) -> HttpResponse {
        data.requests.lock().unwrap().push(Recorded {
            method: req.method().to_string(),
            path: req.path().to_string(),
            query: req.query_string().to_string(),
            authorization: req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: String::from_utf8_lossy(&body).into_owned(),
        });

        let replies = &data.replies;
        let (status, body) = if req.path().ends_with("/metrics") {
            (replies.metrics, r#"{"error":"storage offline"}"#)
        } else if req.path().ends_with("/result") {
            (replies.result, "{}")
        } else if req.path().ends_with("/tasks") {
            replies.tasks
        } else {
            (404, "{}")
        };
        HttpResponse::build(StatusCode::from_u16(status).unwrap())
            .content_type("application/json")
            .body(body)
    }

    /// 本地 actix 服务器扮演 API 网关，记录收到的每个请求
    pub(crate) struct FakeGateway {
        pub(crate) url: String,
        state: web::Data<GatewayState>,
    }

    impl FakeGateway {
        /// 需要在 actix 运行时中调用
        pub(crate) fn start(replies: Replies) -> Self {
            let state = web::Data::new(GatewayState {
                replies,
                requests: Mutex::default(),
            });
            let data = state.clone();
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(data.clone())
                    .default_service(web::to(gateway))
            })
            .workers(1)
            .bind(("127.0.0.1", 0))
            .unwrap();
            let addr = server.addrs()[0];
            actix_rt::spawn(server.run());
            Self {
                url: format!("http://{}", addr),
                state,
            }
        }

        pub(crate) fn requests(&self) -> Vec<Recorded> {
            self.state.requests.lock().unwrap().clone()
        }
    }

    fn client(url: &str) -> ApiClient {
        ApiClient::new(
            &ApiGatewayConfig {
                url: url.to_string(),
                token: "secret".to_string(),
            },
            "node-1",
        )
        .unwrap()
    }

    #[test]
    fn test_endpoints_strip_trailing_slash() {
        let c = client("https://gw.example.com/v1/");
        assert_eq!(c.metrics_url(), "https://gw.example.com/v1/metrics");
        assert_eq!(c.tasks_url(), "https://gw.example.com/v1/tasks");
        assert_eq!(
            c.task_result_url("t-9"),
            "https://gw.example.com/v1/tasks/t-9/result"
        );
    }

    #[test]
    fn test_payload_shape() {
        let mut metrics = CollectedMetrics::new();
        metrics.insert(
            SYSTEM_KEY.to_string(),
            ProjectMetrics {
                ram_percent: Some(50.0),
                ..Default::default()
            },
        );
        let value = serde_json::to_value(MetricsPayload::new("node-1", metrics)).unwrap();
        assert_eq!(value["node_hostname"], json!("node-1"));
        assert_eq!(value["metrics_data"]["_system"], json!({"ram_percent": 50.0}));
        assert!(value["timestamp"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_an_error() {
        let c = client("http://127.0.0.1:9");
        assert!(c.send_metrics(CollectedMetrics::new()).await.is_err());
        assert!(c.fetch_tasks().await.is_err());
    }

    #[actix_rt::test]
    async fn test_send_metrics_with_bearer_token() {
        let gw = FakeGateway::start(Replies::default());
        let c = client(&format!("{}/v1/", gw.url));

        let mut metrics = CollectedMetrics::new();
        metrics.insert("web".to_string(), ProjectMetrics::default());
        c.send_metrics(metrics).await.unwrap();

        let requests = gw.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/v1/metrics");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer secret"));
        let body = requests[0].json();
        assert_eq!(body["node_hostname"], json!("node-1"));
        assert!(body["metrics_data"].get("web").is_some());
    }

    #[actix_rt::test]
    async fn test_error_status_is_an_error() {
        let gw = FakeGateway::start(Replies {
            metrics: 500,
            tasks: (503, "maintenance"),
            result: 500,
        });
        let c = client(&gw.url);

        let err = c.send_metrics(CollectedMetrics::new()).await.unwrap_err();
        assert!(err.to_string().contains("500"), "{}", err);
        let err = c.fetch_tasks().await.unwrap_err();
        assert!(err.to_string().contains("503"), "{}", err);
        let result = TaskResult {
            status: ExecutionStatus::Completed,
            output: String::new(),
        };
        assert!(c.send_task_result("t-1", &result).await.is_err());
    }

    #[actix_rt::test]
    async fn test_fetch_tasks_decodes_task_list() {
        let gw = FakeGateway::start(Replies {
            tasks: (
                200,
                r#"[{"id":"1","cmd":"echo hi"},{"id":"2","cmd":"uptime","project_id":"web"}]"#,
            ),
            ..Replies::default()
        });
        let c = client(&gw.url);

        let tasks = c.fetch_tasks().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "1");
        assert_eq!(tasks[0].command, "echo hi");
        assert_eq!(tasks[1].project.as_deref(), Some("web"));

        let requests = gw.requests();
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].path, "/tasks");
        assert_eq!(requests[0].query, "node=node-1");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer secret"));
    }

    #[actix_rt::test]
    async fn test_null_task_list_is_empty() {
        let gw = FakeGateway::start(Replies {
            tasks: (200, "null"),
            ..Replies::default()
        });
        assert!(client(&gw.url).fetch_tasks().await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_task_result_accepts_200_and_201() {
        let result = TaskResult {
            status: ExecutionStatus::TimedOut,
            output: "partial".to_string(),
        };
        for status in [200, 201] {
            let gw = FakeGateway::start(Replies {
                result: status,
                ..Replies::default()
            });
            client(&gw.url).send_task_result("t-7", &result).await.unwrap();

            let requests = gw.requests();
            assert_eq!(requests[0].path, "/tasks/t-7/result");
            assert_eq!(requests[0].authorization.as_deref(), Some("Bearer secret"));
            assert_eq!(
                requests[0].json(),
                json!({"status": "timed_out", "output": "partial"})
            );
        }

        let gw = FakeGateway::start(Replies {
            result: 202,
            ..Replies::default()
        });
        assert!(client(&gw.url).send_task_result("t-7", &result).await.is_err());
    }
}
