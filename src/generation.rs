use crate::errors::{AppError, AppResult};
use crate::models::{ProgressSettings, Responses};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ROADMAP_PATH: &str = "/api/generate-roadmap";
const VALUE_ANALYSIS_PATH: &str = "/api/generate-value-analysis";
const USER_AGENT: &str = concat!("client-portal-progress/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadmapRequest {
    pub group_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part2_responses: Option<Responses>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueAnalysisRequest {
    pub group_id: String,
    pub user_id: String,
    pub part3_responses: Responses,
}

/// Artifacts the service chose to return inline. It usually persists them
/// itself, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResult {
    pub board: Option<serde_json::Value>,
    pub roadmap: Option<serde_json::Value>,
    pub value_analysis: Option<Responses>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineArtifacts {
    #[serde(default)]
    board: Option<serde_json::Value>,
    #[serde(default)]
    roadmap: Option<serde_json::Value>,
    #[serde(default, alias = "value_analysis", alias = "data")]
    value_analysis: Option<serde_json::Value>,
}

impl GenerationResult {
    fn from_value(raw: serde_json::Value) -> Self {
        let inline = serde_json::from_value::<InlineArtifacts>(raw.clone()).unwrap_or_default();
        Self {
            board: inline.board.filter(|value| !value.is_null()),
            roadmap: inline.roadmap.filter(|value| !value.is_null()),
            value_analysis: match inline.value_analysis {
                Some(serde_json::Value::Object(map)) if !map.is_empty() => Some(map),
                _ => None,
            },
            raw,
        }
    }
}

/// Client for the remote roadmap and value-analysis generator.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GenerationClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> AppResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AppError::Validation("generation base url is empty".to_string()));
        }
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|error| AppError::Internal(error.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    /// `None` when no generator is configured.
    pub fn from_settings(settings: &ProgressSettings) -> AppResult<Option<Self>> {
        match settings.generation_base_url.as_deref() {
            Some(base_url) if !base_url.trim().is_empty() => Self::new(
                base_url,
                settings.generation_api_key.clone(),
                Duration::from_secs(settings.generation_timeout_seconds),
            )
            .map(Some),
            _ => Ok(None),
        }
    }

    pub async fn request_roadmap(&self, request: &RoadmapRequest) -> AppResult<GenerationResult> {
        self.post(ROADMAP_PATH, request).await
    }

    pub async fn request_value_analysis(&self, request: &ValueAnalysisRequest) -> AppResult<GenerationResult> {
        self.post(VALUE_ANALYSIS_PATH, request).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> AppResult<GenerationResult> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http_client.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.header("X-API-Key", api_key);
        }

        tracing::debug!(url = %url, "requesting generation");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!(
                "{} returned {}: {}",
                path,
                status.as_u16(),
                detail.chars().take(512).collect::<String>()
            )));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(GenerationResult::default());
        }
        let raw: serde_json::Value = serde_json::from_str(&text)
            .map_err(|error| AppError::Remote(format!("{} returned invalid json: {}", path, error)))?;
        Ok(GenerationResult::from_value(raw))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{GenerationClient, GenerationResult, RoadmapRequest, ValueAnalysisRequest};
    use crate::errors::AppError;
    use crate::models::{ProgressSettings, Responses};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and hands back the raw request.
    pub(crate) async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            let mut buffer = [0u8; 4096];
            loop {
                let read = socket.read(&mut buffer).await.expect("read");
                if read == 0 {
                    break;
                }
                received.extend_from_slice(&buffer[..read]);
                if request_complete(&received) {
                    break;
                }
            }
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received).to_string()
        });
        (format!("http://{}", address), handle)
    }

    fn request_complete(received: &[u8]) -> bool {
        let text = String::from_utf8_lossy(received);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        received.len() >= header_end + 4 + content_length
    }

    #[test]
    fn request_bodies_use_service_field_names() {
        let mut responses = Responses::new();
        responses.insert("q1".to_string(), serde_json::json!("yes"));
        let body = serde_json::to_value(ValueAnalysisRequest {
            group_id: "group-1".to_string(),
            user_id: "user-1".to_string(),
            part3_responses: responses,
        })
        .expect("serialize");
        assert_eq!(body["group_id"], "group-1");
        assert_eq!(body["part3_responses"]["q1"], "yes");

        let roadmap = serde_json::to_value(RoadmapRequest {
            group_id: "group-1".to_string(),
            user_id: "user-1".to_string(),
            part2_responses: None,
        })
        .expect("serialize");
        assert!(roadmap.get("part2_responses").is_none());
    }

    #[test]
    fn inline_artifacts_are_picked_out_of_results() {
        let result = GenerationResult::from_value(serde_json::json!({
            "summary": "ok",
            "data": { "score": 81 },
            "board": null
        }));
        assert!(result.board.is_none());
        assert_eq!(
            result.value_analysis.and_then(|analysis| analysis.get("score").cloned()),
            Some(serde_json::json!(81))
        );

        let odd = GenerationResult::from_value(serde_json::json!(["not", "an", "object"]));
        assert!(odd.roadmap.is_none());
    }

    #[test]
    fn unconfigured_settings_build_no_client() {
        assert!(GenerationClient::from_settings(&ProgressSettings::default())
            .expect("settings")
            .is_none());
        assert!(GenerationClient::new("  ", None, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn posts_json_with_api_key() {
        let (base_url, server) =
            serve_once("HTTP/1.1 200 OK", r#"{"roadmap":{"weeks":12},"board":{"seats":3}}"#).await;
        let client =
            GenerationClient::new(&base_url, Some("secret".to_string()), Duration::from_secs(5)).expect("client");

        let result = client
            .request_roadmap(&RoadmapRequest {
                group_id: "group-1".to_string(),
                user_id: "user-1".to_string(),
                part2_responses: Some(Responses::new()),
            })
            .await
            .expect("roadmap");
        assert_eq!(result.roadmap, Some(serde_json::json!({ "weeks": 12 })));
        assert!(result.board.is_some());

        let request = server.await.expect("server").to_lowercase();
        assert!(request.starts_with("post /api/generate-roadmap"));
        assert!(request.contains("x-api-key: secret"));
        assert!(request.contains("\"group_id\":\"group-1\""));
    }

    #[tokio::test]
    async fn error_status_becomes_remote_failure() {
        let (base_url, server) = serve_once("HTTP/1.1 502 Bad Gateway", r#"{"error":"upstream"}"#).await;
        let client = GenerationClient::new(&base_url, None, Duration::from_secs(5)).expect("client");

        let error = client
            .request_value_analysis(&ValueAnalysisRequest {
                group_id: "group-1".to_string(),
                user_id: "user-1".to_string(),
                part3_responses: Responses::new(),
            })
            .await
            .expect_err("bad gateway");
        assert!(matches!(error, AppError::Remote(message) if message.contains("502")));
        let request = server.await.expect("server");
        assert!(!request.to_lowercase().contains("x-api-key"));
    }
}
