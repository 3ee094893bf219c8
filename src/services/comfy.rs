//! HTTP transport for the ComfyUI rendering service.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// The three calls the orchestrator makes against a rendering service.
///
/// Production code talks HTTP through [`ComfyClient`]; tests substitute
/// scripted fakes.
#[async_trait]
pub trait RenderService: Send + Sync {
    /// Queue a job graph, returning the service-assigned job id.
    async fn submit(&self, graph: &[u8]) -> Result<String, ServiceError>;

    /// Look up a job. `None` means the service has no terminal record yet.
    async fn history(&self, job_id: &str) -> Result<Option<HistoryEntry>, ServiceError>;

    /// Download the raw bytes of an output file.
    async fn view(&self, filename: &str) -> Result<Vec<u8>, ServiceError>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<(), ServiceError>;
}

/// History record of a job that reached a terminal state.
///
/// Decoding is lenient below the record itself: a node or image entry that
/// does not have the expected shape is skipped, so one odd node never hides
/// the artifact of another.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Node outputs in the order the service sent them.
    #[serde(default, deserialize_with = "ordered_outputs")]
    pub outputs: Vec<(String, NodeOutput)>,
}

/// Outputs attached to one node of the job graph.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default, deserialize_with = "usable_images")]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

struct OrderedOutputs(Vec<(String, NodeOutput)>);

impl<'de> Deserialize<'de> for OrderedOutputs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OutputsVisitor;

        impl<'de> Visitor<'de> for OutputsVisitor {
            type Value = OrderedOutputs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of node id to node outputs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut nodes = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((node_id, raw)) = map.next_entry::<String, Value>()? {
                    match NodeOutput::deserialize(raw) {
                        Ok(output) => nodes.push((node_id, output)),
                        Err(e) => {
                            tracing::debug!(node_id = %node_id, error = %e, "Skipping unreadable node output")
                        }
                    }
                }
                Ok(OrderedOutputs(nodes))
            }
        }

        deserializer.deserialize_map(OutputsVisitor)
    }
}

fn ordered_outputs<'de, D>(deserializer: D) -> Result<Vec<(String, NodeOutput)>, D::Error>
where
    D: Deserializer<'de>,
{
    let outputs = Option::<OrderedOutputs>::deserialize(deserializer)?;
    Ok(outputs.map(|o| o.0).unwrap_or_default())
}

/// `null` reads as no images; entries without a usable filename are dropped.
fn usable_images<'de, D>(deserializer: D) -> Result<Vec<ImageRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|entry| ImageRef::deserialize(entry).ok())
        .collect())
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    prompt: &'a RawValue,
    client_id: &'a str,
}

#[derive(Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

/// reqwest-backed client for a single ComfyUI instance.
pub struct ComfyClient {
    http: Client,
    base_url: String,
    client_id: String,
}

impl ComfyClient {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn ensure_success(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::Status {
            endpoint,
            status,
            body: body.chars().take(512).collect(),
        })
    }
}

#[async_trait]
impl RenderService for ComfyClient {
    async fn submit(&self, graph: &[u8]) -> Result<String, ServiceError> {
        let prompt: &RawValue = serde_json::from_slice(graph)?;
        let body = PromptRequest {
            prompt,
            client_id: &self.client_id,
        };

        let response = self
            .http
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .await?;
        let response = Self::ensure_success("prompt", response).await?;

        let queued: PromptResponse = response.json().await?;
        Ok(queued.prompt_id)
    }

    async fn history(&self, job_id: &str) -> Result<Option<HistoryEntry>, ServiceError> {
        let response = self
            .http
            .get(format!("{}/history/{}", self.base_url, job_id))
            .send()
            .await?;
        let response = Self::ensure_success("history", response).await?;

        let mut history: HashMap<String, HistoryEntry> = response.json().await?;
        Ok(history.remove(job_id))
    }

    async fn view(&self, filename: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .http
            .get(format!("{}/view", self.base_url))
            .query(&[("filename", filename), ("type", "output")])
            .send()
            .await?;
        let response = Self::ensure_success("view", response).await?;

        Ok(response.bytes().await?.to_vec())
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        let response = self
            .http
            .get(format!("{}/system_stats", self.base_url))
            .send()
            .await?;
        Self::ensure_success("system_stats", response).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rendering service returned {status} from /{endpoint}: {body}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("Malformed JSON payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> ComfyClient {
        ComfyClient::new(&server.base_url(), Duration::from_secs(2), Duration::from_secs(5))
            .expect("client")
    }

    #[tokio::test]
    async fn test_submit_wraps_graph_with_client_id() {
        let server = MockServer::start_async().await;
        let comfy = client(&server);
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/prompt")
                    .json_body_includes(r#"{"prompt":{"45":{"inputs":{"text":"a cat"}}}}"#)
                    .json_body_includes(format!(r#"{{"client_id":"{}"}}"#, comfy.client_id()));
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"prompt_id":"abc-123","number":3,"node_errors":{}}"#);
            })
            .await;

        let job_id = comfy
            .submit(br#"{"45":{"inputs":{"text":"a cat"}}}"#)
            .await
            .unwrap();
        assert_eq!(job_id, "abc-123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_non_success_is_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/prompt");
                then.status(400).body(r#"{"error":"invalid prompt"}"#);
            })
            .await;

        let err = client(&server).submit(b"{}").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Status { endpoint: "prompt", status, .. } if status == StatusCode::BAD_REQUEST
        ));
    }

    #[tokio::test]
    async fn test_history_absent_job_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/history/abc");
                then.status(200)
                    .header("content-type", "application/json")
                    .body("{}");
            })
            .await;

        assert!(client(&server).history("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_parses_outputs() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/history/abc");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(
                        r#"{"abc":{"prompt":[],"outputs":{"9":{"images":[{"filename":"ComfyUI_00001_.png","subfolder":"","type":"output"}]}},"status":{"completed":true}}}"#,
                    );
            })
            .await;

        let entry = client(&server).history("abc").await.unwrap().unwrap();
        let (node_id, output) = &entry.outputs[0];
        assert_eq!(node_id, "9");
        assert_eq!(output.images.len(), 1);
        assert_eq!(output.images[0].filename, "ComfyUI_00001_.png");
        assert_eq!(output.images[0].kind, "output");
    }

    async fn history_body(body: &'static str) -> HistoryEntry {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/history/abc");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(body);
            })
            .await;
        client(&server).history("abc").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_history_null_images_reads_as_empty() {
        let entry = history_body(r#"{"abc":{"outputs":{"9":{"images":null}}}}"#).await;
        assert_eq!(entry.outputs.len(), 1);
        assert!(entry.outputs[0].1.images.is_empty());
    }

    #[tokio::test]
    async fn test_history_skips_image_without_filename() {
        let entry = history_body(
            r#"{"abc":{"outputs":{"9":{"images":[{"filename":"a.png"}]},"12":{"images":[{"subfolder":"x"}]}}}}"#,
        )
        .await;
        let names: Vec<_> = entry
            .outputs
            .iter()
            .flat_map(|(_, output)| output.images.iter().map(|i| i.filename.as_str()))
            .collect();
        assert_eq!(names, vec!["a.png"]);
    }

    #[tokio::test]
    async fn test_history_skips_unreadable_node() {
        let entry = history_body(
            r#"{"abc":{"outputs":{"3":"not a node","9":{"images":[{"filename":"a.png"}]}}}}"#,
        )
        .await;
        assert_eq!(entry.outputs.len(), 1);
        assert_eq!(entry.outputs[0].0, "9");
    }

    #[tokio::test]
    async fn test_history_keeps_service_node_order() {
        let entry = history_body(
            r#"{"abc":{"outputs":{"20":{"images":[]},"9":{"images":[]},"preview":{}}}}"#,
        )
        .await;
        let ids: Vec<_> = entry.outputs.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["20", "9", "preview"]);
    }

    #[tokio::test]
    async fn test_history_null_outputs_reads_as_empty() {
        let entry = history_body(r#"{"abc":{"outputs":null,"status":{"completed":true}}}"#).await;
        assert!(entry.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_view_sends_filename_and_type() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/view")
                    .query_param("filename", "ComfyUI_00001_.png")
                    .query_param("type", "output");
                then.status(200).body(vec![0x89, b'P', b'N', b'G']);
            })
            .await;

        let bytes = client(&server).view("ComfyUI_00001_.png").await.unwrap();
        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_view_not_found_is_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/view");
                then.status(404);
            })
            .await;

        assert!(matches!(
            client(&server).view("missing.png").await,
            Err(ServiceError::Status { endpoint: "view", .. })
        ));
    }
}
