//! Line-delimited JSON-RPC loop.
//!
//! Each input line is one request envelope `{"id", "method", "params"}` and
//! produces exactly one output line, either `{"id", "result"}` or
//! `{"id", "error": {"message"}}`. Requests are handled concurrently and a
//! single writer task serializes the output, so response lines never
//! interleave.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::service::{GenerateImageParams, ImageService};

/// Method name for server metadata.
pub const METHOD_GET_INFO: &str = "get_info";

/// Method name for image generation.
pub const METHOD_GENERATE_IMAGE: &str = "generate_image";

/// Protocol-level failures, reported in the `error` member of a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcFault {
    /// The line is not valid JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// The JSON value is not a request envelope
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The method is not one of the supported calls
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// The params do not match the method's shape
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The result could not be produced
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A decoded, strongly typed call.
#[derive(Debug, Clone)]
pub enum RpcCall {
    GetInfo,
    GenerateImage(GenerateImageParams),
}

impl RpcCall {
    /// Resolve a method name and its raw params into a call.
    pub fn parse(method: &str, params: Option<Value>) -> Result<Self, RpcFault> {
        match method {
            METHOD_GET_INFO => Ok(RpcCall::GetInfo),
            METHOD_GENERATE_IMAGE => {
                let params = params
                    .ok_or_else(|| RpcFault::InvalidParams("Missing parameters".to_string()))?;
                serde_json::from_value(params)
                    .map(RpcCall::GenerateImage)
                    .map_err(|e| RpcFault::InvalidParams(e.to_string()))
            }
            other => Err(RpcFault::UnknownMethod(other.to_string())),
        }
    }

    /// Method name of this call.
    pub fn method(&self) -> &'static str {
        match self {
            RpcCall::GetInfo => METHOD_GET_INFO,
            RpcCall::GenerateImage(_) => METHOD_GENERATE_IMAGE,
        }
    }
}

/// Request envelope as it appears on the wire.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// Error member of a failure response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub message: String,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Success { id: Value, result: Value },
    Failure { id: Value, error: RpcErrorBody },
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: Value, result: Value) -> Self {
        RpcResponse::Success { id, result }
    }

    /// Build a failure response from a fault.
    pub fn failure(id: Value, fault: &RpcFault) -> Self {
        RpcResponse::Failure {
            id,
            error: RpcErrorBody {
                message: fault.to_string(),
            },
        }
    }

    /// Correlation id of this response.
    pub fn id(&self) -> &Value {
        match self {
            RpcResponse::Success { id, .. } | RpcResponse::Failure { id, .. } => id,
        }
    }
}

/// Execute a decoded call against the service.
pub async fn dispatch(service: &ImageService, call: RpcCall) -> Result<Value, RpcFault> {
    match call {
        RpcCall::GetInfo => serde_json::to_value(service.get_info())
            .map_err(|e| RpcFault::Internal(e.to_string())),
        RpcCall::GenerateImage(params) => Ok(Value::String(service.generate_image(params).await)),
    }
}

/// Handle one input line and produce its response.
pub async fn handle_line(service: &ImageService, line: &str) -> RpcResponse {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            let fault = RpcFault::Parse(e.to_string());
            warn!(error = %fault, line_len = line.len(), "Malformed request line");
            return RpcResponse::failure(Value::Null, &fault);
        }
    };

    // Keep the id even when the rest of the envelope is unusable
    let id = value.get("id").cloned().unwrap_or(Value::Null);

    let call = serde_json::from_value::<Envelope>(value)
        .map_err(|e| RpcFault::InvalidRequest(e.to_string()))
        .and_then(|envelope| RpcCall::parse(&envelope.method, envelope.params));

    let call = match call {
        Ok(call) => call,
        Err(fault) => {
            warn!(id = %id, error = %fault, "Rejected request");
            return RpcResponse::failure(id, &fault);
        }
    };

    let method = call.method();
    debug!(id = %id, method, "Dispatching request");

    match dispatch(service, call).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(fault) => {
            error!(id = %id, method, error = %fault, "Request failed");
            RpcResponse::failure(id, &fault)
        }
    }
}

/// Strip the line terminator and decode one raw input line.
///
/// Returns `None` for blank lines.
fn decode_line(mut raw: Vec<u8>) -> Option<Result<String, RpcFault>> {
    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }

    match String::from_utf8(raw) {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(Ok(line)),
        Err(e) => Some(Err(RpcFault::Parse(format!(
            "line is not valid UTF-8: {}",
            e.utf8_error()
        )))),
    }
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<RpcResponse>, mut output: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
    output.shutdown().await
}

/// Run the request loop until `input` reaches end of stream.
///
/// In-flight requests are allowed to finish and their responses are written
/// before this returns.
pub async fn run<R, W>(service: ImageService, input: R, output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    run_until(service, input, output, std::future::pending()).await
}

/// Like [`run`], but also stops reading once `stop` resolves.
///
/// Either way the loop drains: requests already read still get a response.
pub async fn run_until<R, W, F>(
    service: ImageService,
    mut input: R,
    output: W,
    stop: F,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    F: Future<Output = ()>,
{
    tokio::pin!(stop);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_responses(rx, output));

    // Partial reads stay in `buf` if another branch wins the select
    let mut buf = Vec::new();
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let mut read_error = None;

    loop {
        tokio::select! {
            read = input.read_until(b'\n', &mut buf) => match read {
                Ok(n) => {
                    if !buf.is_empty() {
                        match decode_line(std::mem::take(&mut buf)) {
                            None => {}
                            Some(Ok(line)) => {
                                let service = service.clone();
                                let tx = tx.clone();
                                in_flight.spawn(async move {
                                    let response = handle_line(&service, &line).await;
                                    if tx.send(response).is_err() {
                                        warn!("Response writer closed; dropping response");
                                    }
                                });
                            }
                            Some(Err(fault)) => {
                                warn!(error = %fault, "Malformed request line");
                                if tx.send(RpcResponse::failure(Value::Null, &fault)).is_err() {
                                    warn!("Response writer closed; dropping response");
                                }
                            }
                        }
                    }
                    if n == 0 {
                        info!("Input closed");
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to read request line");
                    read_error = Some(e);
                    break;
                }
            },
            _ = &mut stop => {
                info!("Shutdown requested; no longer reading requests");
                break;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Request task failed");
                }
            }
        }
    }

    info!(pending = in_flight.len(), "Waiting for in-flight requests");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Request task failed");
        }
    }

    drop(tx);
    writer.await.map_err(std::io::Error::other)??;

    match read_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::service::test_support::StubGenerator;
    use crate::store::ArtifactStore;

    fn service(dir: &std::path::Path, generator: StubGenerator) -> ImageService {
        ImageService::new(Arc::new(generator), ArtifactStore::new(dir), "http://127.0.0.1:9981")
    }

    async fn run_lines(service: ImageService, input: &str) -> Vec<RpcResponse> {
        run_bytes(service, input.as_bytes()).await
    }

    async fn run_bytes(service: ImageService, input: &[u8]) -> Vec<RpcResponse> {
        let (client, server) = tokio::io::duplex(1 << 16);
        let reader = tokio::spawn(async move {
            let mut client = client;
            let mut out = String::new();
            client.read_to_string(&mut out).await.unwrap();
            out
        });

        run(service, input, server).await.unwrap();
        let out = reader.await.unwrap();

        out.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_get_info_ignores_params() {
        let call = RpcCall::parse("get_info", Some(json!({"x": 1}))).unwrap();
        assert!(matches!(call, RpcCall::GetInfo));
    }

    #[test]
    fn test_parse_generate_image() {
        let call = RpcCall::parse(
            "generate_image",
            Some(json!({"prompt": "a red cube", "aspect_ratio": "16:9"})),
        )
        .unwrap();
        match call {
            RpcCall::GenerateImage(params) => {
                assert_eq!(params.prompt, "a red cube");
                assert_eq!(params.aspect_ratio, Some(json!("16:9")));
            }
            other => panic!("Expected GenerateImage, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_generate_image_requires_params() {
        let err = RpcCall::parse("generate_image", None).unwrap_err();
        assert!(matches!(err, RpcFault::InvalidParams(_)));
    }

    #[test]
    fn test_parse_generate_image_requires_prompt() {
        let err = RpcCall::parse("generate_image", Some(json!({"aspect_ratio": "1:1"}))).unwrap_err();
        assert!(matches!(err, RpcFault::InvalidParams(_)));
    }

    #[test]
    fn test_parse_unknown_method() {
        let err = RpcCall::parse("foo", None).unwrap_err();
        assert_eq!(err.to_string(), "Unknown method: foo");
    }

    #[test]
    fn test_response_wire_format() {
        let ok = RpcResponse::success(json!(7), json!("done"));
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"id":7,"result":"done"}"#);

        let err = RpcResponse::failure(json!("a"), &RpcFault::UnknownMethod("foo".to_string()));
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"id":"a","error":{"message":"Unknown method: foo"}}"#
        );
    }

    #[tokio::test]
    async fn test_unknown_method_has_no_side_effects() {
        let tmp = tempfile::tempdir().unwrap();
        let generator = Arc::new(StubGenerator::images(1));
        let svc = ImageService::new(generator.clone(), ArtifactStore::new(tmp.path()), "http://h:1");

        let response = handle_line(&svc, r#"{"id": 42, "method": "foo"}"#).await;

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"id": 42, "error": {"message": "Unknown method: foo"}})
        );
        assert_eq!(generator.call_count(), 0);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_line_gets_null_id() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), StubGenerator::images(1));

        let response = handle_line(&svc, r#"{"id": 1, "method": "#).await;

        assert_eq!(response.id(), &Value::Null);
        match response {
            RpcResponse::Failure { error, .. } => assert!(error.message.starts_with("Parse error")),
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_envelope_keeps_id() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), StubGenerator::images(1));

        let response = handle_line(&svc, r#"{"id": "abc", "params": {}}"#).await;

        assert_eq!(response.id(), &json!("abc"));
        match response {
            RpcResponse::Failure { error, .. } => {
                assert!(error.message.starts_with("Invalid request"))
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_info_result() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), StubGenerator::images(1));

        let response = handle_line(&svc, r#"{"id": {"n": 1}, "method": "get_info"}"#).await;

        match response {
            RpcResponse::Success { id, result } => {
                assert_eq!(id, json!({"n": 1}));
                assert_eq!(result["name"], "imagen-relay");
                assert_eq!(result["tools"][0]["name"], "generate_image");
            }
            other => panic!("Expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_soft_error_is_a_result() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), StubGenerator::images(1));

        let response = handle_line(
            &svc,
            r#"{"id": 3, "method": "generate_image", "params": {"prompt": "x", "aspect_ratio": "5:4"}}"#,
        )
        .await;

        match response {
            RpcResponse::Success { result, .. } => {
                assert!(result.as_str().unwrap().contains("Supported values"))
            }
            other => panic!("Expected success carrying an error string, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_answers_every_line_and_skips_blank_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), StubGenerator::images(1));

        let input = concat!(
            r#"{"id": 1, "method": "get_info"}"#, "\n",
            "\n",
            "not json\n",
            r#"{"id": 2, "method": "nope"}"#, "\n",
        );
        let responses = run_lines(svc, input).await;

        assert_eq!(responses.len(), 3);
        let mut ids: Vec<String> = responses.iter().map(|r| r.id().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "null"]);
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"{}\r\n".to_vec()), Some(Ok("{}".to_string())));
        assert_eq!(decode_line(b"{}".to_vec()), Some(Ok("{}".to_string())));
        assert_eq!(decode_line(b"  \r\n".to_vec()), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), StubGenerator::images(1));

        let input: &[u8] = b"{\"id\":1,\"method\":\"get_info\"}\n\
            {\"id\":2,\"method\":\"\xff\xfe\"}\n\
            {\"id\":3,\"method\":\"get_info\"}\n";
        let responses = run_bytes(svc, input).await;

        assert_eq!(responses.len(), 3);
        let mut ids: Vec<String> = responses.iter().map(|r| r.id().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "3", "null"]);

        let rejected = responses.iter().find(|r| r.id().is_null()).unwrap();
        match rejected {
            RpcResponse::Failure { error, .. } => assert!(error.message.starts_with("Parse error")),
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_line_without_newline_is_answered() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), StubGenerator::images(1));

        let responses = run_lines(svc, r#"{"id": 5, "method": "get_info"}"#).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id(), &json!(5));
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_requests() {
        let tmp = tempfile::tempdir().unwrap();
        let generator = StubGenerator::images(1).with_delay("slow", Duration::from_millis(100));
        let svc = service(tmp.path(), generator);

        // Input stays open; only the stop future ends the loop
        let (mut input_tx, input_rx) = tokio::io::duplex(1 << 12);
        let (client, server) = tokio::io::duplex(1 << 16);
        let reader = tokio::spawn(async move {
            let mut client = client;
            let mut out = String::new();
            client.read_to_string(&mut out).await.unwrap();
            out
        });

        input_tx
            .write_all(b"{\"id\": 9, \"method\": \"generate_image\", \"params\": {\"prompt\": \"slow\"}}\n")
            .await
            .unwrap();

        let stop = tokio::time::sleep(Duration::from_millis(30));
        run_until(svc, tokio::io::BufReader::new(input_rx), server, stop)
            .await
            .unwrap();

        let out = reader.await.unwrap();
        let responses: Vec<RpcResponse> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id(), &json!(9));
        drop(input_tx);
    }

    #[tokio::test]
    async fn test_run_correlates_ids_with_differing_latency() {
        let tmp = tempfile::tempdir().unwrap();
        let generator = StubGenerator::images(1)
            .with_delay("slow", Duration::from_millis(150))
            .with_delay("medium", Duration::from_millis(50));
        let svc = service(tmp.path(), generator);

        let input = concat!(
            r#"{"id": "a", "method": "generate_image", "params": {"prompt": "slow"}}"#, "\n",
            r#"{"id": "b", "method": "generate_image", "params": {"prompt": "fast", "aspect_ratio": "9:16"}}"#, "\n",
            r#"{"id": "c", "method": "generate_image", "params": {"prompt": "medium", "aspect_ratio": "bogus"}}"#, "\n",
        );
        let responses = run_lines(svc, input).await;
        assert_eq!(responses.len(), 3);

        for response in &responses {
            let RpcResponse::Success { id, result } = response else {
                panic!("Expected success, got {:?}", response);
            };
            let text = result.as_str().unwrap();
            match id.as_str().unwrap() {
                "a" | "b" => assert!(text.starts_with("http://127.0.0.1:9981/images/"), "{}", text),
                "c" => assert!(text.starts_with("Error"), "{}", text),
                other => panic!("unexpected id {}", other),
            }
        }
        // a and b each wrote one file; c was rejected before generation
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 2);
    }
}
