//! Subprocess collaborator bridge.
//!
//! Every collaborator capability is served by one long-lived helper process
//! speaking JSON lines over stdin/stdout. The helper announces itself with
//! `{"type":"ready"}`, answers each `call` with a `result` or an `error`
//! carrying the same id, and exits on `shutdown`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use medialens_shared::{AnswerSet, BridgeConfig, Job, JobKey, MediaLensError, Result};

use crate::collaborators::{Extractor, Harvester, Interpreter, Publisher, Renderer, Summarizer};

/// Environment variable telling the helper where job artifacts live.
pub const ARTIFACT_ROOT_ENV: &str = "MEDIALENS_ARTIFACT_ROOT";

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Message sent to the helper.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Call {
        id: String,
        capability: &'a str,
        payload: Value,
    },
    Shutdown,
}

/// Message received from the helper.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result {
        id: String,
        #[serde(default)]
        result: Value,
    },
    Error {
        id: String,
        error: String,
        #[serde(default)]
        retryable: bool,
    },
}

fn provider_error(message: String, retryable: bool) -> MediaLensError {
    if retryable {
        MediaLensError::TransientProvider(message)
    } else {
        MediaLensError::FatalProvider(message)
    }
}

fn bridge_error(message: impl Into<String>) -> MediaLensError {
    MediaLensError::FatalProvider(format!("bridge: {}", message.into()))
}

// ---------------------------------------------------------------------------
// Launch options
// ---------------------------------------------------------------------------

/// How to start the helper process.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub cmd: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Artifact root exported to the helper as [`ARTIFACT_ROOT_ENV`].
    pub artifact_root: PathBuf,
}

impl BridgeOptions {
    pub fn from_config(config: &BridgeConfig, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            cmd: config.cmd.clone(),
            args: vec![config.script.clone()],
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
            artifact_root: artifact_root.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl BridgeHandle {
    async fn spawn(options: &BridgeOptions) -> Result<Self> {
        info!(cmd = %options.cmd, args = ?options.args, "spawning collaborator bridge");

        let mut command = Command::new(&options.cmd);
        command
            .args(&options.args)
            .env(ARTIFACT_ROOT_ENV, &options.artifact_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &options.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            bridge_error(format!(
                "failed to spawn: {e}. Is `{}` installed?",
                options.cmd
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| bridge_error("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| bridge_error("failed to capture stdout"))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };
        handle.wait_for_ready().await?;
        Ok(handle)
    }

    async fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .await
            .map_err(|e| bridge_error(format!("read error: {e}")))?;
        if line.is_empty() {
            return Err(bridge_error("helper closed stdout unexpectedly"));
        }
        serde_json::from_str(line.trim()).map_err(|e| {
            bridge_error(format!(
                "invalid message: {e} (got: {})",
                line.trim().chars().take(200).collect::<String>()
            ))
        })
    }

    async fn write_message(&mut self, message: &RequestMessage<'_>) -> Result<()> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| bridge_error(format!("failed to serialize request: {e}")))?;
        json.push('\n');
        self.stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| bridge_error(format!("failed to write stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| bridge_error(format!("failed to flush stdin: {e}")))
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message().await? {
            ResponseMessage::Ready => {
                info!("bridge is ready");
                Ok(())
            }
            other => Err(bridge_error(format!("expected ready message, got {other:?}"))),
        }
    }

    async fn call(&mut self, capability: &str, payload: Value) -> Result<Value> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);
        debug!(%id, capability, "bridge call");

        self.write_message(&RequestMessage::Call {
            id: id.clone(),
            capability,
            payload,
        })
        .await?;

        match self.read_message().await? {
            ResponseMessage::Result { id: resp_id, result } if resp_id == id => Ok(result),
            ResponseMessage::Error {
                id: resp_id,
                error,
                retryable,
            } if resp_id == id => Err(provider_error(format!("{capability}: {error}"), retryable)),
            ResponseMessage::Ready => Err(bridge_error("unexpected ready message")),
            other => Err(bridge_error(format!("response id mismatch for {id}: {other:?}"))),
        }
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.write_message(&RequestMessage::Shutdown).await {
            warn!(error = %e, "could not send shutdown to bridge");
        }
        match self.child.wait().await {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator implementation
// ---------------------------------------------------------------------------

/// All collaborator capabilities served by one helper process.
///
/// Calls are serialized; the helper sees one request at a time.
pub struct SubprocessBridge {
    handle: Mutex<Option<BridgeHandle>>,
}

impl SubprocessBridge {
    /// Start the helper and wait for its ready message.
    pub async fn spawn(options: &BridgeOptions) -> Result<Self> {
        let handle = BridgeHandle::spawn(options).await?;
        Ok(Self {
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Invoke `capability` with `payload`.
    #[instrument(skip_all, fields(capability = %capability))]
    pub async fn call(&self, capability: &str, payload: Value) -> Result<Value> {
        let mut guard = self.handle.lock().await;
        let handle = guard
            .as_mut()
            .ok_or_else(|| bridge_error("already shut down"))?;
        handle.call(capability, payload).await
    }

    /// Ask the helper to exit and wait for it.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.shutdown().await;
        }
    }

    async fn call_unit(&self, capability: &str, payload: Value) -> Result<()> {
        self.call(capability, payload).await.map(|_| ())
    }
}

fn decode<T: serde::de::DeserializeOwned>(capability: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| bridge_error(format!("unexpected {capability} result: {e}")))
}

fn job_payload(job: &Job, sites: &[String]) -> Value {
    json!({"job": job.key, "job_path": job.path, "sites": sites})
}

#[async_trait]
impl Harvester for SubprocessBridge {
    async fn harvest(&self, job: JobKey, job_path: &str, sites: &[String]) -> Result<()> {
        self.call_unit(
            "harvest",
            json!({"job": job, "job_path": job_path, "sites": sites}),
        )
        .await
    }

    async fn scrape(&self, job: JobKey, job_path: &str, sites: &[String]) -> Result<()> {
        self.call_unit(
            "scrape",
            json!({"job": job, "job_path": job_path, "sites": sites}),
        )
        .await
    }

    async fn clean(&self, job: &Job, sites: &[String]) -> Result<()> {
        self.call_unit("clean", job_payload(job, sites)).await
    }

    async fn reharvest(&self, job: &Job, sites: &[String]) -> Result<()> {
        self.call_unit("reharvest", job_payload(job, sites)).await
    }
}

#[async_trait]
impl Extractor for SubprocessBridge {
    async fn extract(&self, job: &Job, sites: &[String]) -> Result<()> {
        self.call_unit("extract", job_payload(job, sites)).await
    }
}

#[async_trait]
impl Interpreter for SubprocessBridge {
    async fn interpret(&self, site: &str, content: &Value, questions: &[String]) -> Result<AnswerSet> {
        let result = self
            .call(
                "interpret",
                json!({"site": site, "content": content, "questions": questions}),
            )
            .await?;
        decode("interpret", result)
    }
}

#[async_trait]
impl Summarizer for SubprocessBridge {
    async fn summarize(&self, job: &Job, interpretations: &[(String, AnswerSet)]) -> Result<String> {
        let sites: Vec<Value> = interpretations
            .iter()
            .map(|(site, answers)| json!({"site": site, "answers": answers}))
            .collect();
        let result = self
            .call(
                "summarize",
                json!({"job": job.key, "job_path": job.path, "interpretations": sites}),
            )
            .await?;
        decode("summarize", result)
    }
}

#[async_trait]
impl Renderer for SubprocessBridge {
    async fn render(&self, template_id: &str, data: &Value) -> Result<Vec<u8>> {
        let result = self
            .call("render", json!({"template_id": template_id, "data": data}))
            .await?;
        let document: String = decode("render", result)?;
        Ok(document.into_bytes())
    }
}

#[async_trait]
impl Publisher for SubprocessBridge {
    async fn put_object(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let content = std::str::from_utf8(bytes)
            .map_err(|e| bridge_error(format!("{path} is not UTF-8: {e}")))?;
        self.call_unit("put_object", json!({"path": path, "content": content}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_message_shape() {
        let msg = RequestMessage::Call {
            id: "req-1".into(),
            capability: "interpret",
            payload: json!({"site": "www.cnn.com"}),
        };
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "call",
                "id": "req-1",
                "capability": "interpret",
                "payload": {"site": "www.cnn.com"}
            })
        );
        let shutdown = serde_json::to_string(&RequestMessage::Shutdown).unwrap();
        assert_eq!(shutdown, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn error_responses_map_by_retryability() {
        let msg: ResponseMessage =
            serde_json::from_str(r#"{"type":"error","id":"req-2","error":"rate limited","retryable":true}"#)
                .unwrap();
        let ResponseMessage::Error { error, retryable, .. } = msg else {
            panic!("expected error message");
        };
        assert!(provider_error(error, retryable).is_retryable());

        let msg: ResponseMessage =
            serde_json::from_str(r#"{"type":"error","id":"req-3","error":"bad key"}"#).unwrap();
        let ResponseMessage::Error { error, retryable, .. } = msg else {
            panic!("expected error message");
        };
        assert!(matches!(
            provider_error(error, retryable),
            MediaLensError::FatalProvider(_)
        ));
    }

    fn shell_bridge(script: &str) -> BridgeOptions {
        BridgeOptions {
            cmd: "sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: None,
            artifact_root: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn round_trip_through_helper_process() {
        let script = r#"
printf '{"type":"ready"}\n'
read -r line
printf '{"type":"result","id":"req-1","result":[{"question":"Q","answer":"A"}]}\n'
read -r line
printf '{"type":"error","id":"req-2","error":"busy","retryable":true}\n'
read -r line
"#;
        let bridge = SubprocessBridge::spawn(&shell_bridge(script)).await.unwrap();

        let answers = bridge
            .interpret("www.cnn.com", &json!([]), &["Q".to_string()])
            .await
            .unwrap();
        assert_eq!(answers[0].answer, "A");

        let err = bridge
            .render("landing", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaLensError::TransientProvider(_)));

        bridge.shutdown().await;
        assert!(bridge.call("extract", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn helper_without_ready_message_fails() {
        let err = SubprocessBridge::spawn(&shell_bridge("printf 'hello\\n'"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MediaLensError::FatalProvider(_)));
    }
}
