//! HTTP client for a remote sandbox runner service.
//!
//! Every endpoint answers with an [`Envelope`]; failures reported by the
//! runner come back as `Err` values with the runner's message.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::service::SandboxService;
use crate::types::{
    BootstrapInfo, ClearedErrors, CommandResults, CreateInstanceRequest, DeploymentResult,
    Envelope, FileSet, InstanceDetails, InstanceHealth, InstanceList, InstanceLogs,
    RepositoryExport, RepositoryExportRequest, RepositoryPush, RepositoryPushRequest,
    RuntimeErrors, SandboxFile, ShutdownAck, StaticAnalysis, TemplateDetails, WriteFilesOutcome,
};

/// Request timeout when the caller gives none.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Slack added on top of a command timeout for the HTTP round trip.
const COMMAND_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Sandbox backend talking to a runner service over HTTP.
pub struct RemoteSandboxService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RemoteSandboxService {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> SandboxResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SandboxError::Config("remote sandbox URL is empty".to_string()));
        }
        let client = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        info!("Remote sandbox service at {}", base_url);
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn from_config(config: &SandboxConfig) -> SandboxResult<Self> {
        let url = config.service_url.clone().ok_or_else(|| {
            SandboxError::Config("SANDBOX_SERVICE_URL is required for the remote backend".to_string())
        })?;
        Self::new(url, config.api_key.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of an endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn instance_endpoint(&self, run_id: &str, suffix: &str) -> String {
        if suffix.is_empty() {
            self.endpoint(&format!("instances/{}", run_id))
        } else {
            self.endpoint(&format!("instances/{}/{}", run_id, suffix))
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        run_id: Option<&str>,
    ) -> SandboxResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("Runner responded {} ({} bytes)", status, body.len());
        decode_response(status, &body, run_id)
    }

    async fn get<T: DeserializeOwned>(&self, url: String, run_id: Option<&str>) -> SandboxResult<T> {
        self.send(self.request(Method::GET, url), run_id).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: String,
        body: &B,
        run_id: Option<&str>,
    ) -> SandboxResult<T> {
        self.send(self.request(Method::POST, url).json(body), run_id)
            .await
    }
}

/// Map a runner response to a result.
///
/// Envelopes are trusted whatever the status. A bare 404 on an instance
/// route means the instance is gone.
fn decode_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
    run_id: Option<&str>,
) -> SandboxResult<T> {
    match serde_json::from_str::<Envelope<T>>(body) {
        Ok(envelope) => envelope.into_result(run_id),
        Err(_) if status == StatusCode::NOT_FOUND && run_id.is_some() => {
            Err(SandboxError::not_found(run_id.unwrap_or_default()))
        }
        Err(e) if status.is_success() => Err(SandboxError::Json(e)),
        Err(_) => Err(SandboxError::Remote(format!("HTTP {}: {}", status, body))),
    }
}

/// HTTP timeout for a command batch, or `None` when it does not fit in a `Duration`.
fn batch_timeout(limit: Duration, commands: usize) -> Option<Duration> {
    let count = u32::try_from(commands.max(1)).ok()?;
    limit.checked_mul(count)?.checked_add(COMMAND_TIMEOUT_SLACK)
}

#[async_trait]
impl SandboxService for RemoteSandboxService {
    fn backend_name(&self) -> &'static str {
        "remote"
    }

    async fn get_template_details(&self, template_name: &str) -> SandboxResult<TemplateDetails> {
        self.get(self.endpoint(&format!("templates/{}", template_name)), None)
            .await
    }

    async fn create_instance(&self, request: CreateInstanceRequest) -> SandboxResult<BootstrapInfo> {
        self.post(self.endpoint("instances"), &request, None).await
    }

    async fn list_all_instances(&self) -> SandboxResult<InstanceList> {
        self.get(self.endpoint("instances"), None).await
    }

    async fn get_instance_details(&self, run_id: &str) -> SandboxResult<InstanceDetails> {
        self.get(self.instance_endpoint(run_id, ""), Some(run_id)).await
    }

    async fn get_instance_status(&self, run_id: &str) -> SandboxResult<InstanceHealth> {
        self.get(self.instance_endpoint(run_id, "status"), Some(run_id))
            .await
    }

    async fn shutdown_instance(&self, run_id: &str) -> SandboxResult<ShutdownAck> {
        let builder = self.request(Method::DELETE, self.instance_endpoint(run_id, ""));
        match self.send::<ShutdownAck>(builder, Some(run_id)).await {
            Err(e) if e.is_not_found() => {
                debug!("Remote instance {} already gone", run_id);
                Ok(ShutdownAck {
                    message: "Instance already shut down".to_string(),
                    already_stopped: true,
                })
            }
            other => other,
        }
    }

    async fn write_files(
        &self,
        run_id: &str,
        files: &[SandboxFile],
        commit_message: Option<&str>,
    ) -> SandboxResult<WriteFilesOutcome> {
        let body = json!({ "files": files, "commitMessage": commit_message });
        self.post(self.instance_endpoint(run_id, "files"), &body, Some(run_id))
            .await
    }

    async fn get_files(&self, run_id: &str, paths: Option<&[String]>) -> SandboxResult<FileSet> {
        let mut builder = self.request(Method::GET, self.instance_endpoint(run_id, "files"));
        if let Some(paths) = paths {
            builder = builder.query(&[("paths", paths.join(","))]);
        }
        self.send(builder, Some(run_id)).await
    }

    async fn execute_commands(
        &self,
        run_id: &str,
        commands: &[String],
        timeout: Option<Duration>,
    ) -> SandboxResult<CommandResults> {
        let body = json!({
            "commands": commands,
            "timeout": timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        });
        let mut builder = self
            .request(Method::POST, self.instance_endpoint(run_id, "commands"))
            .json(&body);
        match timeout.map(|limit| batch_timeout(limit, commands.len())) {
            Some(Some(limit)) => builder = builder.timeout(limit),
            Some(None) => debug!("Command timeout too large for a request deadline; using none"),
            None => {}
        }
        self.send(builder, Some(run_id)).await
    }

    async fn get_instance_errors(&self, run_id: &str) -> SandboxResult<RuntimeErrors> {
        self.get(self.instance_endpoint(run_id, "errors"), Some(run_id))
            .await
    }

    async fn clear_instance_errors(&self, run_id: &str) -> SandboxResult<ClearedErrors> {
        let builder = self.request(Method::DELETE, self.instance_endpoint(run_id, "errors"));
        self.send(builder, Some(run_id)).await
    }

    async fn run_static_analysis(
        &self,
        run_id: &str,
        files: Option<&[String]>,
    ) -> SandboxResult<StaticAnalysis> {
        let body = json!({ "files": files });
        self.post(self.instance_endpoint(run_id, "analysis"), &body, Some(run_id))
            .await
    }

    async fn deploy(&self, run_id: &str) -> SandboxResult<DeploymentResult> {
        let result = self
            .post(self.instance_endpoint(run_id, "deploy"), &json!({}), Some(run_id))
            .await;
        if let Err(e) = &result {
            warn!("Remote deploy of {} failed: {}", run_id, e);
        }
        result
    }

    async fn export_to_repository(
        &self,
        run_id: &str,
        request: &RepositoryExportRequest,
    ) -> SandboxResult<RepositoryExport> {
        self.post(self.instance_endpoint(run_id, "github/export"), request, Some(run_id))
            .await
    }

    async fn push_to_repository(
        &self,
        run_id: &str,
        request: &RepositoryPushRequest,
    ) -> SandboxResult<RepositoryPush> {
        self.post(self.instance_endpoint(run_id, "github/push"), request, Some(run_id))
            .await
    }

    async fn get_logs(&self, run_id: &str) -> SandboxResult<InstanceLogs> {
        self.get(self.instance_endpoint(run_id, "logs"), Some(run_id))
            .await
    }
}
