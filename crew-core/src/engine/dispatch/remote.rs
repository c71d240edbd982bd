//! Out-of-process dispatch: a local HTTP endpoint the coordinator calls

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DispatchMode;
use crate::error::DispatchError;
use crate::parser::StreamChunk;
use crate::runner::WorkerSpec;
use crate::session::TaskId;

use super::super::TaskRun;
use super::{
    DISPATCH_URL_ENV, DispatchBackend, DispatchNotice, DispatchRequest, DispatchResponse,
    Dispatcher, RolePolicy, RunnerDispatcher, TASK_ID_ENV,
};

const BIND_ADDR: &str = "127.0.0.1:0";

/// How long in-flight requests get to finish once the coordinator is gone
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct EndpointState {
    dispatcher: Arc<dyn Dispatcher>,
    task_id: TaskId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

fn create_router(state: EndpointState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dispatch", post(dispatch))
        .with_state(state)
}

async fn health(State(state): State<EndpointState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        task_id: state.task_id.to_string(),
    })
}

async fn dispatch(
    State(state): State<EndpointState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, ApiError> {
    if request.role.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "role must not be empty"));
    }
    if let Some(ref sender) = request.task_id
        && sender != state.task_id.as_str()
    {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("endpoint serves task {}, not {sender}", state.task_id),
        ));
    }
    Ok(Json(state.dispatcher.dispatch(request).await))
}

/// HTTP endpoint serving one coordinator's dispatch calls
pub struct DispatchServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl DispatchServer {
    /// Bind an ephemeral loopback port and start serving
    pub async fn start(
        dispatcher: Arc<dyn Dispatcher>,
        task_id: TaskId,
    ) -> Result<Self, DispatchError> {
        let listener = TcpListener::bind(BIND_ADDR)
            .await
            .map_err(|e| DispatchError::Bind {
                addr: BIND_ADDR.to_string(),
                source: e,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| DispatchError::Serve(e.to_string()))?;

        let router = create_router(EndpointState {
            dispatcher,
            task_id: task_id.clone(),
        });
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(task_id = %task_id, error = %e, "Dispatch endpoint failed");
            }
        });

        info!(%addr, "Dispatch endpoint listening");
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting calls; in-flight calls get a short grace period
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.handle)
            .await
            .is_err()
        {
            self.handle.abort();
        }
    }
}

/// Longest `timeout` the Bash tool accepts, in milliseconds
const BASH_TIMEOUT_MAX_MS: u64 = 600_000;

fn instructions(command: &str, ad_hoc: bool) -> String {
    let mut text = format!(
        "\n\n## Dispatching agents\n\n\
         Delegate work by running `{command} --role <agent> \"<instructions>\"` with the Bash tool. \
         The command waits for the agent to finish and prints its output; a failed dispatch \
         prints the reason, and you decide whether to retry or continue. Independent dispatches \
         may run at the same time.\n\n\
         Agents usually outlast the Bash tool's default timeout. Always pass \
         `timeout: {BASH_TIMEOUT_MAX_MS}`, and for work that may take longer still, run the \
         command with `run_in_background: true` and read its output once it finishes."
    );
    if ad_hoc {
        text.push_str(
            " You may invent a role name. Describe a new role with \
             `--system-prompt \"<prompt>\"`, and optionally `--tools Read,Write` and `--max-turns N`.",
        );
    }
    text
}

/// Backend that serves dispatches over HTTP and runs each as its own worker
pub struct RemoteBackend {
    run: TaskRun,
    policy: RolePolicy,
    server: Option<DispatchServer>,
}

impl RemoteBackend {
    pub fn new(run: TaskRun, policy: RolePolicy) -> Self {
        Self {
            run,
            policy,
            server: None,
        }
    }
}

#[async_trait]
impl DispatchBackend for RemoteBackend {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Remote
    }

    async fn attach(&mut self, spec: &mut WorkerSpec) -> Result<(), DispatchError> {
        let dispatcher = Arc::new(RunnerDispatcher::new(self.run.clone(), self.policy.clone()));
        let server = DispatchServer::start(dispatcher, self.run.task_id().clone()).await?;

        spec.env.insert(DISPATCH_URL_ENV.to_string(), server.url());
        spec.env
            .insert(TASK_ID_ENV.to_string(), self.run.task_id().to_string());

        let command = &self.run.ctx.config.coordinator.dispatch_command;
        spec.allowed_tools.push(format!("Bash({command}:*)"));
        spec.system_prompt.push_str(&instructions(
            command,
            matches!(self.policy, RolePolicy::AdHoc(_)),
        ));

        self.server = Some(server);
        Ok(())
    }

    fn observe(&mut self, _chunk: &StreamChunk) -> Vec<DispatchNotice> {
        // Dispatches are recorded by the dispatcher as calls complete
        Vec::new()
    }

    async fn finish(&mut self) -> Vec<DispatchNotice> {
        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
        Vec::new()
    }
}
