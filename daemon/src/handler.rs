//! Request handler wiring the inventory and the process controller

use crate::collector::LinuxProcessCollector;
use crate::config::RestartConfig;
use crate::error::ControlError;
use crate::executor::ProcessController;
use crate::inventory::{Inventory, ListQuery};
use crate::protocol::{
    HealthResponse, ListResponse, ReniceResponse, RestartResponse, SignalResponse,
};
use crate::server::{ApiReply, ApiRequest, RequestHandler};
use crate::sockets::ProcNetCorrelator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

type Collector = Arc<LinuxProcessCollector>;

pub struct DaemonState {
    inventory: Arc<Inventory<Collector, ProcNetCorrelator>>,
    controller: ProcessController<Collector>,
}

impl DaemonState {
    pub fn new(restart: &RestartConfig) -> Self {
        Self::with_root("/proc", restart)
    }

    pub fn with_root(proc_root: impl Into<PathBuf>, restart: &RestartConfig) -> Self {
        let proc_root = proc_root.into();
        // Inventory and controller share one collector so CPU samples persist
        // across list requests.
        let collector = Arc::new(LinuxProcessCollector::with_root(&proc_root));
        let inventory = Inventory::new(Arc::clone(&collector), ProcNetCorrelator::with_root(&proc_root));
        let controller = ProcessController::new(collector)
            .with_timeouts(restart.terminate_timeout(), restart.poll_interval());
        Self {
            inventory: Arc::new(inventory),
            controller,
        }
    }

    async fn list(&self, query: ListQuery) -> Result<ListResponse, ControlError> {
        let inventory = Arc::clone(&self.inventory);
        // /proc walks are blocking file I/O
        let items = tokio::task::spawn_blocking(move || inventory.list(&query))
            .await
            .map_err(|e| {
                error!("Inventory task failed: {}", e);
                ControlError::Internal("Failed to list processes".to_string())
            })?;
        Ok(ListResponse {
            count: items.len(),
            items,
        })
    }
}

fn reply<T: serde::Serialize>(result: Result<T, ControlError>) -> ApiReply {
    match result {
        Ok(payload) => ApiReply::ok(&payload),
        Err(e) => ApiReply::error(&e),
    }
}

#[async_trait::async_trait]
impl RequestHandler for DaemonState {
    async fn handle(&self, request: ApiRequest) -> ApiReply {
        match request {
            ApiRequest::Health => ApiReply::ok(&HealthResponse {
                status: "ok".to_string(),
                time: chrono::Utc::now().to_rfc3339(),
            }),

            ApiRequest::ListProcesses(params) => {
                let query = ListQuery::new(
                    params.q.as_deref(),
                    params.sort.as_deref(),
                    params.order.as_deref(),
                );
                reply(self.list(query).await)
            }

            ApiRequest::Signal { pid, params } => reply(
                self.controller
                    .dispatch_signal(pid, &params.signal)
                    .map(|signal| SignalResponse {
                        ok: true,
                        pid,
                        signal: signal.name().to_string(),
                    }),
            ),

            ApiRequest::Renice { pid, params } => reply(
                self.controller
                    .set_priority(pid, params.nice)
                    .map(|()| ReniceResponse {
                        ok: true,
                        pid,
                        nice: params.nice,
                    }),
            ),

            ApiRequest::Restart { pid } => reply(self.controller.restart(pid).await.map(|outcome| {
                RestartResponse {
                    ok: true,
                    old_pid: outcome.old_pid,
                    new_pid: outcome.new_pid,
                }
            })),
        }
    }
}
