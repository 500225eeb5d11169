//! 状态监控器
//!
//! 每个在途部署一个轮询任务；进度事件经 async_channel 发送给唯一的渲染消费者。
//! 取消通过 CancellationToken 传递，每个周期检查一次。取消只停止本地轮询，
//! 不会向 provider 发送取消请求，远端部署可能继续运行或自行回滚。

use armtest_common::{DeploymentState, ErrorClass, FailureReason};
use armtest_provider::{DeploymentClient, DeploymentHandle, ProvisioningState, StatusReport};
use armtest_storage::{DeploymentRecord, ErrorRecord, Storage};
use async_channel::{Receiver, Sender};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::ErrorClassifier;
use crate::orchestrator::{fetch_failed_operations, handle_of};
use crate::settings::Settings;
use crate::{ExecutorError, Result};

/// 进度事件
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub deployment_id: String,
    pub state: DeploymentState,
    /// 当前阶段（provider 状态或本地结论）
    pub phase: String,
    pub elapsed: Duration,
}

/// 进度渲染器（单一消费者）
pub trait ProgressRenderer: Send {
    fn render(&mut self, event: &ProgressEvent);

    /// 所有监控任务结束后调用
    fn finish(&mut self) {}
}

/// 收集所有事件的渲染器
#[derive(Debug, Clone, Default)]
pub struct CollectingRenderer {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl CollectingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 某个部署的阶段序列
    pub fn phases(&self, deployment_id: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.deployment_id == deployment_id)
            .map(|e| e.phase)
            .collect()
    }
}

impl ProgressRenderer for CollectingRenderer {
    fn render(&mut self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// 单个监控任务的句柄
pub struct MonitorHandle {
    pub deployment_id: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<DeploymentRecord>>,
}

impl MonitorHandle {
    /// 停止轮询，记录转入 Failed{Cancelled}
    pub fn cancel(&self) {
        info!("请求取消监控: {}", self.deployment_id);
        self.cancel.cancel();
    }

    /// 等待任务结束，返回最终记录
    pub async fn wait(self) -> Result<DeploymentRecord> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(ExecutorError::Unknown {
                raw: format!("监控任务异常退出 {}: {}", self.deployment_id, e),
            }),
        }
    }
}

/// 状态监控器
pub struct Monitor {
    client: Arc<dyn DeploymentClient>,
    storage: Arc<Storage>,
    settings: Arc<Settings>,
    event_tx: Sender<ProgressEvent>,
    event_rx: Receiver<ProgressEvent>,
}

impl Monitor {
    pub fn new(
        client: Arc<dyn DeploymentClient>,
        storage: Arc<Storage>,
        settings: Arc<Settings>,
    ) -> Self {
        let (event_tx, event_rx) = async_channel::unbounded();
        Self {
            client,
            storage,
            settings,
            event_tx,
            event_rx,
        }
    }

    /// 启动渲染消费者；所有发送端（监控器本身及其任务）释放后结束并交还渲染器
    pub fn spawn_renderer<R>(&self, mut renderer: R) -> JoinHandle<R>
    where
        R: ProgressRenderer + 'static,
    {
        let event_rx = self.event_rx.clone();
        tokio::spawn(async move {
            while let Ok(event) = event_rx.recv().await {
                renderer.render(&event);
            }
            renderer.finish();
            renderer
        })
    }

    /// 为处于 Polling 的记录启动轮询任务
    pub fn spawn(&self, record: &DeploymentRecord, cancel: CancellationToken) -> MonitorHandle {
        let task = PollTask {
            deployment_id: record.deployment_id.clone(),
            handle: handle_of(record),
            client: self.client.clone(),
            storage: self.storage.clone(),
            poll_interval: self.settings.deployment.poll_interval,
            timeout: self.settings.deployment.timeout,
            call_timeout: self.settings.deployment.call_timeout,
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
            classifier: ErrorClassifier::new(),
            started: Instant::now(),
        };

        debug!("启动监控任务: {}", record.deployment_id);
        MonitorHandle {
            deployment_id: record.deployment_id.clone(),
            cancel,
            join: tokio::spawn(task.run()),
        }
    }
}

struct PollTask {
    deployment_id: String,
    handle: DeploymentHandle,
    client: Arc<dyn DeploymentClient>,
    storage: Arc<Storage>,
    poll_interval: Duration,
    timeout: Duration,
    call_timeout: Duration,
    event_tx: Sender<ProgressEvent>,
    cancel: CancellationToken,
    classifier: ErrorClassifier,
    started: Instant,
}

impl PollTask {
    async fn run(self) -> Result<DeploymentRecord> {
        info!("开始监控部署: {} ({})", self.deployment_id, self.handle);
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return self.finish_cancelled().await,
                _ = interval.tick() => {}
            }

            if self.started.elapsed() >= self.timeout {
                return self.finish_timeout().await;
            }

            let status = tokio::select! {
                _ = self.cancel.cancelled() => return self.finish_cancelled().await,
                status = self.client.get_status(&self.handle, self.call_timeout) => status,
            };

            let report = match status {
                Ok(report) => report,
                Err(e) => {
                    // 单次查询失败不终止轮询，直到总超时
                    warn!("查询部署状态失败 {}: {}", self.deployment_id, e);
                    self.emit(DeploymentState::Polling, "status-unavailable").await;
                    continue;
                }
            };

            let record = self
                .storage
                .deployments()
                .update(&self.deployment_id, |record| {
                    record.last_polled_at = Some(Utc::now());
                    Ok(record.clone())
                })
                .await?;
            if record.state.is_terminal() {
                debug!("记录已是终态，停止监控: {}", self.deployment_id);
                return Ok(record);
            }

            match report.state {
                ProvisioningState::Succeeded => return self.finish_succeeded().await,
                ProvisioningState::Failed | ProvisioningState::Canceled => {
                    return self.finish_failed(report).await;
                }
                ProvisioningState::NotFound => {
                    warn!("部署暂不可见，继续轮询: {}", self.deployment_id);
                    self.emit(DeploymentState::Polling, "NotFound").await;
                }
                other => {
                    debug!("部署 {} 状态: {}", self.deployment_id, other);
                    self.emit(DeploymentState::Polling, &other.to_string()).await;
                }
            }
        }
    }

    async fn emit(&self, state: DeploymentState, phase: &str) {
        let event = ProgressEvent {
            deployment_id: self.deployment_id.clone(),
            state,
            phase: phase.to_string(),
            elapsed: self.started.elapsed(),
        };
        if self.event_tx.send(event).await.is_err() {
            debug!("进度通道已关闭: {}", self.deployment_id);
        }
    }

    async fn finish_succeeded(&self) -> Result<DeploymentRecord> {
        let record = self
            .storage
            .deployments()
            .transition(&self.deployment_id, DeploymentState::Succeeded)
            .await?;
        info!("部署成功: {} (耗时 {:?})", self.deployment_id, self.started.elapsed());
        self.emit(DeploymentState::Succeeded, "Succeeded").await;
        Ok(record)
    }

    async fn finish_failed(&self, report: StatusReport) -> Result<DeploymentRecord> {
        let operations = fetch_failed_operations(self.client.as_ref(), &self.handle, self.call_timeout).await;

        let class = match self.classifier.summarize_operations(&operations) {
            Some(summary) => summary,
            None => match self.classifier.classify(&report.raw_diagnostics) {
                class @ (ErrorClass::AuthorizationDenied { .. }
                | ErrorClass::TemplateInvalid { .. }
                | ErrorClass::RemoteFailure { .. }) => class,
                _ => ErrorClass::RemoteFailure {
                    reason: format!("provisioningState={}", report.state),
                },
            },
        };
        let reason = class.to_failure_reason();

        let record = self
            .storage
            .deployments()
            .update(&self.deployment_id, |record| {
                let mut error = ErrorRecord::new(class, report.raw_diagnostics);
                error.failed_operations = operations.iter().map(|op| op.to_string()).collect();
                record.error = Some(error);
                record.fail(reason)?;
                Ok(record.clone())
            })
            .await?;

        warn!(
            "部署失败: {} ({})",
            self.deployment_id,
            record.failure.as_ref().map(|f| f.to_string()).unwrap_or_default()
        );
        self.emit(DeploymentState::Failed, "Failed").await;
        Ok(record)
    }

    async fn finish_timeout(&self) -> Result<DeploymentRecord> {
        warn!("部署轮询超时: {} (上限 {:?})", self.deployment_id, self.timeout);
        let record = self.fail_locally(FailureReason::Timeout).await?;
        self.emit(DeploymentState::Failed, "Timeout").await;
        Ok(record)
    }

    async fn finish_cancelled(&self) -> Result<DeploymentRecord> {
        warn!(
            "已取消监控: {}，远端部署 {} 可能仍在进行",
            self.deployment_id, self.handle
        );
        let record = self.fail_locally(FailureReason::Cancelled).await?;
        self.emit(DeploymentState::Failed, "Cancelled").await;
        Ok(record)
    }

    async fn fail_locally(&self, reason: FailureReason) -> Result<DeploymentRecord> {
        self.storage
            .deployments()
            .update(&self.deployment_id, |record| {
                record.fail(reason)?;
                Ok(record.clone())
            })
            .await
            .map_err(ExecutorError::from)
    }
}
