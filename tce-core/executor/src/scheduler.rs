//! 调度器
//!
//! 每个运行对应一个 Actor 任务，命令逐条处理，因此同一运行的两次 tick
//! 不会重叠。tick 在阻塞线程池中执行，步骤体阻塞不会拖住异步运行时。

use async_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tce_common::{CaseInfo, StepResult};

use crate::config::SchedulerConfig;
use crate::definition::{DefinitionSource, LoadError};
use crate::report::RunReport;
use crate::runner::{CaseRunner, RunOutcome, RunState, TickReport};
use crate::{ExecutorError, Result};

/// 每个订阅者可缓存的事件数，落后超过该数量的订阅者会丢失最早的事件
const EVENT_CAPACITY: usize = 1024;

/// 运行 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 运行句柄
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub id: RunId,

    /// 用例信息 (与运行器共享)
    pub info: Arc<CaseInfo>,

    /// 用例来源标签
    pub label: String,
}

/// 运行事件 (用于进度展示)
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// 运行已创建
    Started {
        id: RunId,
        case_name: String,
        steps: usize,
    },

    /// 步骤产生了新结果
    StepUpdated {
        id: RunId,
        step: usize,
        result: StepResult,
        run_state: RunState,
    },

    /// 运行结束
    Finished { id: RunId, outcome: RunOutcome },
}

/// 发送给运行 Actor 的命令
enum RunCommand {
    Tick { reply: oneshot::Sender<TickReport> },
    Cancel { reply: oneshot::Sender<TickReport> },
    Report { reply: oneshot::Sender<RunReport> },
}

/// 运行 Actor - 独占一个运行器
struct RunActor {
    id: RunId,
    runner: Option<CaseRunner>,
    command_rx: Receiver<RunCommand>,
    event_tx: broadcast::Sender<RunEvent>,
}

impl RunActor {
    async fn run(mut self) {
        debug!("运行 Actor 启动: {}", self.id);

        while let Ok(command) = self.command_rx.recv().await {
            if !self.handle_command(command).await {
                break;
            }
        }

        debug!("运行 Actor 退出: {}", self.id);
    }

    /// 处理命令，返回 false 表示运行器已丢失
    async fn handle_command(&mut self, command: RunCommand) -> bool {
        match command {
            RunCommand::Tick { reply } => {
                let Some(report) = self.on_blocking(CaseRunner::tick).await else {
                    return false;
                };
                let _ = reply.send(report);
            }
            RunCommand::Cancel { reply } => {
                let Some(report) = self.on_blocking(CaseRunner::cancel).await else {
                    return false;
                };
                let _ = reply.send(report);
            }
            RunCommand::Report { reply } => {
                let Some(runner) = self.runner.as_ref() else {
                    return false;
                };
                let _ = reply.send(runner.report());
            }
        }

        true
    }

    /// 在阻塞线程池中对运行器执行操作，并发布由此产生的事件
    async fn on_blocking(&mut self, op: fn(&mut CaseRunner) -> TickReport) -> Option<TickReport> {
        let mut runner = self.runner.take()?;
        let step = runner.current_step();
        let attempts = step_attempts(&runner, step);
        let was_done = runner.is_done();

        let joined = tokio::task::spawn_blocking(move || {
            let report = op(&mut runner);
            (runner, report)
        })
        .await;

        let (runner, report) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("运行 {} 的 tick 任务异常: {}", self.id, e);
                return None;
            }
        };

        // 只有步骤被实际调用时才发布步骤事件 (before 钩子失败时步骤未运行)
        if step_attempts(&runner, step) != attempts {
            if let Some(result) = report.last_result.clone() {
                self.publish(RunEvent::StepUpdated {
                    id: self.id,
                    step,
                    result,
                    run_state: report.run_state,
                });
            }
        }

        if !was_done {
            if let Some(outcome) = report.outcome {
                self.publish(RunEvent::Finished {
                    id: self.id,
                    outcome,
                });
            }
        }

        self.runner = Some(runner);
        Some(report)
    }

    fn publish(&self, event: RunEvent) {
        // 没有订阅者时发送失败，事件丢弃
        let _ = self.event_tx.send(event);
    }
}

fn step_attempts(runner: &CaseRunner, step: usize) -> u64 {
    step.checked_sub(1)
        .and_then(|index| runner.records().get(index))
        .map(|record| record.attempts)
        .unwrap_or(0)
}

/// 运行槽位
struct RunSlot {
    handle: RunHandle,
    command_tx: Sender<RunCommand>,
    task: JoinHandle<()>,
}

/// 调度器 - 管理所有活动运行
pub struct Scheduler {
    config: SchedulerConfig,
    runs: RwLock<HashMap<RunId, RunSlot>>,
    event_tx: broadcast::Sender<RunEvent>,
}

impl Scheduler {
    /// 创建新的调度器
    pub fn new(config: SchedulerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            runs: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 订阅运行事件
    ///
    /// 每个订阅者独立接收订阅之后发布的全部事件。没有订阅者时事件直接丢弃。
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_tx.subscribe()
    }

    /// 创建新运行
    ///
    /// 每次调用都会从来源创建全新的用例定义实例。加载失败时不会创建运行器。
    pub async fn start_run(
        &self,
        source: &dyn DefinitionSource,
    ) -> std::result::Result<RunHandle, LoadError> {
        let label = source.label();
        debug!("加载用例: {}", label);

        let definition = source.instantiate()?;
        let runner = CaseRunner::new(definition)?;

        let id = RunId::new();
        let info = runner.info();
        let handle = RunHandle {
            id,
            info: Arc::clone(&info),
            label,
        };

        let (command_tx, command_rx) = async_channel::unbounded();
        let actor = RunActor {
            id,
            runner: Some(runner),
            command_rx,
            event_tx: self.event_tx.clone(),
        };
        actor.publish(RunEvent::Started {
            id,
            case_name: info.name.clone(),
            steps: info.step_count(),
        });

        let task = tokio::spawn(actor.run());

        info!("创建运行 {}: {} ({})", id, info.name, handle.label);
        self.runs.write().await.insert(
            id,
            RunSlot {
                handle: handle.clone(),
                command_tx,
                task,
            },
        );

        Ok(handle)
    }

    /// 推进运行一次
    pub async fn tick(&self, handle: &RunHandle) -> Result<TickReport> {
        let (reply, rx) = oneshot::channel();
        self.send(handle.id, RunCommand::Tick { reply }).await?;
        rx.await.map_err(|_| ExecutorError::RunClosed(handle.id))
    }

    /// 取消运行
    ///
    /// 排在正在执行的 tick 之后生效。
    pub async fn cancel(&self, handle: &RunHandle) -> Result<TickReport> {
        let (reply, rx) = oneshot::channel();
        self.send(handle.id, RunCommand::Cancel { reply }).await?;
        rx.await.map_err(|_| ExecutorError::RunClosed(handle.id))
    }

    /// 获取运行报告
    pub async fn report(&self, handle: &RunHandle) -> Result<RunReport> {
        let (reply, rx) = oneshot::channel();
        self.send(handle.id, RunCommand::Report { reply }).await?;
        rx.await.map_err(|_| ExecutorError::RunClosed(handle.id))
    }

    /// 持续推进运行直到结束
    ///
    /// WAITING 的运行在轮询间隔后再次 tick；RUNNING 的运行在 eager 模式下立即 tick。
    pub async fn drive(&self, handle: &RunHandle) -> Result<RunReport> {
        let poll_interval = self.config.poll_interval();

        loop {
            let report = self.tick(handle).await?;

            match report.run_state {
                RunState::Done => break,
                RunState::Waiting => tokio::time::sleep(poll_interval).await,
                RunState::Running if self.config.eager => tokio::task::yield_now().await,
                RunState::Running | RunState::NotStarted => {
                    tokio::time::sleep(poll_interval).await
                }
            }
        }

        self.report(handle).await
    }

    /// 运行一个用例直到结束并释放
    pub async fn run(&self, source: &dyn DefinitionSource) -> Result<RunReport> {
        let handle = self.start_run(source).await?;
        let result = self.drive(&handle).await;

        if let Err(e) = self.release(&handle).await {
            debug!("释放运行 {} 失败: {}", handle.id, e);
        }

        result
    }

    /// 并发运行多个用例
    ///
    /// 结果顺序与输入一致，单个用例失败不影响其他用例。
    pub async fn run_all(
        self: &Arc<Self>,
        sources: Vec<Arc<dyn DefinitionSource>>,
    ) -> Vec<Result<RunReport>> {
        info!("并发运行 {} 个用例", sources.len());

        let mut set = JoinSet::new();
        for (index, source) in sources.into_iter().enumerate() {
            let scheduler = Arc::clone(self);
            set.spawn(async move { (index, scheduler.run(source.as_ref()).await) });
        }

        let mut results: Vec<Option<Result<RunReport>>> = Vec::new();
        results.resize_with(set.len(), || None);

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Err(e) = &result {
                        warn!("用例运行失败: {}", e);
                    }
                    results[index] = Some(result);
                }
                Err(e) => error!("用例运行任务异常: {}", e),
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(ExecutorError::TaskFailed("任务被中止".to_string()))))
            .collect()
    }

    /// 释放运行
    ///
    /// 尚未结束的运行会先被取消，返回最终报告。
    pub async fn release(&self, handle: &RunHandle) -> Result<RunReport> {
        self.cancel(handle).await?;
        let report = self.report(handle).await?;

        if let Some(slot) = self.runs.write().await.remove(&handle.id) {
            slot.command_tx.close();
            if let Err(e) = slot.task.await {
                warn!("运行 Actor 退出异常: {}", e);
            }
        }

        debug!("已释放运行 {}", handle.id);
        Ok(report)
    }

    /// 当前活动运行
    pub async fn active_runs(&self) -> Vec<RunHandle> {
        self.runs
            .read()
            .await
            .values()
            .map(|slot| slot.handle.clone())
            .collect()
    }

    /// 取消并释放所有运行
    pub async fn shutdown(&self) {
        let handles = self.active_runs().await;
        info!("关闭调度器，释放 {} 个运行", handles.len());

        for handle in handles {
            if let Err(e) = self.release(&handle).await {
                warn!("释放运行 {} 失败: {}", handle.id, e);
            }
        }
    }

    async fn send(&self, id: RunId, command: RunCommand) -> Result<()> {
        let command_tx = self
            .runs
            .read()
            .await
            .get(&id)
            .map(|slot| slot.command_tx.clone())
            .ok_or(ExecutorError::RunNotFound(id))?;

        command_tx
            .send(command)
            .await
            .map_err(|_| ExecutorError::RunClosed(id))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
