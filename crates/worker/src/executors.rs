use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobrunner_core::{SchedulerError, SchedulerResult};
use jobrunner_domain::{
    ParameterValues, RunnableUnit, StatusUpdate, TaskFault, UnitContext, UnitDescriptor,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Shell任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// 超时后终止进程并标记失败
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// 计时演示任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTaskParams {
    pub duration_ms: u64,
    #[serde(default = "default_steps")]
    pub steps: u32,
    /// 在该步上报一条告警，任务最终以 WARNING 结束
    #[serde(default)]
    pub warn_at_step: Option<u32>,
}

fn default_steps() -> u32 {
    10
}

/// 把已绑定的参数反序列化为强类型参数
pub(crate) fn parse_params<T: DeserializeOwned>(
    descriptor: &UnitDescriptor,
    parameters: ParameterValues,
) -> SchedulerResult<T> {
    serde_json::from_value(serde_json::Value::Object(parameters)).map_err(|e| {
        SchedulerError::invalid_params(format!("解析{}任务参数失败: {e}", descriptor.code))
    })
}

/// 在子进程中执行命令的单元
///
/// 收到中断请求时直接杀掉子进程。
pub struct ShellUnit {
    descriptor: UnitDescriptor,
    params: ShellTaskParams,
}

enum ShellExit {
    Finished(Vec<String>, Vec<String>, ExitStatus),
    Lost(String),
    Interrupted,
    TimedOut,
}

impl ShellUnit {
    pub fn new(descriptor: UnitDescriptor, params: ShellTaskParams) -> Self {
        Self { descriptor, params }
    }

    pub fn params(&self) -> &ShellTaskParams {
        &self.params
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.params.command);
        cmd.args(&self.params.args)
            .envs(&self.params.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.params.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn execute(&self, ctx: &UnitContext) -> SchedulerResult<()> {
        let command_line = std::iter::once(self.params.command.as_str())
            .chain(self.params.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let mut child = match self.command().spawn() {
            Ok(child) => child,
            Err(e) => return Err(fail(ctx, "启动Shell命令失败", e.to_string()).await),
        };
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(fail(ctx, "无法获取Shell命令输出", command_line).await);
        };

        info!("执行Shell任务: run_id={}, command={}", ctx.run_id(), command_line);
        ctx.started(StatusUpdate::new().with_progress(0.0).with_message(command_line.clone()))
            .await;

        let start_time = Instant::now();
        let timeout = self.params.timeout_seconds.map(Duration::from_secs);
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let exit = {
            let collect = async {
                let (stdout_lines, stderr_lines) = tokio::join!(read_lines(stdout), read_lines(stderr));
                let status = child.wait().await;
                (stdout_lines, stderr_lines, status)
            };
            tokio::select! {
                (stdout_lines, stderr_lines, status) = collect => match status {
                    Ok(status) => ShellExit::Finished(stdout_lines, stderr_lines, status),
                    Err(e) => ShellExit::Lost(e.to_string()),
                },
                _ = ctx.interrupted() => ShellExit::Interrupted,
                _ = deadline => ShellExit::TimedOut,
            }
        };

        match exit {
            ShellExit::Finished(stdout_lines, stderr_lines, status) => {
                info!(
                    "Shell任务执行完成: run_id={}, success={}, exit_code={:?}, duration={}ms",
                    ctx.run_id(),
                    status.success(),
                    status.code(),
                    start_time.elapsed().as_millis()
                );
                if status.success() {
                    let mut update = StatusUpdate::new().with_progress(100.0);
                    if !stdout_lines.is_empty() {
                        update = update.with_output(stdout_lines.join("\n"));
                    }
                    ctx.completed(update).await;
                    Ok(())
                } else {
                    let description = format!("命令执行失败，退出码: {:?}", status.code());
                    Err(fail(ctx, &description, stderr_lines.join("\n")).await)
                }
            }
            ShellExit::Lost(cause) => Err(fail(ctx, "等待进程结束失败", cause).await),
            ShellExit::Interrupted => {
                if let Err(e) = child.kill().await {
                    warn!("终止Shell进程失败: run_id={}, error={}", ctx.run_id(), e);
                }
                info!("Shell任务已中断: run_id={}", ctx.run_id());
                Err(SchedulerError::Interrupted(ctx.run_id().to_string()))
            }
            ShellExit::TimedOut => {
                if let Err(e) = child.kill().await {
                    warn!("终止超时Shell进程失败: run_id={}, error={}", ctx.run_id(), e);
                }
                let description =
                    format!("命令执行超时: {}s", self.params.timeout_seconds.unwrap_or_default());
                Err(fail(ctx, &description, command_line).await)
            }
        }
    }
}

#[async_trait]
impl RunnableUnit for ShellUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn supports_interrupt(&self) -> bool {
        true
    }

    async fn run(&self, ctx: UnitContext) -> SchedulerResult<()> {
        self.execute(&ctx).await
    }
}

/// 上报失败回调并返回对应的执行错误
async fn fail(ctx: &UnitContext, description: &str, cause: String) -> SchedulerError {
    ctx.failed(TaskFault::new(description, cause)).await;
    SchedulerError::TaskExecution(description.to_string())
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R) -> Vec<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        collected.push(line);
    }
    collected
}

/// 按固定步数推进进度的计时单元，可中断
pub struct SleepUnit {
    descriptor: UnitDescriptor,
    params: SleepTaskParams,
}

impl SleepUnit {
    pub fn new(descriptor: UnitDescriptor, params: SleepTaskParams) -> Self {
        Self { descriptor, params }
    }
}

#[async_trait]
impl RunnableUnit for SleepUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn supports_interrupt(&self) -> bool {
        true
    }

    async fn run(&self, ctx: UnitContext) -> SchedulerResult<()> {
        let steps = self.params.steps.max(1);
        let step_duration = Duration::from_millis(self.params.duration_ms / u64::from(steps));

        ctx.started(StatusUpdate::new().with_progress(0.0)).await;

        for step in 1..=steps {
            tokio::select! {
                _ = ctx.interrupted() => {
                    info!("计时任务在第{}步被中断: run_id={}", step, ctx.run_id());
                    return Err(SchedulerError::Interrupted(ctx.run_id().to_string()));
                }
                _ = tokio::time::sleep(step_duration) => {}
            }

            let mut update = StatusUpdate::new()
                .with_progress(f64::from(step) * 100.0 / f64::from(steps))
                .with_message(format!("步骤 {step}/{steps}"));
            if self.params.warn_at_step == Some(step) {
                update = update.with_warning(TaskFault::new(
                    format!("步骤 {step}"),
                    "计划内的演示告警",
                ));
            }
            ctx.progressing(update).await;
        }

        ctx.completed(StatusUpdate::new().with_progress(100.0)).await;
        Ok(())
    }
}
