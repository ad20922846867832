//! 远程执行端点客户端
//!
//! 端点协议（JSON over HTTP）：
//! - `GET  {endpoint}/capabilities` 能力协商，返回 `{"version": .., "processes": [..]}`
//! - `GET  {endpoint}/processes/{code}` 单元描述，404 表示不存在
//! - `POST {endpoint}/processes/{code}/execution` 提交 `{"inputs": {..}}`，返回状态文档
//! - `GET/DELETE {location}` 轮询或撤销异步执行

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobrunner_core::{RemoteConfig, SchedulerError, SchedulerResult};
use jobrunner_domain::{
    ParameterSpec, ParameterValues, RunnableUnit, StatusUpdate, TaskFault, UnitContext,
    UnitDescriptor, UnitFactory, UnitRegistry,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

/// 能力协商结果
#[derive(Debug, Clone, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub version: Option<String>,
    /// 为空表示端点不公布单元列表
    #[serde(default)]
    pub processes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProcessDescription {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    inputs: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Accepted,
    Running,
    #[serde(alias = "successful")]
    Succeeded,
    Failed,
    Dismissed,
}

impl RemoteStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Succeeded | RemoteStatus::Failed | RemoteStatus::Dismissed
        )
    }
}

/// 远程执行状态文档
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
    /// 异步执行时的状态查询地址
    #[serde(default)]
    pub location: Option<String>,
}

impl StatusDocument {
    fn to_update(&self) -> StatusUpdate {
        let mut update = StatusUpdate::new();
        update.progress = self.progress;
        update.message = self.message.clone();
        update.output = self.output.as_ref().map(|output| match output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });
        update
    }

    fn to_fault(&self, code: &str) -> TaskFault {
        TaskFault::new(
            format!("远程执行单元 {code}"),
            self.message.clone().unwrap_or_default(),
        )
    }
}

#[derive(Clone)]
struct EndpointClient {
    client: Client,
    poll_interval: Duration,
}

impl EndpointClient {
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> SchedulerResult<Option<T>> {
        let response = self.client.get(url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(url, response).await.map(Some)
    }
}

/// 远程执行单元注册表
///
/// authority 为 `http(s)://` 开头的端点地址，describe 时先协商能力再查询单元描述。
#[derive(Clone)]
pub struct RemoteUnitRegistry {
    endpoint: EndpointClient,
}

impl RemoteUnitRegistry {
    pub fn new(config: &RemoteConfig) -> SchedulerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            endpoint: EndpointClient {
                client,
                poll_interval: Duration::from_millis(config.poll_interval_ms),
            },
        })
    }

    /// `GET {endpoint}/capabilities`
    pub async fn negotiate(&self, authority: &str) -> SchedulerResult<Capabilities> {
        let base = parse_endpoint(authority)?;
        let url = join(&base, &["capabilities"])?;
        let response = self.endpoint.client.get(url.clone()).send().await?;
        let capabilities: Capabilities = read_json(url, response).await?;
        debug!(
            "远程端点能力协商完成: {} (version={:?}, processes={})",
            authority,
            capabilities.version,
            capabilities.processes.len()
        );
        Ok(capabilities)
    }
}

#[async_trait]
impl UnitRegistry for RemoteUnitRegistry {
    async fn describe(
        &self,
        authority: &str,
        code: &str,
    ) -> SchedulerResult<Option<Arc<dyn UnitFactory>>> {
        let base = parse_endpoint(authority)?;
        let capabilities = self.negotiate(authority).await?;
        if !capabilities.processes.is_empty() && !capabilities.processes.iter().any(|p| p == code) {
            debug!("远程端点 {} 未公布执行单元 {}", authority, code);
            return Ok(None);
        }

        let url = join(&base, &["processes", code])?;
        let Some(description) = self.endpoint.get_json::<ProcessDescription>(url).await? else {
            return Ok(None);
        };

        let mut descriptor = UnitDescriptor::new(authority, code);
        if let Some(title) = description.title {
            descriptor = descriptor.with_title(title);
        }
        descriptor.inputs = description.inputs;

        let execution_url = join(&base, &["processes", code, "execution"])?;
        Ok(Some(Arc::new(RemoteUnitFactory {
            endpoint: self.endpoint.clone(),
            descriptor,
            execution_url,
        })))
    }
}

struct RemoteUnitFactory {
    endpoint: EndpointClient,
    descriptor: UnitDescriptor,
    execution_url: Url,
}

#[async_trait]
impl UnitFactory for RemoteUnitFactory {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    async fn create(&self, parameters: ParameterValues) -> SchedulerResult<Arc<dyn RunnableUnit>> {
        Ok(Arc::new(RemoteUnit {
            endpoint: self.endpoint.clone(),
            descriptor: self.descriptor.clone(),
            execution_url: self.execution_url.clone(),
            parameters,
        }))
    }
}

/// 在远程端点上执行的单元，把状态文档翻译成生命周期回调
pub struct RemoteUnit {
    endpoint: EndpointClient,
    descriptor: UnitDescriptor,
    execution_url: Url,
    parameters: ParameterValues,
}

impl RemoteUnit {
    /// 提交执行并轮询到结束，返回最终的状态文档
    async fn drive(&self, ctx: &UnitContext) -> SchedulerResult<StatusDocument> {
        let response = self
            .endpoint
            .client
            .post(self.execution_url.clone())
            .json(&json!({ "inputs": self.parameters }))
            .send()
            .await?;
        let mut document: StatusDocument = read_json(self.execution_url.clone(), response).await?;
        ctx.started(document.to_update()).await;

        while !document.status.is_finished() {
            let Some(location) = document.location.as_deref() else {
                return Err(SchedulerError::Protocol(format!(
                    "异步执行的状态文档缺少location: {}",
                    self.execution_url
                )));
            };
            let location = self.execution_url.join(location).map_err(|e| {
                SchedulerError::Protocol(format!("无效的状态地址 {location}: {e}"))
            })?;

            tokio::select! {
                _ = ctx.interrupted() => {
                    self.dismiss(location).await;
                    return Err(SchedulerError::Interrupted(ctx.run_id().to_string()));
                }
                _ = tokio::time::sleep(self.endpoint.poll_interval) => {}
            }

            document = self
                .endpoint
                .get_json(location.clone())
                .await?
                .ok_or_else(|| SchedulerError::Protocol(format!("状态地址已失效: {location}")))?;
            if !document.status.is_finished() {
                ctx.progressing(document.to_update()).await;
            }
        }

        Ok(document)
    }

    /// 尽力撤销远程执行，失败只记录日志
    async fn dismiss(&self, location: Url) {
        match self.endpoint.client.delete(location.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                info!("已撤销远程执行: {}", location);
            }
            Ok(response) => warn!("撤销远程执行失败: {} HTTP {}", location, response.status()),
            Err(e) => warn!("撤销远程执行失败: {} {}", location, e),
        }
    }
}

#[async_trait]
impl RunnableUnit for RemoteUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn supports_interrupt(&self) -> bool {
        true
    }

    async fn run(&self, ctx: UnitContext) -> SchedulerResult<()> {
        let code = &self.descriptor.code;
        match self.drive(&ctx).await {
            Ok(document) => match document.status {
                RemoteStatus::Succeeded => {
                    let mut update = document.to_update();
                    update.progress = update.progress.or(Some(100.0));
                    ctx.completed(update).await;
                    Ok(())
                }
                RemoteStatus::Dismissed => {
                    ctx.dismissed(document.to_fault(code)).await;
                    Err(SchedulerError::Interrupted(ctx.run_id().to_string()))
                }
                _ => {
                    let fault = document.to_fault(code);
                    ctx.failed(fault.clone()).await;
                    Err(SchedulerError::TaskExecution(fault.to_message()))
                }
            },
            Err(SchedulerError::Interrupted(run_id)) => Err(SchedulerError::Interrupted(run_id)),
            Err(e) => {
                ctx.failed(TaskFault::new(format!("调用远程执行单元 {code} 失败"), e.to_string()))
                    .await;
                Err(e)
            }
        }
    }
}

fn parse_endpoint(authority: &str) -> SchedulerResult<Url> {
    let url = Url::parse(authority)
        .map_err(|e| SchedulerError::Unreachable(format!("无效的远程端点地址 {authority}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SchedulerError::Unreachable(format!(
            "不支持的远程端点地址: {authority}"
        )));
    }
    Ok(url)
}

fn join(base: &Url, segments: &[&str]) -> SchedulerResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SchedulerError::Unreachable(format!("无效的远程端点地址: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn read_json<T: DeserializeOwned>(url: Url, response: Response) -> SchedulerResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(SchedulerError::Unreachable(format!("{url} 返回 HTTP {status}")));
    }
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| SchedulerError::Protocol(format!("{url} 返回的文档无法解析: {e}")))
}
