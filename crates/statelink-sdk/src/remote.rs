//! 远端同步客户端
//!
//! 每次调用对应一次 HTTP 请求，不做自动重试，失败原样返回给调用方决定如何降级。
//!
//! 状态码约定：
//! - 2xx：成功
//! - 429：限流，按采样频率记日志，视为瞬时故障
//! - 其他：应用层失败，响应体（如果有）作为诊断信息返回

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, HttpClientConfig};
use crate::error::{Result, StateLinkError};
use crate::snapshot::{ActorId, ActorProfile, StateSnapshot};
use crate::utils::Clock;

/// 诊断信息中响应体的最大长度
const MAX_BODY_PREVIEW: usize = 200;

/// 远端记录（GET /player/{uuid} 的 data 字段）
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub user_id: String,
    pub username: Option<String>,
    /// 其余字段原样保留
    pub extra: Map<String, Value>,
}

/// 解绑结果，两者都算成功
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkOutcome {
    Unlinked,
    AlreadyUnlinked,
}

/// 远端同步接口
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// 上传全量快照
    async fn push_snapshot(&self, snapshot: StateSnapshot) -> Result<()>;

    /// 单个字段变化的实时通知
    async fn notify_change(&self, actor: &ActorProfile, category: &str, value: Value) -> Result<()>;

    /// "有变化，请刷新"信号
    async fn notify_refresh(&self, actor: &ActorProfile) -> Result<()>;

    async fn fetch_remote_state(&self, actor: ActorId) -> Result<RemoteRecord>;

    /// 远端认为该玩家是否已绑定
    async fn check_link_status(&self, actor: &ActorProfile) -> Result<bool>;

    async fn unlink(&self, actor: &ActorProfile) -> Result<UnlinkOutcome>;

    /// 校验绑定码，远端确认成功返回 true
    async fn verify_link_code(&self, actor: &ActorProfile, code: &str) -> Result<bool>;

    /// 会话结束时丢弃该玩家的缓存
    fn forget_actor(&self, _actor: ActorId) {}
}

/// 日志采样器：第 1 次及之后每 N 次返回 true
#[derive(Debug)]
pub struct LogSampler {
    every: u64,
    seen: AtomicU64,
    emitted: AtomicU64,
}

impl LogSampler {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        }
    }

    /// 需要记日志时返回累计次数
    pub fn sample(&self) -> Option<u64> {
        let n = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if n == 1 || n % self.every == 0 {
            self.emitted.fetch_add(1, Ordering::Relaxed);
            Some(n)
        } else {
            None
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

/// 客户端统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limited: u64,
    /// 实际输出的限流日志条数
    pub rate_limit_logs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: Option<LookupData>,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    id: Option<Value>,
    #[serde(rename = "mcUsername")]
    mc_username: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// 兼容 `linked` 与 `isLinked` 两种字段名
#[derive(Debug, Deserialize)]
struct StatusResponse {
    linked: Option<bool>,
    #[serde(rename = "isLinked")]
    is_linked: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SuccessResponse {
    success: Option<bool>,
    #[serde(rename = "alreadyUnlinked")]
    already_unlinked: Option<bool>,
}

/// 基于 reqwest 的远端客户端
pub struct RemoteSyncClient {
    client: Client,
    api: ApiConfig,
    snapshot_timeout: Duration,
    query_timeout: Duration,
    notify_timeout: Duration,
    /// 活跃玩家的远端 userId 缓存
    user_ids: RwLock<HashMap<ActorId, String>>,
    rate_limit_log: LogSampler,
    counters: Counters,
    clock: Arc<dyn Clock>,
}

impl RemoteSyncClient {
    pub fn new(api: &ApiConfig, http: &HttpClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs.max(1)))
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|e| StateLinkError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ 远端同步客户端已创建 (base_url: {})", api.base_url);

        Ok(Self {
            client,
            api: api.clone(),
            snapshot_timeout: Duration::from_secs(http.snapshot_timeout_secs.max(1)),
            query_timeout: Duration::from_secs(http.query_timeout_secs.max(1)),
            notify_timeout: Duration::from_secs(http.notify_timeout_secs.max(1)),
            user_ids: RwLock::new(HashMap::new()),
            rate_limit_log: LogSampler::new(http.rate_limit_log_every),
            counters: Counters::default(),
            clock,
        })
    }

    pub fn stats(&self) -> RemoteStats {
        RemoteStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limit_log.seen(),
            rate_limit_logs: self.rate_limit_log.emitted(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.api.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn post(&self, endpoint: &str, timeout: Duration) -> RequestBuilder {
        self.client
            .post(self.url(endpoint))
            .timeout(timeout)
            .header("X-API-KEY", &self.api.server_key)
    }

    fn with_bearer(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api.jwt_token {
            Some(token) if !token.is_empty() => builder.bearer_auth(token),
            _ => builder,
        }
    }

    /// 发送请求并按状态码分类
    async fn execute(&self, endpoint: &str, builder: RequestBuilder) -> Result<Response> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ 请求 {} 失败: {}", endpoint, e);
                return Err(e.into());
            }
        };

        let status = response.status();
        if status.is_success() {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(count) = self.rate_limit_log.sample() {
                warn!("⚠️ 远端限流 {} (累计 {} 次，日志已采样)", endpoint, count);
            }
            return Err(StateLinkError::RateLimited(endpoint.to_string()));
        }

        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        let body = response
            .text()
            .await
            .ok()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .map(|text| truncate(&text, MAX_BODY_PREVIEW));
        warn!(
            "⚠️ {} 返回 HTTP {}: {}",
            endpoint,
            status.as_u16(),
            body.as_deref().unwrap_or("<empty body>")
        );
        Err(StateLinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// 解析远端 userId，活跃期间缓存
    async fn resolve_user_id(&self, actor: ActorId) -> Result<String> {
        if let Some(user_id) = self.user_ids.read().get(&actor) {
            return Ok(user_id.clone());
        }
        let record = self.fetch_remote_state(actor).await?;
        self.user_ids.write().insert(actor, record.user_id.clone());
        Ok(record.user_id)
    }

    async fn send_notification(&self, event: &str, user_id: String, data: Value) -> Result<()> {
        let endpoint = self.api.endpoints.notify.clone();
        let builder = self.with_bearer(self.post(&endpoint, self.notify_timeout)).json(&json!({
            "userId": user_id,
            "event": event,
            "data": data,
        }));
        let response = self.execute(&endpoint, builder).await?;

        // 旧版本后端不返回 body，只有显式 success:false 才算失败
        let body: SuccessResponse = response.json().await.unwrap_or_default();
        if body.success == Some(false) {
            return Err(StateLinkError::Rejected {
                status: 200,
                body: Some(format!("{} 通知被拒绝", event)),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SyncBackend for RemoteSyncClient {
    async fn push_snapshot(&self, snapshot: StateSnapshot) -> Result<()> {
        let endpoint = self.api.endpoints.player_update.clone();
        let actor = snapshot.actor().clone();
        let payload = json!({
            "actorKey": actor.id.to_string(),
            "serverKey": self.api.server_key,
            "playerData": snapshot.to_player_data(),
        });

        self.execute(&endpoint, self.post(&endpoint, self.snapshot_timeout).json(&payload))
            .await?;
        debug!("✅ 快照已上传: {} ({})", actor.name, actor.id);
        Ok(())
    }

    async fn notify_change(&self, actor: &ActorProfile, category: &str, value: Value) -> Result<()> {
        if !self.api.realtime_updates {
            return Ok(());
        }
        let user_id = self.resolve_user_id(actor.id).await?;
        let data = json!({
            "type": "player_stat_update",
            "mcUsername": actor.name,
            "mcUUID": actor.id.to_string(),
            "statType": category,
            "value": value,
            "timestamp": self.clock.now_millis(),
        });
        self.send_notification("player_stat_update", user_id, data).await?;
        debug!("📡 实时通知已发送: {} {}", actor.name, category);
        Ok(())
    }

    async fn notify_refresh(&self, actor: &ActorProfile) -> Result<()> {
        if !self.api.realtime_updates {
            return Ok(());
        }
        let user_id = self.resolve_user_id(actor.id).await?;
        let data = json!({
            "mcUUID": actor.id.to_string(),
            "mcUsername": actor.name,
            "timestamp": self.clock.now_millis(),
        });
        self.send_notification("player_update", user_id, data).await
    }

    async fn fetch_remote_state(&self, actor: ActorId) -> Result<RemoteRecord> {
        let endpoint = self
            .api
            .endpoints
            .player_lookup
            .replace("{uuid}", &actor.to_string());
        let builder = self
            .client
            .get(self.url(&endpoint))
            .timeout(self.query_timeout)
            .header("X-API-KEY", &self.api.server_key);
        let response = self.execute(&endpoint, builder).await?;

        let lookup: LookupResponse = response.json().await?;
        let data = lookup
            .data
            .ok_or_else(|| StateLinkError::NotFound(format!("远端没有玩家 {} 的记录", actor)))?;
        let user_id = match data.id {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(StateLinkError::NotFound(format!("玩家 {} 缺少远端 userId", actor))),
        };

        Ok(RemoteRecord {
            user_id,
            username: data.mc_username,
            extra: data.extra,
        })
    }

    async fn check_link_status(&self, actor: &ActorProfile) -> Result<bool> {
        let endpoint = self.api.endpoints.player_status.clone();
        let builder = self.post(&endpoint, self.query_timeout).json(&json!({
            "username": actor.name,
            "uuid": actor.id.to_string(),
        }));
        let response = self.execute(&endpoint, builder).await?;

        let status: StatusResponse = response.json().await?;
        Ok(status.linked.or(status.is_linked).unwrap_or(false))
    }

    async fn unlink(&self, actor: &ActorProfile) -> Result<UnlinkOutcome> {
        let endpoint = self.api.endpoints.unlink.clone();
        let builder = self.post(&endpoint, self.query_timeout).json(&json!({
            "username": actor.name,
            "uuid": actor.id.to_string(),
        }));
        let response = self.execute(&endpoint, builder).await?;
        let status = response.status().as_u16();

        let text = response.text().await?;
        let body: SuccessResponse = serde_json::from_str(&text).unwrap_or_default();
        if body.already_unlinked == Some(true) {
            Ok(UnlinkOutcome::AlreadyUnlinked)
        } else if body.success == Some(true) {
            Ok(UnlinkOutcome::Unlinked)
        } else {
            Err(StateLinkError::Rejected {
                status,
                body: Some(truncate(&text, MAX_BODY_PREVIEW)),
            })
        }
    }

    async fn verify_link_code(&self, actor: &ActorProfile, code: &str) -> Result<bool> {
        let endpoint = self.api.endpoints.verify_link.clone();
        let builder = self.post(&endpoint, self.query_timeout).json(&json!({
            "linkCode": code,
            "mcUsername": actor.name,
            "mcUUID": actor.id.to_string(),
        }));
        let response = self.execute(&endpoint, builder).await?;

        let body: SuccessResponse = response.json().await.unwrap_or_default();
        Ok(body.success == Some(true))
    }

    fn forget_actor(&self, actor: ActorId) {
        self.user_ids.write().remove(&actor);
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}
