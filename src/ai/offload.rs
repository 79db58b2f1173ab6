//! 把搜索与选子放到后台线程执行。
//!
//! 每个请求带一个递增的关联 id；回应按 id 匹配，过期的回应直接丢弃。
//! 后台线程不可用、出错或超时时，在调用方线程上同步计算同一个请求。
//!
//! 三种等待方式：`poll` 非阻塞轮询，`request` 阻塞等待，`request_async` 返回一个
//! 与超时计时器赛跑的 future，适合挂在浏览器的 Promise 上。

use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use futures::channel::oneshot;
use futures::future::{self as future_util, Either, FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use web_time::Instant;

use super::minimax::{SearchEngine, SearchResult};
use super::policy::{AiAgent, AiConfig, AiDecision, AiDifficulty};
use super::tablebase::Tablebase;
use crate::game::{Side, State};

pub const DEFAULT_OFFLOAD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OffloadAction {
    HintSearch,
    ChooseMove,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    pub state: State,
    pub depth: u32,
    pub turn: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<AiDifficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl SearchPayload {
    pub fn new(state: State, turn: Side, depth: u32) -> Self {
        Self {
            state,
            depth,
            turn,
            difficulty: None,
            seed: None,
        }
    }

    pub fn with_difficulty(mut self, difficulty: AiDifficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OffloadRequest {
    pub id: u64,
    pub action: OffloadAction,
    pub payload: SearchPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OffloadResult {
    Search(SearchResult),
    Decision(AiDecision),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OffloadBody {
    Result(OffloadResult),
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OffloadResponse {
    pub id: u64,
    #[serde(flatten)]
    pub body: OffloadBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffloadError {
    #[error("search worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("no result for request {0}")]
    UnknownRequest(u64),
}

/// 提交请求后拿到的凭据，用于轮询结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffloadTicket(u64);

impl OffloadTicket {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// 后台线程与本地退路共用的计算入口。
pub fn compute(
    action: OffloadAction,
    payload: &SearchPayload,
    table: Option<&Tablebase>,
) -> Result<OffloadResult, OffloadError> {
    match action {
        OffloadAction::HintSearch => {
            let result = SearchEngine::new().search(&payload.state, payload.turn, payload.depth);
            Ok(OffloadResult::Search(result))
        }
        OffloadAction::ChooseMove => {
            let difficulty = payload.difficulty.unwrap_or(AiDifficulty::Normal);
            let config = AiConfig::from_difficulty(difficulty).with_search_depth(payload.depth);
            let mut agent = match payload.seed {
                Some(seed) => AiAgent::with_seed(config, seed),
                None => AiAgent::new(config),
            };
            let decision = agent.decide(&payload.state, payload.turn, table);
            Ok(OffloadResult::Decision(decision))
        }
    }
}

/// 发给后台线程的一项任务：请求、残局库快照，以及可选的一次性回信通道。
pub struct OffloadJob {
    pub request: OffloadRequest,
    pub table: Option<Arc<Tablebase>>,
    reply: Option<oneshot::Sender<OffloadResponse>>,
}

impl OffloadJob {
    /// 把回应送回提交方。只有共享回应通道断开时才返回 `false`。
    pub fn respond(self, responses: &Sender<OffloadResponse>, body: OffloadBody) -> bool {
        let response = OffloadResponse {
            id: self.request.id,
            body,
        };
        match self.reply {
            Some(reply) => {
                if let Err(late) = reply.send(response) {
                    debug!(id = late.id, "dropping late search response");
                }
                true
            }
            None => responses.send(response).is_ok(),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn worker_loop(jobs: Receiver<OffloadJob>, responses: Sender<OffloadResponse>) {
    for job in jobs.iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            compute(job.request.action, &job.request.payload, job.table.as_deref())
        }))
        .unwrap_or_else(|payload| Err(OffloadError::WorkerPanicked(panic_message(payload))));

        let body = match result {
            Ok(result) => OffloadBody::Result(result),
            Err(err) => OffloadBody::Error(err.to_string()),
        };
        if !job.respond(&responses, body) {
            break;
        }
    }
    debug!("search worker exiting");
}

#[cfg(target_arch = "wasm32")]
fn deadline(timeout: Duration) -> LocalBoxFuture<'static, ()> {
    let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    gloo_timers::future::TimeoutFuture::new(millis).boxed_local()
}

#[cfg(not(target_arch = "wasm32"))]
fn deadline(timeout: Duration) -> LocalBoxFuture<'static, ()> {
    let (fire, fired) = oneshot::channel::<()>();
    let spawned = thread::Builder::new()
        .name("search-offload-deadline".to_string())
        .spawn(move || {
            thread::sleep(timeout);
            let _ = fire.send(());
        });
    match spawned {
        Ok(_) => fired.map(|_| ()).boxed_local(),
        Err(err) => {
            warn!(%err, "deadline timer unavailable; expiring immediately");
            future_util::ready(()).boxed_local()
        }
    }
}

struct Pending {
    request: OffloadRequest,
    deadline: Instant,
}

pub struct SearchOffload {
    jobs: Option<Sender<OffloadJob>>,
    responses: Option<Receiver<OffloadResponse>>,
    worker: Option<JoinHandle<()>>,
    table: Option<Arc<Tablebase>>,
    timeout: Duration,
    next_id: u64,
    pending: HashMap<u64, Pending>,
    completed: HashMap<u64, Result<OffloadResult, OffloadError>>,
}

impl SearchOffload {
    /// 启动后台线程；线程起不来（例如在浏览器主线程里）就退化为本地计算。
    pub fn spawn(table: Option<Arc<Tablebase>>, timeout: Duration) -> Self {
        let (job_tx, job_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let spawned = thread::Builder::new()
            .name("search-offload".to_string())
            .spawn(move || worker_loop(job_rx, response_tx));

        match spawned {
            Ok(handle) => {
                let mut offload = Self::with_channels(job_tx, response_rx, table, timeout);
                offload.worker = Some(handle);
                offload
            }
            Err(err) => {
                warn!(%err, "search worker unavailable; computing on the caller thread");
                let mut offload = Self::local(table);
                offload.timeout = timeout;
                offload
            }
        }
    }

    /// 不带后台线程，所有请求同步计算。
    pub fn local(table: Option<Arc<Tablebase>>) -> Self {
        Self {
            jobs: None,
            responses: None,
            worker: None,
            table,
            timeout: DEFAULT_OFFLOAD_TIMEOUT,
            next_id: 0,
            pending: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    /// 接入任意一对通道，另一端由调用方负责。
    pub fn with_channels(
        jobs: Sender<OffloadJob>,
        responses: Receiver<OffloadResponse>,
        table: Option<Arc<Tablebase>>,
        timeout: Duration,
    ) -> Self {
        Self {
            jobs: Some(jobs),
            responses: Some(responses),
            worker: None,
            table,
            timeout,
            next_id: 0,
            pending: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    pub fn is_offloaded(&self) -> bool {
        self.jobs.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// 残局库加载完成后换上新的快照，之后提交的请求都会带上它。
    pub fn set_table(&mut self, table: Option<Arc<Tablebase>>) {
        self.table = table;
    }

    fn next_request(&mut self, action: OffloadAction, payload: SearchPayload) -> OffloadRequest {
        self.next_id += 1;
        OffloadRequest {
            id: self.next_id,
            action,
            payload,
        }
    }

    /// 把任务交给后台线程；通道已关闭时原样退回。
    fn dispatch(
        &mut self,
        request: OffloadRequest,
        reply: Option<oneshot::Sender<OffloadResponse>>,
    ) -> Result<(), OffloadRequest> {
        let Some(jobs) = &self.jobs else {
            return Err(request);
        };
        let job = OffloadJob {
            request,
            table: self.table.clone(),
            reply,
        };
        match jobs.send(job) {
            Ok(()) => Ok(()),
            Err(returned) => {
                warn!("search worker channel closed; computing locally");
                self.jobs = None;
                Err(returned.into_inner().request)
            }
        }
    }

    pub fn submit(&mut self, action: OffloadAction, payload: SearchPayload) -> OffloadTicket {
        let request = self.next_request(action, payload);
        let ticket = OffloadTicket(request.id);
        match self.dispatch(request.clone(), None) {
            Ok(()) => {
                let deadline = Instant::now() + self.timeout;
                self.pending.insert(request.id, Pending { request, deadline });
            }
            Err(request) => {
                let result = compute(request.action, &request.payload, self.table.as_deref());
                self.completed.insert(request.id, result);
            }
        }
        ticket
    }

    /// 非阻塞地查看结果；还没回来返回 `None`。超时的请求在这里改为本地计算。
    pub fn poll(&mut self, ticket: OffloadTicket) -> Option<Result<OffloadResult, OffloadError>> {
        self.drain();
        self.expire_overdue();
        self.completed.remove(&ticket.0)
    }

    /// 提交并等待结果，最多等 `timeout`，之后在本线程重算。会阻塞调用方线程。
    pub fn request(
        &mut self,
        action: OffloadAction,
        payload: SearchPayload,
    ) -> Result<OffloadResult, OffloadError> {
        let ticket = self.submit(action, payload);
        if let Some(result) = self.completed.remove(&ticket.0) {
            return result;
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let Some(responses) = &self.responses else {
                return self.fallback(ticket);
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match responses.recv_timeout(remaining) {
                Ok(response) if response.id == ticket.0 => {
                    self.pending.remove(&ticket.0);
                    match response.body {
                        OffloadBody::Result(result) => return Ok(result),
                        OffloadBody::Error(message) => {
                            warn!(
                                id = ticket.0,
                                %message,
                                "search worker failed; computing locally"
                            );
                            return self.fallback(ticket);
                        }
                    }
                }
                Ok(response) => self.accept(response),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        id = ticket.0,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "search worker timed out; computing locally"
                    );
                    return self.fallback(ticket);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("search worker disconnected; computing locally");
                    self.responses = None;
                    self.jobs = None;
                    return self.fallback(ticket);
                }
            }
        }
    }

    /// 不阻塞调用方的版本：回应走一次性通道，与 `timeout` 计时器赛跑，
    /// 超时、出错或后台线程不可用时在 await 的一方本地计算。
    pub fn request_async(
        &mut self,
        action: OffloadAction,
        payload: SearchPayload,
    ) -> impl Future<Output = Result<OffloadResult, OffloadError>> + 'static {
        let request = self.next_request(action, payload);
        let table = self.table.clone();
        let timeout = self.timeout;
        let (reply_tx, reply_rx) = oneshot::channel();
        let dispatched = self.dispatch(request.clone(), Some(reply_tx)).is_ok();

        async move {
            let local = |request: &OffloadRequest| {
                compute(request.action, &request.payload, table.as_deref())
            };
            if !dispatched {
                return local(&request);
            }

            match future_util::select(reply_rx, deadline(timeout)).await {
                Either::Left((Ok(response), _)) => match response.body {
                    OffloadBody::Result(result) => Ok(result),
                    OffloadBody::Error(message) => {
                        warn!(id = request.id, %message, "search worker failed; computing locally");
                        local(&request)
                    }
                },
                Either::Left((Err(oneshot::Canceled), _)) => {
                    warn!(id = request.id, "search worker went away; computing locally");
                    local(&request)
                }
                Either::Right(((), _)) => {
                    warn!(
                        id = request.id,
                        timeout_ms = timeout.as_millis() as u64,
                        "search worker timed out; computing locally"
                    );
                    local(&request)
                }
            }
        }
    }

    fn fallback(&mut self, ticket: OffloadTicket) -> Result<OffloadResult, OffloadError> {
        match self.pending.remove(&ticket.0) {
            Some(pending) => compute(
                pending.request.action,
                &pending.request.payload,
                self.table.as_deref(),
            ),
            None => self
                .completed
                .remove(&ticket.0)
                .unwrap_or(Err(OffloadError::UnknownRequest(ticket.0))),
        }
    }

    fn expire_overdue(&mut self) {
        let now = Instant::now();
        let overdue: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in overdue {
            warn!(id, "search worker timed out; computing locally");
            let result = self.fallback(OffloadTicket(id));
            self.completed.insert(id, result);
        }
    }

    fn drain(&mut self) {
        loop {
            let Some(responses) = &self.responses else {
                return;
            };
            match responses.try_recv() {
                Ok(response) => self.accept(response),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.responses = None;
                    self.jobs = None;
                    let orphaned: Vec<u64> = self.pending.keys().copied().collect();
                    for id in orphaned {
                        let result = self.fallback(OffloadTicket(id));
                        self.completed.insert(id, result);
                    }
                    return;
                }
            }
        }
    }

    fn accept(&mut self, response: OffloadResponse) {
        let Some(pending) = self.pending.remove(&response.id) else {
            debug!(id = response.id, "dropping stale search response");
            return;
        };
        let result = match response.body {
            OffloadBody::Result(result) => Ok(result),
            OffloadBody::Error(message) => {
                warn!(id = response.id, %message, "search worker failed; computing locally");
                let request = pending.request;
                compute(request.action, &request.payload, self.table.as_deref())
            }
        };
        self.completed.insert(response.id, result);
    }
}

impl Drop for SearchOffload {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
