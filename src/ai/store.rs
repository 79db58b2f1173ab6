//! 残局库的加载与查询。
//!
//! `load` 只会真正发起一次读取：加载完成前的并发调用共享同一个进行中的 future。
//! 加载失败时只记录日志，库保持为空，调用方退回到搜索引擎。

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use once_cell::unsync::OnceCell;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::tablebase::{Tablebase, TablebaseEntry};
use crate::game::{CanonicalKey, Side, State};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("tablebase fetch failed: {0}")]
    Fetch(String),
    #[error("tablebase parse failed: {0}")]
    Parse(String),
}

type LoadFuture = Shared<LocalBoxFuture<'static, Result<Arc<Tablebase>, StoreError>>>;
type Listener = Box<dyn FnOnce(&Tablebase)>;

#[derive(Default)]
struct StoreInner {
    table: OnceCell<Arc<Tablebase>>,
    in_flight: RefCell<Option<LoadFuture>>,
    listeners: RefCell<Vec<Listener>>,
}

/// 主循环持有的残局库句柄，克隆后共享同一份数据。
/// 跨线程使用时通过 [`TablebaseStore::table`] 取出只读快照。
#[derive(Clone, Default)]
pub struct TablebaseStore {
    inner: Rc<StoreInner>,
}

impl TablebaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: Tablebase) -> Self {
        let store = Self::new();
        store.install(Arc::new(table));
        store
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.table.get().is_some()
    }

    pub fn table(&self) -> Option<Arc<Tablebase>> {
        self.inner.table.get().cloned()
    }

    pub fn lookup(&self, key: &CanonicalKey) -> Option<TablebaseEntry> {
        self.inner.table.get().and_then(|table| table.lookup(key))
    }

    pub fn lookup_state(&self, state: &State, turn: Side) -> Option<TablebaseEntry> {
        self.lookup(&state.canonical_key(turn))
    }

    /// 注册一次性的"已加载"回调；已经加载过则立即调用。
    pub fn on_loaded<F>(&self, listener: F)
    where
        F: FnOnce(&Tablebase) + 'static,
    {
        match self.inner.table.get() {
            Some(table) => listener(table),
            None => self.inner.listeners.borrow_mut().push(Box::new(listener)),
        }
    }

    /// 异步读取并解析残局库。`fetch` 只在没有进行中的加载时才会被调用。
    pub async fn load<F, Fut>(&self, fetch: F) -> Result<(), StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, StoreError>> + 'static,
    {
        if self.is_loaded() {
            return Ok(());
        }

        let pending = {
            let mut slot = self.inner.in_flight.borrow_mut();
            match slot.as_ref() {
                Some(pending) => {
                    debug!("joining in-flight tablebase load");
                    pending.clone()
                }
                None => {
                    let fetching = fetch();
                    let pending = async move {
                        let result = match fetching.await {
                            Ok(bytes) => Tablebase::from_json_slice(&bytes)
                                .map(Arc::new)
                                .map_err(|err| StoreError::Parse(err.to_string())),
                            Err(err) => Err(err),
                        };
                        if let Err(err) = &result {
                            warn!(%err, "tablebase load failed; search fallback stays active");
                        }
                        result
                    }
                    .boxed_local()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;
        {
            let mut slot = self.inner.in_flight.borrow_mut();
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
                slot.take();
            }
        }

        let table = result?;
        self.install(table);
        Ok(())
    }

    /// 同步版本：直接解析已经拿到手的字节。
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if self.is_loaded() {
            return Ok(());
        }
        match Tablebase::from_json_slice(bytes) {
            Ok(table) => {
                self.install(Arc::new(table));
                Ok(())
            }
            Err(err) => {
                let err = StoreError::Parse(err.to_string());
                warn!(%err, "tablebase load failed; search fallback stays active");
                Err(err)
            }
        }
    }

    /// 通过浏览器 `fetch` 读取残局库。
    pub async fn load_url(&self, url: &str) -> Result<(), StoreError> {
        let url = url.to_owned();
        self.load(move || fetch_bytes(url)).await
    }

    fn install(&self, table: Arc<Tablebase>) {
        if self.inner.table.set(Arc::clone(&table)).is_err() {
            return;
        }
        info!(entries = table.len(), "tablebase loaded");
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        for listener in listeners {
            listener(&table);
        }
    }
}

#[cfg(target_arch = "wasm32")]
async fn fetch_bytes(url: String) -> Result<Vec<u8>, StoreError> {
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::js_sys::Uint8Array;

    fn fetch_error(value: JsValue) -> StoreError {
        StoreError::Fetch(format!("{value:?}"))
    }

    let window = web_sys::window().ok_or_else(|| StoreError::Fetch("no window".into()))?;
    let response = JsFuture::from(window.fetch_with_str(&url))
        .await
        .map_err(fetch_error)?;
    let response: web_sys::Response = response.dyn_into().map_err(fetch_error)?;
    if !response.ok() {
        return Err(StoreError::Fetch(format!("HTTP {} for {url}", response.status())));
    }
    let buffer = JsFuture::from(response.array_buffer().map_err(fetch_error)?)
        .await
        .map_err(fetch_error)?;
    Ok(Uint8Array::new(&buffer).to_vec())
}

#[cfg(not(target_arch = "wasm32"))]
async fn fetch_bytes(url: String) -> Result<Vec<u8>, StoreError> {
    Err(StoreError::Fetch(format!(
        "fetching {url} is only available in the browser"
    )))
}
