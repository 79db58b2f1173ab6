pub mod ai;
pub mod game;

use gloo_timers::future::TimeoutFuture;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use std::str::FromStr;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::js_sys::Promise;

pub use ai::{
    analyze_moves, AiAgent, AiConfig, AiDecision, AiDifficulty, ClassificationSource,
    MoveClassification, OffloadAction, OffloadResult, Outcome, SearchEngine, SearchOffload,
    SearchPayload, SearchResult, StrengthPolicy, Tablebase, TablebaseBuilder, TablebaseEntry,
    TablebaseStore,
};
pub use game::{
    check_terminal, generate_moves, simulate_move, CanonicalKey, GameSession, HistoryRecord, Move,
    RuleError, Side, State, Terminal,
};

#[cfg(all(feature = "wee_alloc", target_arch = "wasm32"))]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

/// 提示分析在没有残局库时使用的搜索深度。
const HINT_SEARCH_DEPTH: u32 = 8;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
}

fn to_js_error(error: RuleError) -> JsValue {
    to_value(&error).unwrap_or_else(|serialize_err| JsValue::from_str(&serialize_err.to_string()))
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn parse_side(value: &str) -> Result<Side, JsValue> {
    Side::from_str(value).map_err(|_| JsValue::from_str(&format!("unknown side: {value}")))
}

fn parse_difficulty(value: Option<&str>) -> AiDifficulty {
    value
        .and_then(|value| AiDifficulty::from_str(value).ok())
        .unwrap_or(AiDifficulty::Normal)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AiMoveResponse {
    decision: AiDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<Terminal>,
    state: State,
}

#[wasm_bindgen]
pub struct GameEngine {
    session: GameSession,
    store: TablebaseStore,
    agent: AiAgent,
    offload: SearchOffload,
}

#[wasm_bindgen]
impl GameEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(difficulty: Option<String>, first: Option<String>) -> Result<GameEngine, JsValue> {
        let first = match first.as_deref() {
            Some(value) => parse_side(value)?,
            None => Side::Player,
        };
        let config = AiConfig::from_difficulty(parse_difficulty(difficulty.as_deref()));
        Ok(GameEngine {
            session: GameSession::new(first),
            store: TablebaseStore::new(),
            offload: SearchOffload::spawn(None, config.offload_timeout),
            agent: AiAgent::new(config),
        })
    }

    pub fn state_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.session.state()).map_err(serde_to_js_error)
    }

    pub fn history_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.session.history()).map_err(serde_to_js_error)
    }

    pub fn turn(&self) -> String {
        self.session.turn().to_string()
    }

    pub fn set_difficulty(&mut self, difficulty: &str) {
        let config = AiConfig::from_difficulty(parse_difficulty(Some(difficulty)));
        self.offload.set_timeout(config.offload_timeout);
        self.agent = AiAgent::new(config);
    }

    pub fn apply_move_json(&mut self, move_json: &str) -> Result<String, JsValue> {
        let action: Move = serde_json::from_str(move_json).map_err(serde_to_js_error)?;
        let terminal = self
            .session
            .apply_move(action.actor(), action)
            .map_err(to_js_error)?;
        serde_json::to_string(&terminal).map_err(serde_to_js_error)
    }

    /// 撤销一步；没有历史时返回 `false`。
    pub fn undo(&mut self) -> bool {
        self.session.undo().is_some()
    }

    pub fn check_win_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.session.check_win()).map_err(serde_to_js_error)
    }

    pub fn tablebase_loaded(&self) -> bool {
        self.store.is_loaded()
    }

    pub fn load_tablebase_json(&self, json: &str) -> Result<(), JsValue> {
        self.store.load_bytes(json.as_bytes()).map_err(serde_to_js_error)
    }

    pub fn load_tablebase_url(&self, url: String) -> Promise {
        let store = self.store.clone();
        future_to_promise(async move {
            store.load_url(&url).await.map_err(serde_to_js_error)?;
            Ok(JsValue::from_bool(store.is_loaded()))
        })
    }

    /// 让 AI 为当前走子方选一步并立即提交。
    pub fn ai_move(&mut self) -> Result<String, JsValue> {
        let side = self.session.turn();
        let table = self.store.table();
        let session = &self.session;
        let decision = self
            .agent
            .ai_turn(|| session.state(), side, table.as_deref());

        let applied = match decision.action {
            Some(action) => Some(self.session.apply_move(side, action).map_err(to_js_error)?),
            None => None,
        };

        let response = AiMoveResponse {
            decision,
            applied,
            state: self.session.state(),
        };
        serde_json::to_string(&response).map_err(serde_to_js_error)
    }

    /// 把当前局面交给后台计算，可选延迟后返回决策，不修改对局；由调用方播放动画并提交。
    pub fn think_ai(&mut self, delay_ms: Option<u32>) -> Promise {
        let config = self.agent.config();
        let payload = SearchPayload::new(
            self.session.state(),
            self.session.turn(),
            config.search_depth,
        )
        .with_difficulty(config.difficulty);
        self.offload.set_table(self.store.table());
        let pending = self.offload.request_async(OffloadAction::ChooseMove, payload);
        let delay = delay_ms.unwrap_or(0);

        future_to_promise(async move {
            if delay > 0 {
                TimeoutFuture::new(delay).await;
            }
            let decision = match pending.await.map_err(serde_to_js_error)? {
                OffloadResult::Decision(decision) => decision,
                OffloadResult::Search(_) => {
                    return Err(JsValue::from_str("offload answered with a search result"))
                }
            };
            let json = serde_json::to_string(&decision).map_err(serde_to_js_error)?;
            Ok(JsValue::from_str(&json))
        })
    }

    pub fn analyze_moves_json(&self, perspective: Option<String>) -> Result<String, JsValue> {
        let acting = self.session.turn();
        let perspective = match perspective.as_deref() {
            Some(value) => parse_side(value)?,
            None => acting,
        };
        let table = self.store.table();
        let hints = analyze_moves(
            &self.session.state(),
            acting,
            perspective,
            table.as_deref(),
            self.agent.engine(),
            HINT_SEARCH_DEPTH,
        );
        serde_json::to_string(&hints).map_err(serde_to_js_error)
    }
}

#[wasm_bindgen(js_name = "computeAiMove")]
pub fn compute_ai_move(
    state: JsValue,
    side: String,
    difficulty: Option<String>,
) -> Result<JsValue, JsValue> {
    let state: State = from_value(state).map_err(JsValue::from)?;
    let side = parse_side(&side)?;
    let config = AiConfig::from_difficulty(parse_difficulty(difficulty.as_deref()));
    let mut agent = AiAgent::new(config);
    let decision = agent.decide(&state, side, None);
    to_value(&decision).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "analyzeMoves")]
pub fn analyze_moves_js(
    state: JsValue,
    acting: String,
    perspective: String,
    depth: Option<u32>,
) -> Result<JsValue, JsValue> {
    let state: State = from_value(state).map_err(JsValue::from)?;
    let acting = parse_side(&acting)?;
    let perspective = parse_side(&perspective)?;
    let hints = analyze_moves(
        &state,
        acting,
        perspective,
        None,
        &SearchEngine::new(),
        depth.unwrap_or(HINT_SEARCH_DEPTH),
    );
    to_value(&hints).map_err(JsValue::from)
}

/// 现场跑一遍逆向分析，返回残局库 JSON。
#[wasm_bindgen(js_name = "buildTablebase")]
pub fn build_tablebase() -> Result<String, JsValue> {
    Tablebase::build().to_json().map_err(serde_to_js_error)
}

#[wasm_bindgen(js_name = "generateMoves")]
pub fn generate_moves_js(state: JsValue, side: String) -> Result<JsValue, JsValue> {
    let state: State = from_value(state).map_err(JsValue::from)?;
    let side = parse_side(&side)?;
    to_value(&generate_moves(&state, side)).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "checkTerminal")]
pub fn check_terminal_js(state: JsValue) -> Result<JsValue, JsValue> {
    let state: State = from_value(state).map_err(JsValue::from)?;
    to_value(&check_terminal(&state)).map_err(JsValue::from)
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
