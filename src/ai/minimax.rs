use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::tablebase::Outcome;
use crate::game::{
    check_terminal, generate_moves, simulate_move, CanonicalKey, Move, Side, State, Terminal,
};

/// 胜负分的基准值；离终局每远一步减 1。
pub const WIN_SCORE: i32 = 100_000;
/// 启发式分数的上限，保证不会与胜负分混淆。
pub const HEURISTIC_CAP: i32 = 10_000;
const DEFAULT_MEMO_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub outcome: Outcome,
    pub distance: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_move: Option<Move>,
    pub score: i32,
    pub nodes: u64,
}

impl SearchResult {
    fn from_score(score: i32, best_move: Option<Move>, nodes: u64) -> Self {
        let (outcome, distance) = if score > HEURISTIC_CAP {
            (Outcome::Win, (WIN_SCORE - score) as u32)
        } else if score < -HEURISTIC_CAP {
            (Outcome::Loss, (WIN_SCORE + score) as u32)
        } else {
            (Outcome::Draw, 0)
        };
        Self {
            outcome,
            distance,
            best_move,
            score,
            nodes,
        }
    }

    pub fn is_forced_win(&self) -> bool {
        self.outcome == Outcome::Win
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicWeights {
    pub dead_opponent_hand: i32,
    pub dead_own_hand: i32,
    /// 点数为 4 的手：打别人只差 1 就能清零，被 1 点打中也会清零。
    pub four_exposed: i32,
    pub four_target: i32,
    /// 己方总点数超过 5 后每多 1 点的惩罚。
    pub overload_per_point: i32,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        Self {
            dead_opponent_hand: 40,
            dead_own_hand: 40,
            four_exposed: 15,
            four_target: 15,
            overload_per_point: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Exact,
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy)]
struct MemoEntry {
    score: i32,
    bound: Bound,
}

/// 单次搜索的上下文；置换表只在一次 `search` 调用内有效。
struct SearchContext {
    memo: HashMap<(CanonicalKey, u32), MemoEntry>,
    capacity: usize,
    nodes: u64,
}

impl SearchContext {
    fn new(capacity: usize) -> Self {
        Self {
            memo: HashMap::new(),
            capacity,
            nodes: 0,
        }
    }

    fn recall(&self, key: CanonicalKey, depth: u32) -> Option<MemoEntry> {
        self.memo.get(&(key, depth)).copied()
    }

    fn store(&mut self, key: CanonicalKey, depth: u32, entry: MemoEntry) {
        if self.memo.len() < self.capacity || self.memo.contains_key(&(key, depth)) {
            self.memo.insert((key, depth), entry);
        }
    }
}

/// 当前分支上已经出现过的局面，按调用栈链接，兄弟分支互不可见。
struct Path<'a> {
    key: CanonicalKey,
    parent: Option<&'a Path<'a>>,
}

impl<'a> Path<'a> {
    fn root(key: CanonicalKey) -> Self {
        Self { key, parent: None }
    }

    fn push(&'a self, key: CanonicalKey) -> Path<'a> {
        Path {
            key,
            parent: Some(self),
        }
    }

    fn contains(&self, key: &CanonicalKey) -> bool {
        let mut node = Some(self);
        while let Some(path) = node {
            if path.key == *key {
                return true;
            }
            node = path.parent;
        }
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeValue {
    score: i32,
    /// 分数受到循环判和的影响，不能写入置换表。
    path_dependent: bool,
}

impl NodeValue {
    fn exact(score: i32) -> Self {
        Self {
            score,
            path_dependent: false,
        }
    }
}

/// 带 alpha-beta 剪枝的有限深度 negamax 搜索，残局库缺失时使用。
#[derive(Debug, Clone)]
pub struct SearchEngine {
    weights: HeuristicWeights,
    memo_capacity: usize,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self {
            weights: HeuristicWeights::default(),
            memo_capacity: DEFAULT_MEMO_CAPACITY,
        }
    }

    pub fn with_weights(mut self, weights: HeuristicWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_memo_capacity(mut self, capacity: usize) -> Self {
        self.memo_capacity = capacity;
        self
    }

    pub fn search(&self, state: &State, turn: Side, depth: u32) -> SearchResult {
        let mut ctx = SearchContext::new(self.memo_capacity);
        ctx.nodes += 1;

        let terminal = check_terminal(state);
        if terminal.is_terminal {
            return SearchResult::from_score(terminal_score(terminal, turn, 0), None, ctx.nodes);
        }
        if depth == 0 {
            return SearchResult::from_score(self.evaluate(state, turn), None, ctx.nodes);
        }

        let moves = generate_moves(state, turn);
        if moves.is_empty() {
            return SearchResult::from_score(-WIN_SCORE, None, ctx.nodes);
        }

        let path = Path::root(state.canonical_key(turn));
        let mut alpha = -WIN_SCORE - 1;
        let beta = WIN_SCORE + 1;
        let mut best_score = i32::MIN;
        let mut best_move = None;

        for action in moves {
            let child = simulate_move(state, &action);
            let value = self.negamax(
                &mut ctx,
                &child,
                turn.opponent(),
                depth - 1,
                1,
                -beta,
                -alpha,
                &path,
            );
            let score = -value.score;
            if score > best_score {
                best_score = score;
                best_move = Some(action);
            }
            alpha = alpha.max(score);
        }

        SearchResult::from_score(best_score, best_move, ctx.nodes)
    }

    pub fn is_forced_win(&self, state: &State, side: Side, depth: u32) -> bool {
        self.search(state, side, depth).is_forced_win()
    }

    #[allow(clippy::too_many_arguments)]
    fn negamax(
        &self,
        ctx: &mut SearchContext,
        state: &State,
        turn: Side,
        depth: u32,
        ply: u32,
        mut alpha: i32,
        beta: i32,
        path: &Path<'_>,
    ) -> NodeValue {
        ctx.nodes += 1;

        let terminal = check_terminal(state);
        if terminal.is_terminal {
            return NodeValue::exact(terminal_score(terminal, turn, ply));
        }

        let key = state.canonical_key(turn);
        if path.contains(&key) {
            return NodeValue {
                score: 0,
                path_dependent: true,
            };
        }
        if depth == 0 {
            return NodeValue::exact(self.evaluate(state, turn));
        }

        if let Some(entry) = ctx.recall(key, depth) {
            let score = from_memo(entry.score, ply);
            let usable = match entry.bound {
                Bound::Exact => true,
                Bound::Lower => score >= beta,
                Bound::Upper => score <= alpha,
            };
            if usable {
                return NodeValue::exact(score);
            }
        }

        let moves = generate_moves(state, turn);
        if moves.is_empty() {
            return NodeValue::exact(-(WIN_SCORE - ply as i32));
        }

        let alpha_orig = alpha;
        let path = path.push(key);
        let mut best = i32::MIN;
        let mut path_dependent = false;

        for action in &moves {
            let child = simulate_move(state, action);
            let value = self.negamax(
                ctx,
                &child,
                turn.opponent(),
                depth - 1,
                ply + 1,
                -beta,
                -alpha,
                &path,
            );
            path_dependent |= value.path_dependent;
            best = best.max(-value.score);
            alpha = alpha.max(best);
            if alpha >= beta {
                break;
            }
        }

        if !path_dependent {
            let bound = if best <= alpha_orig {
                Bound::Upper
            } else if best >= beta {
                Bound::Lower
            } else {
                Bound::Exact
            };
            ctx.store(
                key,
                depth,
                MemoEntry {
                    score: to_memo(best, ply),
                    bound,
                },
            );
        }

        NodeValue {
            score: best,
            path_dependent,
        }
    }

    pub fn evaluate(&self, state: &State, turn: Side) -> i32 {
        let w = &self.weights;
        let own = state.hands(turn);
        let theirs = state.hands(turn.opponent());

        let mut score = 0;
        score += w.dead_opponent_hand * (2 - state.alive_count(turn.opponent()) as i32);
        score -= w.dead_own_hand * (2 - state.alive_count(turn) as i32);
        score -= w.four_exposed * own.iter().filter(|&&hand| hand == 4).count() as i32;
        score += w.four_target * theirs.iter().filter(|&&hand| hand == 4).count() as i32;

        let own_total = state.total(turn) as i32;
        if own_total > 5 {
            score -= w.overload_per_point * (own_total - 5);
        }

        score.clamp(-HEURISTIC_CAP, HEURISTIC_CAP)
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn terminal_score(terminal: Terminal, turn: Side, ply: u32) -> i32 {
    match terminal.loser_side {
        Some(loser) if loser == turn => -(WIN_SCORE - ply as i32),
        Some(_) => WIN_SCORE - ply as i32,
        None => 0,
    }
}

// Mate scores are stored relative to the node, not the root.
fn to_memo(score: i32, ply: u32) -> i32 {
    if score > HEURISTIC_CAP {
        score + ply as i32
    } else if score < -HEURISTIC_CAP {
        score - ply as i32
    } else {
        score
    }
}

fn from_memo(score: i32, ply: u32) -> i32 {
    if score > HEURISTIC_CAP {
        score - ply as i32
    } else if score < -HEURISTIC_CAP {
        score + ply as i32
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tablebase::Tablebase;

    #[test]
    fn finds_immediate_kill() {
        let engine = SearchEngine::new();
        let result = engine.search(&State::new([1, 0], [4, 0]), Side::Player, 3);

        assert_eq!(result.outcome, Outcome::Win);
        assert_eq!(result.distance, 1);
        let action = result.best_move.expect("winning move expected");
        let next = simulate_move(&State::new([1, 0], [4, 0]), &action);
        assert_eq!(
            check_terminal(&next),
            Terminal {
                is_terminal: true,
                loser_side: Some(Side::Ai)
            }
        );
    }

    #[test]
    fn terminal_root_is_scored_without_moves() {
        let engine = SearchEngine::new();
        let lost = engine.search(&State::new([0, 0], [1, 1]), Side::Player, 4);
        assert_eq!(lost.outcome, Outcome::Loss);
        assert_eq!(lost.distance, 0);
        assert!(lost.best_move.is_none());
    }

    #[test]
    fn zero_depth_is_a_heuristic_draw() {
        let engine = SearchEngine::new();
        let result = engine.search(&State::initial(), Side::Player, 0);
        assert_eq!(result.outcome, Outcome::Draw);
        assert!(result.score.abs() <= HEURISTIC_CAP);
    }

    #[test]
    fn heuristic_prefers_dead_opponent_hands() {
        let engine = SearchEngine::new();
        let ahead = engine.evaluate(&State::new([1, 1], [0, 2]), Side::Player);
        let even = engine.evaluate(&State::new([1, 1], [1, 2]), Side::Player);
        let overloaded = engine.evaluate(&State::new([4, 3], [1, 2]), Side::Player);
        assert!(ahead > even);
        assert!(overloaded < even);
    }

    #[test]
    fn deep_search_terminates_on_cyclic_positions() {
        let engine = SearchEngine::new();
        let result = engine.search(&State::initial(), Side::Player, 10);
        assert!(result.best_move.is_some());
        assert!(result.nodes > 0);
    }

    #[test]
    fn searches_are_independent() {
        let engine = SearchEngine::new();
        let state = State::new([2, 3], [1, 4]);
        let first = engine.search(&state, Side::Ai, 6);
        let second = engine.search(&state, Side::Ai, 6);
        assert_eq!(first, second);
    }

    #[test]
    fn agrees_with_tablebase_on_short_forced_outcomes() {
        let table = Tablebase::build();
        let engine = SearchEngine::new();

        for (key, entry) in table.iter() {
            let state = key.state();
            if check_terminal(&state).is_terminal
                || entry.outcome == Outcome::Draw
                || entry.distance > 3
            {
                continue;
            }
            let result = engine.search(&state, key.turn(), 4);
            assert_eq!(result.outcome, entry.outcome, "outcome for {key}");
            assert_eq!(result.distance, entry.distance, "distance for {key}");
        }
    }

    #[test]
    fn forced_win_within_depth() {
        let engine = SearchEngine::new();
        assert!(engine.is_forced_win(&State::new([1, 0], [4, 0]), Side::Player, 2));
        assert!(!engine.is_forced_win(&State::new([1, 0], [4, 0]), Side::Player, 0));
    }
}
