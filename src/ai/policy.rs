use std::str::FromStr;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::minimax::SearchEngine;
use super::tablebase::{Outcome, Tablebase, TablebaseEntry};
use crate::game::{
    check_terminal, generate_moves, simulate_move, successors, Move, Side, State,
};

/// 普通难度里"拖延型败着"需要达到的距离。
const NORMAL_LONG_LOSS: u32 = 11;
/// 弱难度里故意走出的败着至少要拖这么多步。
const WEAK_SLOW_LOSS: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiDifficulty {
    Weakest,
    Weak,
    Normal,
    Hard,
}

impl FromStr for AiDifficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weakest" | "beginner" => Ok(AiDifficulty::Weakest),
            "weak" | "easy" => Ok(AiDifficulty::Weak),
            "normal" | "medium" => Ok(AiDifficulty::Normal),
            "hard" | "strong" | "expert" => Ok(AiDifficulty::Hard),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub difficulty: AiDifficulty,
    /// 残局库缺失时搜索引擎的深度。
    pub search_depth: u32,
    /// 运行完整策略前先探测的强制胜深度，0 表示跳过。
    pub forced_win_depth: u32,
    pub offload_timeout: Duration,
}

impl AiConfig {
    pub fn from_difficulty(difficulty: AiDifficulty) -> Self {
        match difficulty {
            AiDifficulty::Weakest => Self {
                difficulty,
                search_depth: 6,
                forced_win_depth: 0,
                offload_timeout: Duration::from_secs(5),
            },
            AiDifficulty::Weak => Self {
                difficulty,
                search_depth: 6,
                forced_win_depth: 0,
                offload_timeout: Duration::from_secs(5),
            },
            AiDifficulty::Normal => Self {
                difficulty,
                search_depth: 8,
                forced_win_depth: 5,
                offload_timeout: Duration::from_secs(5),
            },
            AiDifficulty::Hard => Self {
                difficulty,
                search_depth: 10,
                forced_win_depth: 5,
                offload_timeout: Duration::from_secs(5),
            },
        }
    }

    pub fn with_search_depth(mut self, depth: u32) -> Self {
        self.search_depth = depth;
        self
    }

    pub fn with_offload_timeout(mut self, timeout: Duration) -> Self {
        self.offload_timeout = timeout;
        self
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig::from_difficulty(AiDifficulty::Normal)
    }
}

/// 某一步棋的分类，站在走这一步的一方的角度；`distance` 是走后局面到终局的步数。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MoveClassification {
    #[serde(rename = "move")]
    pub action: Move,
    pub outcome: Outcome,
    pub distance: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ClassificationSource {
    Tablebase,
    Search,
    ForcedWin,
    None,
}

/// 局面分类：优先查残局库，查不到再交给搜索引擎。
pub struct Classifier<'a> {
    table: Option<&'a Tablebase>,
    engine: &'a SearchEngine,
    depth: u32,
}

impl<'a> Classifier<'a> {
    pub fn new(table: Option<&'a Tablebase>, engine: &'a SearchEngine, depth: u32) -> Self {
        Self {
            table,
            engine,
            depth,
        }
    }

    pub fn table(&self) -> Option<&'a Tablebase> {
        self.table
    }

    /// `to_move` 视角下 `state` 的结果，以及是否来自残局库。
    pub fn entry(&self, state: &State, to_move: Side) -> (TablebaseEntry, bool) {
        if let Some(entry) = self.table.and_then(|table| table.lookup_state(state, to_move)) {
            return (entry, true);
        }
        let result = self.engine.search(state, to_move, self.depth.saturating_sub(1));
        (TablebaseEntry::new(result.outcome, result.distance), false)
    }

    /// 对 `actor` 的每一步棋做分类。
    pub fn classify_moves(
        &self,
        state: &State,
        actor: Side,
    ) -> (Vec<MoveClassification>, ClassificationSource) {
        let mut all_from_table = true;
        let classified: Vec<MoveClassification> = successors(state, actor)
            .into_iter()
            .map(|(action, child)| {
                let (entry, from_table) = self.entry(&child, actor.opponent());
                all_from_table &= from_table;
                MoveClassification {
                    action,
                    outcome: entry.outcome.invert(),
                    distance: entry.distance,
                }
            })
            .collect();

        let source = if classified.is_empty() {
            ClassificationSource::None
        } else if all_from_table {
            ClassificationSource::Tablebase
        } else {
            ClassificationSource::Search
        };
        (classified, source)
    }
}

/// 选择策略需要的上下文：当前局面与走子方。
pub struct PolicyContext<'a> {
    pub state: &'a State,
    pub actor: Side,
    pub classifier: &'a Classifier<'a>,
}

fn best_win(candidates: &[MoveClassification]) -> Option<MoveClassification> {
    candidates
        .iter()
        .filter(|c| c.outcome == Outcome::Win)
        .min_by_key(|c| c.distance)
        .copied()
}

fn any_draw<R: Rng>(candidates: &[MoveClassification], rng: &mut R) -> Option<MoveClassification> {
    let draws: Vec<&MoveClassification> = candidates
        .iter()
        .filter(|c| c.outcome == Outcome::Draw)
        .collect();
    draws.choose(rng).map(|c| **c)
}

fn delayed_loss(candidates: &[MoveClassification]) -> Option<MoveClassification> {
    candidates
        .iter()
        .filter(|c| c.outcome == Outcome::Loss)
        .max_by_key(|c| c.distance)
        .copied()
}

fn long_loss(candidates: &[MoveClassification], at_least: u32) -> Option<MoveClassification> {
    candidates
        .iter()
        .filter(|c| c.outcome == Outcome::Loss && c.distance >= at_least)
        .max_by_key(|c| c.distance)
        .copied()
}

fn quickest_loss(candidates: &[MoveClassification]) -> Option<MoveClassification> {
    candidates
        .iter()
        .filter(|c| c.outcome == Outcome::Loss)
        .min_by_key(|c| c.distance)
        .copied()
}

/// 按难度从已分类的走法中挑出一步。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrengthPolicy {
    difficulty: AiDifficulty,
}

impl StrengthPolicy {
    pub fn new(difficulty: AiDifficulty) -> Self {
        Self { difficulty }
    }

    /// 没有候选时返回 `None`，由调用方视为终局。
    pub fn choose<R: Rng>(
        &self,
        candidates: &[MoveClassification],
        ctx: &PolicyContext<'_>,
        rng: &mut R,
    ) -> Option<MoveClassification> {
        if candidates.is_empty() {
            return None;
        }
        match self.difficulty {
            AiDifficulty::Hard => Self::hard(candidates, rng),
            AiDifficulty::Normal => Self::normal(candidates, rng),
            AiDifficulty::Weak => Self::weak(candidates, rng),
            AiDifficulty::Weakest => Self::weakest(candidates, ctx, rng),
        }
    }

    fn hard<R: Rng>(candidates: &[MoveClassification], rng: &mut R) -> Option<MoveClassification> {
        best_win(candidates)
            .or_else(|| any_draw(candidates, rng))
            .or_else(|| delayed_loss(candidates))
    }

    fn normal<R: Rng>(
        candidates: &[MoveClassification],
        rng: &mut R,
    ) -> Option<MoveClassification> {
        let roll: f64 = rng.gen();
        if let Some(win) = best_win(candidates) {
            if roll < 0.7 {
                Some(win)
            } else if roll < 0.9 {
                any_draw(candidates, rng)
                    .or_else(|| long_loss(candidates, NORMAL_LONG_LOSS))
                    .or(Some(win))
            } else {
                delayed_loss(candidates)
                    .or_else(|| any_draw(candidates, rng))
                    .or(Some(win))
            }
        } else if let Some(draw) = any_draw(candidates, rng) {
            if roll < 0.9 {
                Some(draw)
            } else {
                delayed_loss(candidates).or(Some(draw))
            }
        } else {
            delayed_loss(candidates)
        }
    }

    fn weak<R: Rng>(candidates: &[MoveClassification], rng: &mut R) -> Option<MoveClassification> {
        if rng.gen_bool(0.6) {
            return Self::hard(candidates, rng);
        }
        let slow_losses: Vec<&MoveClassification> = candidates
            .iter()
            .filter(|c| c.outcome == Outcome::Loss && c.distance >= WEAK_SLOW_LOSS)
            .collect();
        match slow_losses.choose(rng) {
            Some(choice) => Some(**choice),
            None => Self::hard(candidates, rng),
        }
    }

    /// 主动让对手赢。优先级依次为：
    /// 1. 对手的每一种应着都让我方必败；
    /// 2. 不直接吃掉对手，且对手有一步立即获胜的应着；
    /// 3. 残局库里对手视角为胜、距离最短的走法；
    /// 4. 一般兜底：最快的败着，其次和棋，最后最好的胜着。
    fn weakest<R: Rng>(
        candidates: &[MoveClassification],
        ctx: &PolicyContext<'_>,
        rng: &mut R,
    ) -> Option<MoveClassification> {
        let opponent = ctx.actor.opponent();

        let forced: Vec<&MoveClassification> = candidates
            .iter()
            .filter(|c| {
                let child = simulate_move(ctx.state, &c.action);
                if check_terminal(&child).is_terminal {
                    return false;
                }
                let replies = generate_moves(&child, opponent);
                !replies.is_empty()
                    && replies.iter().all(|reply| {
                        let grandchild = simulate_move(&child, reply);
                        ctx.classifier.entry(&grandchild, ctx.actor).0.outcome == Outcome::Loss
                    })
            })
            .collect();
        if let Some(choice) = forced.iter().min_by_key(|c| c.distance) {
            debug!(action = ?choice.action, "weakest: every reply loses for us");
            return Some(**choice);
        }

        let enabling: Vec<&MoveClassification> = candidates
            .iter()
            .filter(|c| {
                let child = simulate_move(ctx.state, &c.action);
                !check_terminal(&child).is_terminal
                    && generate_moves(&child, opponent).iter().any(|reply| {
                        check_terminal(&simulate_move(&child, reply)).loser_side == Some(ctx.actor)
                    })
            })
            .collect();
        if let Some(choice) = enabling.choose(rng) {
            debug!(action = ?choice.action, "weakest: opponent can win immediately");
            return Some(**choice);
        }

        if let Some(table) = ctx.classifier.table() {
            let gifted = candidates
                .iter()
                .filter_map(|c| {
                    let child = simulate_move(ctx.state, &c.action);
                    table
                        .lookup_state(&child, opponent)
                        .filter(|entry| entry.outcome == Outcome::Win)
                        .map(|entry| (entry.distance, *c))
                })
                .min_by_key(|(distance, _)| *distance);
            if let Some((_, choice)) = gifted {
                return Some(choice);
            }
        }

        quickest_loss(candidates)
            .or_else(|| any_draw(candidates, rng))
            .or_else(|| best_win(candidates))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiDecision {
    #[serde(rename = "move", skip_serializing_if = "Option::is_none")]
    pub action: Option<Move>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<MoveClassification>,
    pub source: ClassificationSource,
    pub difficulty: AiDifficulty,
    pub candidates: usize,
    pub game_over: bool,
}

impl AiDecision {
    fn game_over(difficulty: AiDifficulty) -> Self {
        Self {
            action: None,
            classification: None,
            source: ClassificationSource::None,
            difficulty,
            candidates: 0,
            game_over: true,
        }
    }
}

pub struct AiAgent {
    config: AiConfig,
    engine: SearchEngine,
    rng: SmallRng,
}

impl AiAgent {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            engine: SearchEngine::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn with_seed(config: AiConfig, seed: u64) -> Self {
        Self {
            config,
            engine: SearchEngine::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    /// 为 `side` 选一步棋；残局库缺失时退回搜索。
    pub fn decide(&mut self, state: &State, side: Side, table: Option<&Tablebase>) -> AiDecision {
        let difficulty = self.config.difficulty;
        if check_terminal(state).is_terminal {
            return AiDecision::game_over(difficulty);
        }

        if table.is_none()
            && self.config.forced_win_depth > 0
            && matches!(difficulty, AiDifficulty::Hard | AiDifficulty::Normal)
        {
            let quick = self.engine.search(state, side, self.config.forced_win_depth);
            if let (true, Some(action)) = (quick.is_forced_win(), quick.best_move) {
                debug!(distance = quick.distance, "forced win found before full policy");
                return AiDecision {
                    action: Some(action),
                    classification: Some(MoveClassification {
                        action,
                        outcome: Outcome::Win,
                        distance: quick.distance.saturating_sub(1),
                    }),
                    source: ClassificationSource::ForcedWin,
                    difficulty,
                    candidates: generate_moves(state, side).len(),
                    game_over: false,
                };
            }
        }

        let classifier = Classifier::new(table, &self.engine, self.config.search_depth);
        let (candidates, source) = classifier.classify_moves(state, side);
        let ctx = PolicyContext {
            state,
            actor: side,
            classifier: &classifier,
        };
        let policy = StrengthPolicy::new(difficulty);
        let Some(choice) = policy.choose(&candidates, &ctx, &mut self.rng) else {
            debug!(?state, %side, "no legal moves; signalling game over");
            return AiDecision::game_over(difficulty);
        };

        AiDecision {
            action: Some(choice.action),
            classification: Some(choice),
            source,
            difficulty,
            candidates: candidates.len(),
            game_over: false,
        }
    }

    /// 驱动一次完整的 AI 回合：读取当前局面、分类、挑选走法；由调用方负责动画与提交。
    pub fn ai_turn<F>(
        &mut self,
        current_state: F,
        side: Side,
        table: Option<&Tablebase>,
    ) -> AiDecision
    where
        F: FnOnce() -> State,
    {
        let state = current_state();
        self.decide(&state, side, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static TABLE: Lazy<Tablebase> = Lazy::new(Tablebase::build);

    fn split(left: u8, right: u8) -> Move {
        Move::Split {
            owner: Side::Ai,
            left,
            right,
        }
    }

    fn classified(action: Move, outcome: Outcome, distance: u32) -> MoveClassification {
        MoveClassification {
            action,
            outcome,
            distance,
        }
    }

    fn mixed_candidates() -> Vec<MoveClassification> {
        vec![
            classified(split(0, 2), Outcome::Loss, 3),
            classified(split(2, 0), Outcome::Loss, 12),
            classified(split(1, 1), Outcome::Win, 6),
            classified(split(1, 1), Outcome::Win, 2),
            classified(split(0, 2), Outcome::Draw, 0),
        ]
    }

    fn with_context<T>(f: impl FnOnce(&PolicyContext<'_>) -> T) -> T {
        let engine = SearchEngine::new();
        let classifier = Classifier::new(Some(&TABLE), &engine, 6);
        let state = State::new([1, 1], [2, 0]);
        let ctx = PolicyContext {
            state: &state,
            actor: Side::Ai,
            classifier: &classifier,
        };
        f(&ctx)
    }

    #[test]
    fn hard_prefers_fastest_win_then_draw_then_slowest_loss() {
        let mut rng = SmallRng::seed_from_u64(7);
        with_context(|ctx| {
            let policy = StrengthPolicy::new(AiDifficulty::Hard);
            let candidates = mixed_candidates();
            let choice = policy.choose(&candidates, ctx, &mut rng).expect("a move");
            assert_eq!((choice.outcome, choice.distance), (Outcome::Win, 2));

            let no_wins: Vec<_> = candidates
                .iter()
                .copied()
                .filter(|c| c.outcome != Outcome::Win)
                .collect();
            let choice = policy.choose(&no_wins, ctx, &mut rng).expect("a move");
            assert_eq!(choice.outcome, Outcome::Draw);

            let losses: Vec<_> = no_wins
                .iter()
                .copied()
                .filter(|c| c.outcome == Outcome::Loss)
                .collect();
            let choice = policy.choose(&losses, ctx, &mut rng).expect("a move");
            assert_eq!(choice.distance, 12);
        });
    }

    #[test]
    fn normal_mostly_wins_but_sometimes_relents() {
        let mut rng = SmallRng::seed_from_u64(11);
        with_context(|ctx| {
            let policy = StrengthPolicy::new(AiDifficulty::Normal);
            let candidates = mixed_candidates();
            let mut wins = 0;
            let mut others = 0;
            for _ in 0..1000 {
                let choice = policy.choose(&candidates, ctx, &mut rng).expect("a move");
                if choice.outcome == Outcome::Win {
                    assert_eq!(choice.distance, 2);
                    wins += 1;
                } else {
                    others += 1;
                }
            }
            assert!(wins > 600 && wins < 800, "wins = {wins}");
            assert!(others > 200, "others = {others}");
        });
    }

    #[test]
    fn normal_with_only_losses_delays() {
        let mut rng = SmallRng::seed_from_u64(3);
        with_context(|ctx| {
            let policy = StrengthPolicy::new(AiDifficulty::Normal);
            let losses = vec![
                classified(split(0, 2), Outcome::Loss, 1),
                classified(split(2, 0), Outcome::Loss, 9),
            ];
            for _ in 0..50 {
                let choice = policy.choose(&losses, ctx, &mut rng).expect("a move");
                assert_eq!(choice.distance, 9);
            }
        });
    }

    #[test]
    fn weak_sometimes_picks_slow_losses() {
        let mut rng = SmallRng::seed_from_u64(5);
        with_context(|ctx| {
            let policy = StrengthPolicy::new(AiDifficulty::Weak);
            let candidates = mixed_candidates();
            let mut slow_losses = 0;
            for _ in 0..1000 {
                let choice = policy.choose(&candidates, ctx, &mut rng).expect("a move");
                if choice.outcome == Outcome::Loss {
                    assert!(choice.distance >= WEAK_SLOW_LOSS);
                    slow_losses += 1;
                }
            }
            assert!(slow_losses > 300 && slow_losses < 500, "slow = {slow_losses}");
        });
    }

    #[test]
    fn empty_candidates_signal_game_over() {
        let mut rng = SmallRng::seed_from_u64(1);
        with_context(|ctx| {
            for difficulty in [
                AiDifficulty::Weakest,
                AiDifficulty::Weak,
                AiDifficulty::Normal,
                AiDifficulty::Hard,
            ] {
                assert!(StrengthPolicy::new(difficulty)
                    .choose(&[], ctx, &mut rng)
                    .is_none());
            }
        });
    }

    #[test]
    fn weakest_hands_the_opponent_an_immediate_win() {
        // AI [1,0] against player [1,4]: any AI move leaves a hand the player can finish.
        let state = State::new([1, 4], [1, 0]);
        let mut agent = AiAgent::with_seed(AiConfig::from_difficulty(AiDifficulty::Weakest), 9);
        let decision = agent.decide(&state, Side::Ai, Some(&TABLE));
        let action = decision.action.expect("weakest still moves");

        let child = simulate_move(&state, &action);
        assert!(!check_terminal(&child).is_terminal, "must not kill the player");
        let player_wins = generate_moves(&child, Side::Player)
            .iter()
            .any(|reply| {
                check_terminal(&simulate_move(&child, reply)).loser_side == Some(Side::Ai)
            });
        let forced = generate_moves(&child, Side::Player).iter().all(|reply| {
            TABLE
                .lookup_state(&simulate_move(&child, reply), Side::Ai)
                .map(|entry| entry.outcome == Outcome::Loss)
                .unwrap_or(false)
        });
        assert!(player_wins || forced);
    }

    fn table_with(edit: impl FnOnce(&mut serde_json::Map<String, serde_json::Value>)) -> Tablebase {
        let mut value = serde_json::to_value(&*TABLE).expect("table serializes");
        edit(value.as_object_mut().expect("table is a JSON object"));
        serde_json::from_value(value).expect("edited table deserializes")
    }

    fn every_reply_loses(state: &State, actor: Side, action: &Move) -> bool {
        let child = simulate_move(state, action);
        if check_terminal(&child).is_terminal {
            return false;
        }
        let replies = generate_moves(&child, actor.opponent());
        !replies.is_empty()
            && replies.iter().all(|reply| {
                TABLE
                    .lookup_state(&simulate_move(&child, reply), actor)
                    .map(|entry| entry.outcome == Outcome::Loss)
                    .unwrap_or(false)
            })
    }

    fn opens_an_immediate_win(state: &State, actor: Side, action: &Move) -> bool {
        let child = simulate_move(state, action);
        !check_terminal(&child).is_terminal
            && generate_moves(&child, actor.opponent())
                .iter()
                .any(|reply| {
                    check_terminal(&simulate_move(&child, reply)).loser_side == Some(actor)
                })
    }

    #[test]
    fn weakest_follows_its_precedence_across_the_table() {
        let engine = SearchEngine::new();
        let classifier = Classifier::new(Some(&TABLE), &engine, 6);
        let policy = StrengthPolicy::new(AiDifficulty::Weakest);
        let mut rng = SmallRng::seed_from_u64(17);
        let mut reached = [0usize; 4];

        for (key, _) in TABLE.iter() {
            let state = key.state();
            let actor = key.turn();
            if check_terminal(&state).is_terminal {
                continue;
            }
            let (candidates, _) = classifier.classify_moves(&state, actor);
            let ctx = PolicyContext {
                state: &state,
                actor,
                classifier: &classifier,
            };
            let choice = policy.choose(&candidates, &ctx, &mut rng).expect("a move");

            let forced: Vec<u32> = candidates
                .iter()
                .filter(|c| every_reply_loses(&state, actor, &c.action))
                .map(|c| c.distance)
                .collect();
            let quickest_loss = candidates
                .iter()
                .filter(|c| c.outcome == Outcome::Loss)
                .map(|c| c.distance)
                .min();

            if let Some(&fastest) = forced.iter().min() {
                assert!(every_reply_loses(&state, actor, &choice.action), "at {key}");
                assert_eq!(choice.distance, fastest, "at {key}");
                reached[0] += 1;
            } else if candidates
                .iter()
                .any(|c| opens_an_immediate_win(&state, actor, &c.action))
            {
                assert!(opens_an_immediate_win(&state, actor, &choice.action), "at {key}");
                reached[1] += 1;
            } else if let Some(distance) = quickest_loss {
                assert_eq!(
                    (choice.outcome, choice.distance),
                    (Outcome::Loss, distance),
                    "at {key}"
                );
                reached[2] += 1;
            } else {
                let expected = if candidates.iter().any(|c| c.outcome == Outcome::Draw) {
                    Outcome::Draw
                } else {
                    Outcome::Win
                };
                assert_eq!(choice.outcome, expected, "at {key}");
                reached[3] += 1;
            }
        }

        assert!(reached.iter().all(|&count| count > 0), "steps reached: {reached:?}");
    }

    #[test]
    fn weakest_prefers_a_forced_loss_over_an_immediate_one() {
        // 打玩家的 1 留下玩家 4 吃掉 AI 的机会；打 4 之后玩家只剩一种应着。
        let state = State::new([1, 4], [1, 0]);
        let mut agent = AiAgent::with_seed(AiConfig::from_difficulty(AiDifficulty::Weakest), 3);

        let action = agent
            .decide(&state, Side::Ai, Some(&TABLE))
            .action
            .expect("weakest still moves");
        assert_eq!(simulate_move(&state, &action), State::new([2, 4], [1, 0]));

        // 让那唯一的应着在表里对 AI 必败，打 4 就成了对手每种应着都赢的走法。
        let table = table_with(|entries| {
            entries.insert(
                "0,1|0,2|ai".to_string(),
                serde_json::json!({ "outcome": "LOSS", "distance": 4 }),
            );
        });
        let action = agent
            .decide(&state, Side::Ai, Some(&table))
            .action
            .expect("weakest still moves");
        assert_eq!(simulate_move(&state, &action), State::new([1, 0], [1, 0]));
    }

    #[test]
    fn weakest_gifts_only_losses_the_table_confirms() {
        let state = State::new([1, 4], [1, 4]);
        let mut agent = AiAgent::with_seed(AiConfig::from_difficulty(AiDifficulty::Weakest), 5);
        let child_key = |action: Move| {
            simulate_move(&state, &action)
                .canonical_key(Side::Player)
                .to_string()
        };

        let action = agent
            .decide(&state, Side::Ai, Some(&TABLE))
            .action
            .expect("weakest still moves");
        assert_eq!(child_key(action), "0,1|1,4|player");

        let table = table_with(|entries| {
            entries.remove("0,1|1,4|player");
        });
        let action = agent
            .decide(&state, Side::Ai, Some(&table))
            .action
            .expect("weakest still moves");
        assert_eq!(child_key(action), "1,3|1,4|player");
    }

    #[test]
    fn normal_without_wins_mostly_draws() {
        let mut rng = SmallRng::seed_from_u64(23);
        with_context(|ctx| {
            let policy = StrengthPolicy::new(AiDifficulty::Normal);
            let candidates = vec![
                classified(split(0, 2), Outcome::Draw, 0),
                classified(split(2, 0), Outcome::Loss, 3),
                classified(split(1, 1), Outcome::Loss, 12),
            ];
            let mut draws = 0;
            for _ in 0..1000 {
                let choice = policy.choose(&candidates, ctx, &mut rng).expect("a move");
                match choice.outcome {
                    Outcome::Draw => draws += 1,
                    outcome => assert_eq!((outcome, choice.distance), (Outcome::Loss, 12)),
                }
            }
            assert!(draws > 850 && draws < 950, "draws = {draws}");
        });
    }

    #[test]
    fn weak_without_slow_losses_plays_like_hard() {
        let mut rng = SmallRng::seed_from_u64(29);
        with_context(|ctx| {
            let weak = StrengthPolicy::new(AiDifficulty::Weak);
            let with_wins = vec![
                classified(split(0, 2), Outcome::Loss, 3),
                classified(split(1, 1), Outcome::Win, 6),
                classified(split(1, 1), Outcome::Win, 2),
                classified(split(2, 0), Outcome::Draw, 0),
            ];
            let quick_losses = vec![
                classified(split(0, 2), Outcome::Loss, 1),
                classified(split(2, 0), Outcome::Loss, 3),
            ];
            for _ in 0..500 {
                let choice = weak.choose(&with_wins, ctx, &mut rng).expect("a move");
                assert_eq!((choice.outcome, choice.distance), (Outcome::Win, 2));
                let choice = weak.choose(&quick_losses, ctx, &mut rng).expect("a move");
                assert_eq!((choice.outcome, choice.distance), (Outcome::Loss, 3));
            }
        });
    }

    #[test]
    fn hard_agent_plays_the_table_optimum() {
        let mut agent = AiAgent::with_seed(AiConfig::from_difficulty(AiDifficulty::Hard), 42);
        for (key, entry) in TABLE.iter() {
            let state = key.state();
            if check_terminal(&state).is_terminal || entry.outcome != Outcome::Win {
                continue;
            }
            let decision = agent.decide(&state, key.turn(), Some(&TABLE));
            assert_eq!(decision.source, ClassificationSource::Tablebase);
            let choice = decision.classification.expect("a classified move");
            assert_eq!(choice.outcome, Outcome::Win, "at {key}");
            assert_eq!(choice.distance + 1, entry.distance, "at {key}");
        }
    }

    #[test]
    fn search_fallback_finds_forced_win_without_table() {
        let mut agent = AiAgent::with_seed(AiConfig::from_difficulty(AiDifficulty::Hard), 1);
        let decision = agent.ai_turn(|| State::new([4, 0], [1, 0]), Side::Ai, None);
        assert_eq!(decision.source, ClassificationSource::ForcedWin);
        let action = decision.action.expect("a winning move");
        let after = simulate_move(&State::new([4, 0], [1, 0]), &action);
        assert_eq!(check_terminal(&after).loser_side, Some(Side::Player));
    }

    #[test]
    fn finished_game_yields_no_move() {
        let mut agent = AiAgent::with_seed(AiConfig::default(), 1);
        let decision = agent.decide(&State::new([0, 0], [1, 1]), Side::Ai, None);
        assert!(decision.game_over);
        assert!(decision.action.is_none());
    }

    #[test]
    fn difficulty_parses_aliases() {
        assert_eq!("Expert".parse::<AiDifficulty>(), Ok(AiDifficulty::Hard));
        assert_eq!("easy".parse::<AiDifficulty>(), Ok(AiDifficulty::Weak));
        assert_eq!("weakest".parse::<AiDifficulty>(), Ok(AiDifficulty::Weakest));
        assert!("impossible".parse::<AiDifficulty>().is_err());
    }
}
