//! 残局库：用逆向分析（retrograde analysis）对全部局面做精确的胜/负/和分类。
//!
//! 从终局出发，逐层向前推导前驱局面：
//! - 只要有一步能走到"对手必败"的局面，走子方必胜，距离为对手局面距离 + 1；
//! - 所有走法都走到"对手必胜"的局面时，走子方必败，距离取最晚的那一个 + 1；
//! - 推导结束后仍未分类的局面只存在于循环之中，记为和棋。
//!
//! 队列按距离先进先出，因此胜局拿到的是最短距离，败局拿到的是最长距离。

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::game::{
    check_terminal, split_options, successors, CanonicalKey, Side, State, Terminal,
    HAND_MODULUS,
};

/// 站在键中轮到走子一方的角度给出的结果。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

impl Outcome {
    /// 换到对手视角。
    pub fn invert(self) -> Outcome {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TablebaseEntry {
    pub outcome: Outcome,
    pub distance: u32,
}

impl TablebaseEntry {
    pub const fn new(outcome: Outcome, distance: u32) -> Self {
        Self { outcome, distance }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TablebaseSummary {
    pub wins: usize,
    pub losses: usize,
    pub draws: usize,
    pub max_distance: u32,
}

/// 违反逆向归纳不变量的条目。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{key}: no entry for successor {successor}")]
    MissingSuccessor {
        key: CanonicalKey,
        successor: CanonicalKey,
    },
    #[error("{key}: WIN at distance {distance} has no LOSS reply at distance {expected}")]
    WinWithoutLosingReply {
        key: CanonicalKey,
        distance: u32,
        expected: u32,
    },
    #[error("{key}: LOSS has a successor that is not a WIN for the opponent")]
    LossWithEscape { key: CanonicalKey },
    #[error("{key}: LOSS at distance {distance} but slowest reply is {slowest}")]
    LossDistanceMismatch {
        key: CanonicalKey,
        distance: u32,
        slowest: u32,
    },
    #[error("{key}: DRAW has a move into a LOSS for the opponent")]
    DrawWithWinningMove { key: CanonicalKey },
    #[error("{key}: DRAW where every move loses")]
    DrawWithoutEscape { key: CanonicalKey },
    #[error("{key}: terminal entry carries distance {distance}")]
    TerminalDistance { key: CanonicalKey, distance: u32 },
}

/// 键到结果的完整映射；构建完成后只读。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Tablebase {
    entries: BTreeMap<CanonicalKey, TablebaseEntry>,
}

impl Tablebase {
    pub fn build() -> Self {
        TablebaseBuilder::new().build()
    }

    pub fn lookup(&self, key: &CanonicalKey) -> Option<TablebaseEntry> {
        self.entries.get(key).copied()
    }

    pub fn lookup_state(&self, state: &State, turn: Side) -> Option<TablebaseEntry> {
        self.lookup(&state.canonical_key(turn))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalKey, &TablebaseEntry)> {
        self.entries.iter()
    }

    pub fn summary(&self) -> TablebaseSummary {
        self.entries
            .values()
            .fold(TablebaseSummary::default(), |mut summary, entry| {
                match entry.outcome {
                    Outcome::Win => summary.wins += 1,
                    Outcome::Loss => summary.losses += 1,
                    Outcome::Draw => summary.draws += 1,
                }
                summary.max_distance = summary.max_distance.max(entry.distance);
                summary
            })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// 逐条检查逆向归纳不变量，返回全部违例（空表示通过）。
    pub fn verify(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for (&key, &entry) in &self.entries {
            let state = key.state();
            if check_terminal(&state).is_terminal {
                if entry.distance != 0 {
                    violations.push(InvariantViolation::TerminalDistance {
                        key,
                        distance: entry.distance,
                    });
                }
                continue;
            }

            let mut replies = Vec::new();
            for successor in successor_keys(&key) {
                match self.lookup(&successor) {
                    Some(reply) => replies.push(reply),
                    None => violations.push(InvariantViolation::MissingSuccessor {
                        key,
                        successor,
                    }),
                }
            }

            match entry.outcome {
                Outcome::Win => {
                    let expected = entry.distance.saturating_sub(1);
                    let proven = entry.distance > 0
                        && replies.iter().any(|reply| {
                            reply.outcome == Outcome::Loss && reply.distance == expected
                        });
                    if !proven {
                        violations.push(InvariantViolation::WinWithoutLosingReply {
                            key,
                            distance: entry.distance,
                            expected,
                        });
                    }
                }
                Outcome::Loss => {
                    if replies.iter().any(|reply| reply.outcome != Outcome::Win) {
                        violations.push(InvariantViolation::LossWithEscape { key });
                        continue;
                    }
                    let slowest = replies.iter().map(|reply| reply.distance).max().unwrap_or(0);
                    if entry.distance != slowest + 1 {
                        violations.push(InvariantViolation::LossDistanceMismatch {
                            key,
                            distance: entry.distance,
                            slowest,
                        });
                    }
                }
                Outcome::Draw => {
                    if replies.iter().any(|reply| reply.outcome == Outcome::Loss) {
                        violations.push(InvariantViolation::DrawWithWinningMove { key });
                    } else if replies.iter().all(|reply| reply.outcome == Outcome::Win) {
                        violations.push(InvariantViolation::DrawWithoutEscape { key });
                    }
                }
            }
        }

        violations
    }
}

/// 所有（代表局面, 回合）组合：每方的手都已升序。
pub fn canonical_keys() -> impl Iterator<Item = CanonicalKey> {
    State::all()
        .filter(|state| *state == state.canonical())
        .flat_map(|state| Side::ALL.map(|turn| state.canonical_key(turn)))
}

/// 从 `key` 出发一步可达的不同局面（轮到对手）。
pub fn successor_keys(key: &CanonicalKey) -> BTreeSet<CanonicalKey> {
    let state = key.state();
    let mover = key.turn();
    successors(&state, mover)
        .into_iter()
        .map(|(_, child)| child.canonical_key(mover.opponent()))
        .collect()
}

/// 逆向走法：所有一步之后能到达 `key` 的非终局前驱。
///
/// - 反攻击：攻击方的手不变，被攻击的手满足 `target = (prior + source) mod 5`，且 `prior > 0`；
/// - 反分配：走子方换成总和相同、但无序对不同的任意分配。
pub fn predecessor_keys(key: &CanonicalKey) -> BTreeSet<CanonicalKey> {
    let child = key.state();
    let defender = key.turn();
    let mover = defender.opponent();
    let mut found = BTreeSet::new();

    let sources = child.hands(mover);
    let targets = child.hands(defender);
    for &source in sources.iter().filter(|&&hand| hand > 0) {
        for (index, &target) in targets.iter().enumerate() {
            let prior = (target + HAND_MODULUS - source % HAND_MODULUS) % HAND_MODULUS;
            if prior == 0 {
                continue;
            }
            let mut hands = targets;
            hands[index] = prior;
            found.insert(child.with_hands(defender, hands));
        }
    }

    for (left, right) in split_options(sources) {
        found.insert(child.with_hands(mover, [left, right]));
    }

    found
        .into_iter()
        .filter(|state| !check_terminal(state).is_terminal)
        .map(|state| state.canonical_key(mover))
        .collect()
}

/// 终局的种子分类：走子方阵亡为负；对手阵亡为胜；双方同时阵亡为和。
fn terminal_entry(terminal: Terminal, turn: Side) -> TablebaseEntry {
    match terminal.loser_side {
        Some(loser) if loser == turn => TablebaseEntry::new(Outcome::Loss, 0),
        Some(_) => TablebaseEntry::new(Outcome::Win, 0),
        None => TablebaseEntry::new(Outcome::Draw, 0),
    }
}

pub struct TablebaseBuilder {
    entries: HashMap<CanonicalKey, TablebaseEntry>,
    /// 尚未证明为"对手胜"的后继数量。
    open_replies: HashMap<CanonicalKey, usize>,
    frontier: VecDeque<CanonicalKey>,
}

impl TablebaseBuilder {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            open_replies: HashMap::new(),
            frontier: VecDeque::new(),
        }
    }

    pub fn build(mut self) -> Tablebase {
        let keys: Vec<CanonicalKey> = canonical_keys().collect();
        self.seed(&keys);
        debug!(seeds = self.frontier.len(), "tablebase seeded");

        while let Some(key) = self.frontier.pop_front() {
            let Some(entry) = self.entries.get(&key).copied() else {
                continue;
            };
            for predecessor in predecessor_keys(&key) {
                if self.entries.contains_key(&predecessor) {
                    continue;
                }
                match entry.outcome {
                    Outcome::Loss => {
                        self.classify(predecessor, Outcome::Win, entry.distance + 1);
                    }
                    Outcome::Win => {
                        let Some(open) = self.open_replies.get_mut(&predecessor) else {
                            continue;
                        };
                        *open = open.saturating_sub(1);
                        if *open == 0 {
                            self.classify(predecessor, Outcome::Loss, entry.distance + 1);
                        }
                    }
                    Outcome::Draw => {}
                }
            }
        }

        for key in keys {
            self.entries
                .entry(key)
                .or_insert(TablebaseEntry::new(Outcome::Draw, 0));
        }

        let table = Tablebase {
            entries: self.entries.into_iter().collect(),
        };
        let summary = table.summary();
        info!(
            entries = table.len(),
            wins = summary.wins,
            losses = summary.losses,
            draws = summary.draws,
            max_distance = summary.max_distance,
            "tablebase built"
        );
        table
    }

    fn seed(&mut self, keys: &[CanonicalKey]) {
        for &key in keys {
            let terminal = check_terminal(&key.state());
            if terminal.is_terminal {
                let entry = terminal_entry(terminal, key.turn());
                self.entries.insert(key, entry);
                if entry.outcome != Outcome::Draw {
                    self.frontier.push_back(key);
                }
            } else {
                self.open_replies.insert(key, successor_keys(&key).len());
            }
        }
    }

    fn classify(&mut self, key: CanonicalKey, outcome: Outcome, distance: u32) {
        self.entries.insert(key, TablebaseEntry::new(outcome, distance));
        self.frontier.push_back(key);
    }
}

impl Default for TablebaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
