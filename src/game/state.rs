use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::rules::{self, Move, RuleError, Terminal};

/// 单只手的点数，0 表示这只手已经"阵亡"。
pub type Hand = u8;

pub const MAX_HAND: Hand = 4;
pub const HAND_MODULUS: Hand = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Player,
    Ai,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Player, Side::Ai];

    pub fn opponent(self) -> Side {
        match self {
            Side::Player => Side::Ai,
            Side::Ai => Side::Player,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Player => "player",
            Side::Ai => "ai",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "player" | "human" => Ok(Side::Player),
            "ai" | "computer" | "cpu" => Ok(Side::Ai),
            _ => Err(()),
        }
    }
}

/// 局面：双方各两只手的点数。轮到谁走不属于局面本身。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub player_hands: [Hand; 2],
    pub ai_hands: [Hand; 2],
}

impl State {
    pub const fn new(player_hands: [Hand; 2], ai_hands: [Hand; 2]) -> Self {
        Self {
            player_hands,
            ai_hands,
        }
    }

    pub const fn initial() -> Self {
        Self::new([1, 1], [1, 1])
    }

    pub fn hands(&self, side: Side) -> [Hand; 2] {
        match side {
            Side::Player => self.player_hands,
            Side::Ai => self.ai_hands,
        }
    }

    pub fn hands_mut(&mut self, side: Side) -> &mut [Hand; 2] {
        match side {
            Side::Player => &mut self.player_hands,
            Side::Ai => &mut self.ai_hands,
        }
    }

    pub fn with_hands(mut self, side: Side, hands: [Hand; 2]) -> Self {
        *self.hands_mut(side) = hands;
        self
    }

    pub fn is_well_formed(&self) -> bool {
        self.player_hands
            .iter()
            .chain(self.ai_hands.iter())
            .all(|&hand| hand <= MAX_HAND)
    }

    pub fn alive_count(&self, side: Side) -> u8 {
        self.hands(side).iter().filter(|&&hand| hand > 0).count() as u8
    }

    pub fn total(&self, side: Side) -> u8 {
        self.hands(side).iter().sum()
    }

    pub fn is_dead(&self, side: Side) -> bool {
        self.hands(side) == [0, 0]
    }

    /// 每一方的两只手按升序排列后的代表局面。
    pub fn canonical(&self) -> State {
        State::new(sorted(self.player_hands), sorted(self.ai_hands))
    }

    pub fn canonical_key(&self, turn: Side) -> CanonicalKey {
        CanonicalKey::new(self, turn)
    }

    /// 枚举 [0,4]^4 中的全部局面（未归一化）。
    pub fn all() -> impl Iterator<Item = State> {
        (0..=MAX_HAND).flat_map(|p0| {
            (0..=MAX_HAND).flat_map(move |p1| {
                (0..=MAX_HAND).flat_map(move |a0| {
                    (0..=MAX_HAND).map(move |a1| State::new([p0, p1], [a0, a1]))
                })
            })
        })
    }
}

impl Default for State {
    fn default() -> Self {
        Self::initial()
    }
}

fn sorted(hands: [Hand; 2]) -> [Hand; 2] {
    if hands[0] <= hands[1] {
        hands
    } else {
        [hands[1], hands[0]]
    }
}

/// 查表用的键：双方手按升序排列，加上轮到的一方。
/// 文本形式为 `"h1,h2|h3,h4|turn"`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey {
    player: [Hand; 2],
    ai: [Hand; 2],
    turn: Side,
}

impl CanonicalKey {
    pub fn new(state: &State, turn: Side) -> Self {
        let canonical = state.canonical();
        Self {
            player: canonical.player_hands,
            ai: canonical.ai_hands,
            turn,
        }
    }

    pub fn state(&self) -> State {
        State::new(self.player, self.ai)
    }

    pub fn turn(&self) -> Side {
        self.turn
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}|{},{}|{}",
            self.player[0], self.player[1], self.ai[0], self.ai[1], self.turn
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tablebase key `{0}`")]
pub struct KeyParseError(pub String);

impl FromStr for CanonicalKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KeyParseError(s.to_string());
        let mut parts = s.split('|');
        let player = parse_pair(parts.next().ok_or_else(invalid)?).ok_or_else(invalid)?;
        let ai = parse_pair(parts.next().ok_or_else(invalid)?).ok_or_else(invalid)?;
        let turn = Side::from_str(parts.next().ok_or_else(invalid)?).map_err(|_| invalid())?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(CanonicalKey::new(&State::new(player, ai), turn))
    }
}

fn parse_pair(text: &str) -> Option<[Hand; 2]> {
    let (left, right) = text.split_once(',')?;
    let left: Hand = left.trim().parse().ok()?;
    let right: Hand = right.trim().parse().ok()?;
    (left <= MAX_HAND && right <= MAX_HAND).then_some([left, right])
}

impl Serialize for CanonicalKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CanonicalKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub side: Side,
    #[serde(rename = "move")]
    pub action: Move,
    pub before: State,
    pub after: State,
}

/// 一局游戏：当前局面、轮到的一方以及只追加的走子历史。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    state: State,
    turn: Side,
    #[serde(default)]
    history: Vec<HistoryRecord>,
}

impl GameSession {
    pub fn new(first: Side) -> Self {
        Self::from_state(State::initial(), first)
    }

    pub fn from_state(state: State, turn: Side) -> Self {
        Self {
            state,
            turn,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn turn(&self) -> Side {
        self.turn
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    pub fn apply_attack(
        &mut self,
        side: Side,
        from_index: usize,
        other_side: Side,
        to_index: usize,
    ) -> Result<Terminal, RuleError> {
        self.apply_move(
            side,
            Move::Attack {
                from_owner: side,
                from_index,
                to_owner: other_side,
                to_index,
            },
        )
    }

    pub fn apply_split(
        &mut self,
        side: Side,
        left: Hand,
        right: Hand,
    ) -> Result<Terminal, RuleError> {
        self.apply_move(
            side,
            Move::Split {
                owner: side,
                left,
                right,
            },
        )
    }

    /// 校验并提交一步棋，随后把回合交给对方。整个过程要么完整生效，要么不改动会话。
    pub fn apply_move(&mut self, side: Side, action: Move) -> Result<Terminal, RuleError> {
        if self.check_win().is_terminal {
            return Err(RuleError::GameFinished);
        }
        if side != self.turn {
            return Err(RuleError::NotPlayerTurn {
                expected: self.turn,
                actual: side,
            });
        }
        rules::validate_move(&self.state, side, &action)?;

        let before = self.state;
        let after = rules::simulate_move(&before, &action);
        self.history.push(HistoryRecord {
            side,
            action,
            before,
            after,
        });
        self.state = after;
        self.switch_turn_to(side.opponent());
        Ok(self.check_win())
    }

    pub fn switch_turn_to(&mut self, side: Side) {
        self.turn = side;
    }

    pub fn check_win(&self) -> Terminal {
        rules::check_terminal(&self.state)
    }

    pub fn undo(&mut self) -> Option<HistoryRecord> {
        let record = self.history.pop()?;
        self.state = record.before;
        self.turn = record.side;
        Some(record)
    }
}
