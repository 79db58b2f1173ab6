//! 游戏核心逻辑模块（局面、走法与终局判定）。

pub mod rules;
pub mod state;

pub use rules::{
    check_terminal,
    generate_moves,
    simulate_move,
    split_options,
    successors,
    validate_move,
    Move,
    RuleError,
    Terminal,
};
pub use state::{
    CanonicalKey,
    GameSession,
    Hand,
    HistoryRecord,
    KeyParseError,
    Side,
    State,
    HAND_MODULUS,
    MAX_HAND,
};
