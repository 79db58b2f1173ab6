use serde::{Deserialize, Serialize};
use tracing::warn;

use super::state::{Hand, Side, State, HAND_MODULUS, MAX_HAND};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Move {
    #[serde(rename_all = "camelCase")]
    Attack {
        from_owner: Side,
        from_index: usize,
        to_owner: Side,
        to_index: usize,
    },
    Split {
        owner: Side,
        left: Hand,
        right: Hand,
    },
}

impl Move {
    pub fn actor(&self) -> Side {
        match *self {
            Move::Attack { from_owner, .. } => from_owner,
            Move::Split { owner, .. } => owner,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RuleError {
    GameFinished,
    NotPlayerTurn {
        expected: Side,
        actual: Side,
    },
    MalformedState,
    WrongOwner {
        expected: Side,
        actual: Side,
    },
    HandIndexOutOfRange {
        index: usize,
    },
    DeadSourceHand {
        index: usize,
    },
    DeadTargetHand {
        index: usize,
    },
    SplitOutOfRange {
        left: Hand,
        right: Hand,
    },
    SplitTotalMismatch {
        expected: u8,
        actual: u8,
    },
    NoOpSplit,
}

/// 终局判定结果。双方同时为 (0,0) 时视为终局但没有输家。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Terminal {
    pub is_terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_side: Option<Side>,
}

impl Terminal {
    pub const ONGOING: Terminal = Terminal {
        is_terminal: false,
        loser_side: None,
    };
}

pub fn check_terminal(state: &State) -> Terminal {
    if !state.is_well_formed() {
        warn!(?state, "check_terminal received a malformed state");
        return Terminal::ONGOING;
    }
    match (state.is_dead(Side::Player), state.is_dead(Side::Ai)) {
        (false, false) => Terminal::ONGOING,
        (true, false) => Terminal {
            is_terminal: true,
            loser_side: Some(Side::Player),
        },
        (false, true) => Terminal {
            is_terminal: true,
            loser_side: Some(Side::Ai),
        },
        (true, true) => Terminal {
            is_terminal: true,
            loser_side: None,
        },
    }
}

fn same_pair(a: [Hand; 2], b: [Hand; 2]) -> bool {
    a == b || a == [b[1], b[0]]
}

// 两种朝向都列出。
pub fn split_options(hands: [Hand; 2]) -> Vec<(Hand, Hand)> {
    let total = hands[0].saturating_add(hands[1]);
    (0..=MAX_HAND.min(total))
        .map(|left| (left, total - left))
        .filter(|&(_, right)| right <= MAX_HAND)
        .filter(|&(left, right)| !same_pair([left, right], hands))
        .collect()
}

pub fn generate_moves(state: &State, actor: Side) -> Vec<Move> {
    if !state.is_well_formed() {
        warn!(?state, %actor, "generate_moves received a malformed state");
        return Vec::new();
    }

    let own = state.hands(actor);
    let target = actor.opponent();
    let theirs = state.hands(target);
    let mut moves = Vec::new();

    // Attacks
    for (from_index, &source) in own.iter().enumerate() {
        if source == 0 {
            continue;
        }
        for (to_index, &defender) in theirs.iter().enumerate() {
            if defender == 0 {
                continue;
            }
            moves.push(Move::Attack {
                from_owner: actor,
                from_index,
                to_owner: target,
                to_index,
            });
        }
    }

    // Splits
    for (left, right) in split_options(own) {
        moves.push(Move::Split {
            owner: actor,
            left,
            right,
        });
    }

    moves
}

pub fn validate_move(state: &State, actor: Side, action: &Move) -> Result<(), RuleError> {
    if !state.is_well_formed() {
        return Err(RuleError::MalformedState);
    }
    if action.actor() != actor {
        return Err(RuleError::WrongOwner {
            expected: actor,
            actual: action.actor(),
        });
    }

    match *action {
        Move::Attack {
            from_owner,
            from_index,
            to_owner,
            to_index,
        } => {
            if to_owner != from_owner.opponent() {
                return Err(RuleError::WrongOwner {
                    expected: from_owner.opponent(),
                    actual: to_owner,
                });
            }
            let source = *state
                .hands(from_owner)
                .get(from_index)
                .ok_or(RuleError::HandIndexOutOfRange { index: from_index })?;
            let defender = *state
                .hands(to_owner)
                .get(to_index)
                .ok_or(RuleError::HandIndexOutOfRange { index: to_index })?;
            if source == 0 {
                return Err(RuleError::DeadSourceHand { index: from_index });
            }
            if defender == 0 {
                return Err(RuleError::DeadTargetHand { index: to_index });
            }
            Ok(())
        }
        Move::Split { owner, left, right } => {
            if left > MAX_HAND || right > MAX_HAND {
                return Err(RuleError::SplitOutOfRange { left, right });
            }
            let hands = state.hands(owner);
            let expected = state.total(owner);
            if left + right != expected {
                return Err(RuleError::SplitTotalMismatch {
                    expected,
                    actual: left + right,
                });
            }
            if same_pair([left, right], hands) {
                return Err(RuleError::NoOpSplit);
            }
            Ok(())
        }
    }
}

// 不切换回合；越界下标只记录警告并忽略。
pub fn simulate_move(state: &State, action: &Move) -> State {
    let mut next = *state;
    match *action {
        Move::Attack {
            from_owner,
            from_index,
            to_owner,
            to_index,
        } => {
            let Some(&source) = state.hands(from_owner).get(from_index) else {
                warn!(?action, "attack source index out of range");
                return next;
            };
            match next.hands_mut(to_owner).get_mut(to_index) {
                Some(target) => *target = (*target + source) % HAND_MODULUS,
                None => warn!(?action, "attack target index out of range"),
            }
        }
        Move::Split { owner, left, right } => {
            *next.hands_mut(owner) = [left, right];
        }
    }
    next
}

pub fn successors(state: &State, actor: Side) -> Vec<(Move, State)> {
    generate_moves(state, actor)
        .into_iter()
        .map(|action| (action, simulate_move(state, &action)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_pairs(moves: &[Move]) -> Vec<(Hand, Hand)> {
        moves
            .iter()
            .filter_map(|action| match *action {
                Move::Split { left, right, .. } => Some((left.min(right), left.max(right))),
                Move::Attack { .. } => None,
            })
            .collect()
    }

    #[test]
    fn attack_wraps_around_modulo_five() {
        let state = State::new([3, 1], [2, 1]);
        let action = Move::Attack {
            from_owner: Side::Player,
            from_index: 0,
            to_owner: Side::Ai,
            to_index: 0,
        };
        validate_move(&state, Side::Player, &action).expect("attack should be legal");
        let next = simulate_move(&state, &action);
        assert_eq!(next.ai_hands, [0, 1], "2 + 3 wraps to a dead hand");
        assert_eq!(next.player_hands, [3, 1], "attacker is unchanged");
    }

    #[test]
    fn split_excludes_no_op_redistributions() {
        let state = State::new([3, 0], [1, 1]);
        let moves = generate_moves(&state, Side::Player);
        let splits = split_pairs(&moves);

        assert!(!splits.is_empty());
        assert!(splits.iter().all(|&pair| pair == (1, 2)), "got {splits:?}");
        assert_eq!(
            validate_move(
                &state,
                Side::Player,
                &Move::Split {
                    owner: Side::Player,
                    left: 0,
                    right: 3
                }
            ),
            Err(RuleError::NoOpSplit)
        );
    }

    #[test]
    fn attacks_only_use_live_hands() {
        let state = State::new([2, 0], [0, 3]);
        let attacks: Vec<Move> = generate_moves(&state, Side::Player)
            .into_iter()
            .filter(|action| matches!(action, Move::Attack { .. }))
            .collect();
        assert_eq!(
            attacks,
            vec![Move::Attack {
                from_owner: Side::Player,
                from_index: 0,
                to_owner: Side::Ai,
                to_index: 1,
            }]
        );
    }

    #[test]
    fn terminal_depends_only_on_the_losing_side() {
        for state in State::all() {
            let terminal = check_terminal(&state);
            let player_dead = state.player_hands == [0, 0];
            let ai_dead = state.ai_hands == [0, 0];
            assert_eq!(terminal.is_terminal, player_dead || ai_dead);
            match (player_dead, ai_dead) {
                (true, false) => assert_eq!(terminal.loser_side, Some(Side::Player)),
                (false, true) => assert_eq!(terminal.loser_side, Some(Side::Ai)),
                _ => assert_eq!(terminal.loser_side, None),
            }
        }
    }

    #[test]
    fn every_generated_move_changes_the_state_within_range() {
        for state in State::all() {
            for actor in Side::ALL {
                for action in generate_moves(&state, actor) {
                    validate_move(&state, actor, &action).expect("generated moves are legal");
                    let next = simulate_move(&state, &action);
                    assert!(next.is_well_formed());
                    assert_ne!(next, state, "{action:?} is a no-op on {state:?}");
                }
            }
        }
    }

    #[test]
    fn opening_attack_scenario() {
        let state = State::initial();
        let action = Move::Attack {
            from_owner: Side::Player,
            from_index: 0,
            to_owner: Side::Ai,
            to_index: 0,
        };
        let next = simulate_move(&state, &action);
        assert_eq!(next, State::new([1, 1], [2, 1]));
        assert_eq!(check_terminal(&next), Terminal::ONGOING);
    }

    #[test]
    fn malformed_state_yields_no_moves() {
        let state = State::new([7, 1], [1, 1]);
        assert!(generate_moves(&state, Side::Player).is_empty());
        assert!(!check_terminal(&state).is_terminal);
        assert_eq!(
            validate_move(
                &state,
                Side::Player,
                &Move::Split {
                    owner: Side::Player,
                    left: 4,
                    right: 4
                }
            ),
            Err(RuleError::MalformedState)
        );
    }

    #[test]
    fn move_json_is_tagged() {
        let action = Move::Attack {
            from_owner: Side::Ai,
            from_index: 1,
            to_owner: Side::Player,
            to_index: 0,
        };
        let json = serde_json::to_string(&action).expect("move should serialize");
        assert_eq!(
            json,
            r#"{"type":"attack","fromOwner":"ai","fromIndex":1,"toOwner":"player","toIndex":0}"#
        );
    }
}
