//! 走法提示：给界面标出每一步的胜负与步数。

use super::minimax::SearchEngine;
use super::policy::{Classifier, MoveClassification};
use super::tablebase::Tablebase;
use crate::game::{Side, State};

/// 对 `acting` 的全部合法走法分类，结果站在 `perspective` 一方看。
pub fn analyze_moves(
    state: &State,
    acting: Side,
    perspective: Side,
    table: Option<&Tablebase>,
    engine: &SearchEngine,
    depth: u32,
) -> Vec<MoveClassification> {
    let classifier = Classifier::new(table, engine, depth);
    let (mut classified, _) = classifier.classify_moves(state, acting);
    if perspective != acting {
        for hint in &mut classified {
            hint.outcome = hint.outcome.invert();
        }
    }
    classified
}
