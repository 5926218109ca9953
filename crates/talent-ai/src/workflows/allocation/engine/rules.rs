use super::super::collaborators::Evaluation;
use std::cmp::Reverse;

use super::super::domain::{Position, PositionId, Score};
use super::ScoreMap;

/// Highest score among the given positions; ties go to the lowest position id.
/// Scores for positions outside `positions` (e.g. since deactivated) are ignored.
pub(crate) fn best_of<'a>(
    positions: &'a [Position],
    scores: &'a ScoreMap,
) -> Option<(&'a Position, &'a Evaluation)> {
    let mut best: Option<(&Position, &Evaluation)> = None;
    for position in positions {
        let Some(evaluation) = scores.get(&position.id) else {
            continue;
        };
        best = match best {
            Some((current, current_eval))
                if current_eval.score > evaluation.score
                    || (current_eval.score == evaluation.score && current.id < position.id) =>
            {
                Some((current, current_eval))
            }
            _ => Some((position, evaluation)),
        };
    }
    best
}

/// First active position (lowest id) whose name is the declared intent.
pub(crate) fn identity_match<'a>(positions: &'a [Position], text: &str) -> Option<&'a Position> {
    positions
        .iter()
        .filter(|position| position.matches_title(text))
        .min_by_key(|position| position.id)
}

/// Strict improvement test. A candidate without a scored assignment improves on anything.
pub(crate) fn improves(current: Option<Score>, candidate: Score) -> bool {
    match current {
        Some(current) => candidate > current,
        None => true,
    }
}

/// Full best-of ordering used when every active score is known: higher score first, then
/// the lower position id. An unscored or unassigned candidate is outranked by anything.
pub(crate) fn outranks(
    best: (&Position, &Evaluation),
    current_position: Option<PositionId>,
    current_score: Option<Score>,
) -> bool {
    let (position, evaluation) = best;
    match (current_position, current_score) {
        (Some(current_position), Some(current_score)) => {
            (evaluation.score, Reverse(position.id)) > (current_score, Reverse(current_position))
        }
        _ => true,
    }
}
