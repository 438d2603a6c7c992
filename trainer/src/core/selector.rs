//! Deterministic cursor selection over the exercise collection.

use crate::core::types::{ExerciseStatus, ProgressRecord};
use crate::exercise::{Exercise, ExerciseCollection};

fn status_of(record: &ProgressRecord, id: &str) -> ExerciseStatus {
    record.get(id).map(|entry| entry.status).unwrap_or_default()
}

/// First exercise in catalog order that still needs work (`Pending` or `Failed`).
///
/// Used to recompute the cursor at startup. Returns `None` when nothing is
/// pending or failed.
pub fn first_open<'a>(
    collection: &'a ExerciseCollection,
    record: &ProgressRecord,
) -> Option<&'a Exercise> {
    collection.iter().find(|ex| {
        matches!(
            status_of(record, &ex.id),
            ExerciseStatus::Pending | ExerciseStatus::Failed
        )
    })
}

/// Next exercise after `current` whose status is not `Done`/`Skipped`.
///
/// Searches forward in catalog order, then wraps to the start so an exercise
/// skipped over earlier is not lost. `current` itself is never returned.
/// `None` means every other exercise is settled.
pub fn next_unsettled<'a>(
    collection: &'a ExerciseCollection,
    record: &ProgressRecord,
    current: &str,
) -> Option<&'a Exercise> {
    let exercises = collection.as_slice();
    let start = collection.position(current).map_or(0, |index| index + 1);
    exercises[start..]
        .iter()
        .chain(exercises[..start].iter())
        .filter(|ex| ex.id != current)
        .find(|ex| !status_of(record, &ex.id).is_settled())
}

/// True when every exercise is `Done` or `Skipped`.
pub fn all_settled(collection: &ExerciseCollection, record: &ProgressRecord) -> bool {
    collection
        .iter()
        .all(|ex| status_of(record, &ex.id).is_settled())
}

/// The exercise that must be settled before `id` may be focused, if any.
pub fn blocking_predecessor<'a>(
    collection: &'a ExerciseCollection,
    record: &ProgressRecord,
    id: &str,
) -> Option<&'a Exercise> {
    let exercise = collection.get(id)?;
    if !exercise.requires_previous {
        return None;
    }
    collection
        .previous(id)
        .filter(|prev| !status_of(record, &prev.id).is_settled())
}

/// Exercises a run-all batch should check, in catalog order.
///
/// With `whole_collection == false` the batch stops after the first exercise
/// that is not `Done`.
pub fn run_all_targets(
    collection: &ExerciseCollection,
    record: &ProgressRecord,
    whole_collection: bool,
) -> Vec<String> {
    if whole_collection {
        return collection.ids().map(str::to_string).collect();
    }
    let mut targets = Vec::new();
    for ex in collection {
        targets.push(ex.id.clone());
        if status_of(record, &ex.id) != ExerciseStatus::Done {
            break;
        }
    }
    targets
}
