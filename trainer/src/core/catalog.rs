//! Catalog parsing and validation.
//!
//! Pure: takes the catalog text and returns an ordered [`ExerciseCollection`].
//! File existence is probed separately by `io::catalog`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use toml::Spanned;

use crate::core::path_map::normalize_relative;
use crate::error::CatalogError;
use crate::exercise::{Exercise, ExerciseCollection, ExerciseMode};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    exercises: Vec<RawExercise>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExercise {
    id: Spanned<String>,
    path: Spanned<String>,
    name: Option<String>,
    section: Option<String>,
    order: Option<Spanned<i64>>,
    #[serde(default)]
    mode: ExerciseMode,
    hint: Option<String>,
    #[serde(default)]
    requires_previous: bool,
    test: Option<Spanned<String>>,
}

/// Parse catalog TOML into an ordered collection.
///
/// `origin` names the source in error messages (usually the file path).
pub fn parse_catalog(source: &str, origin: &str) -> Result<ExerciseCollection, CatalogError> {
    let file: CatalogFile = toml::from_str(source).map_err(|source| CatalogError::Parse {
        origin: origin.to_string(),
        source,
    })?;
    if file.exercises.is_empty() {
        return Err(CatalogError::Empty {
            origin: origin.to_string(),
        });
    }

    let ordinals = assign_ordinals(&file.exercises, origin)?;
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut path_owners: HashMap<PathBuf, (&str, usize)> = HashMap::new();
    let mut exercises = Vec::with_capacity(file.exercises.len());

    for (index, (raw, ordinal)) in file.exercises.iter().zip(ordinals).enumerate() {
        let id_line = line_of(source, raw.id.span().start);
        let id = raw.id.get_ref().as_str();
        if let Some(reason) = invalid_id_reason(id) {
            return Err(CatalogError::InvalidField {
                origin: origin.to_string(),
                line: id_line,
                index: index + 1,
                field: "id",
                reason,
            });
        }
        if let Some(first_line) = first_seen.insert(id, id_line) {
            return Err(CatalogError::DuplicateId {
                origin: origin.to_string(),
                id: id.to_string(),
                line: id_line,
                first_line,
            });
        }

        let path = raw.path.get_ref();
        let path_line = line_of(source, raw.path.span().start);
        if let Some(reason) = invalid_path_reason(path, "exercises") {
            return Err(CatalogError::InvalidField {
                origin: origin.to_string(),
                line: path_line,
                index: index + 1,
                field: "path",
                reason,
            });
        }
        let normalized = normalize_relative(Path::new(path));
        if let Some((first_id, first_line)) = path_owners.get(&normalized) {
            return Err(CatalogError::DuplicatePath {
                origin: origin.to_string(),
                path: normalized,
                id: id.to_string(),
                line: path_line,
                first_id: first_id.to_string(),
                first_line: *first_line,
            });
        }
        path_owners.insert(normalized, (id, path_line));

        if let Some(test) = &raw.test
            && let Some(reason) = invalid_path_reason(test.get_ref(), "tests")
        {
            return Err(CatalogError::InvalidField {
                origin: origin.to_string(),
                line: line_of(source, test.span().start),
                index: index + 1,
                field: "test",
                reason,
            });
        }

        exercises.push(Exercise {
            id: id.to_string(),
            ordinal,
            path: PathBuf::from(path),
            name: raw.name.clone().unwrap_or_else(|| id.to_string()),
            section: raw.section.clone(),
            mode: raw.mode,
            hint: raw.hint.clone().filter(|hint| !hint.trim().is_empty()),
            requires_previous: raw.requires_previous,
            test: raw.test.as_ref().map(|test| PathBuf::from(test.get_ref())),
        });
    }

    exercises.sort_by_key(|ex| ex.ordinal);
    Ok(ExerciseCollection::from_validated(exercises))
}

/// Ordinals are positional unless every entry sets `order`.
fn assign_ordinals(raw: &[RawExercise], origin: &str) -> Result<Vec<u32>, CatalogError> {
    let explicit = raw.iter().filter(|ex| ex.order.is_some()).count();
    if explicit == 0 {
        return Ok((1..).take(raw.len()).collect());
    }
    if explicit != raw.len() {
        return Err(CatalogError::Ordering {
            origin: origin.to_string(),
            reason: format!(
                "must be set on every exercise or none ({explicit} of {} set)",
                raw.len()
            ),
        });
    }

    let mut by_value: HashMap<u32, &str> = HashMap::new();
    let mut ordinals = Vec::with_capacity(raw.len());
    for ex in raw {
        let value = ex.order.as_ref().map(|order| *order.get_ref()).unwrap_or_default();
        let ordinal = u32::try_from(value)
            .ok()
            .filter(|ordinal| *ordinal > 0)
            .ok_or_else(|| CatalogError::Ordering {
                origin: origin.to_string(),
                reason: format!("of '{}' must be a positive integer, got {value}", ex.id.get_ref()),
            })?;
        if let Some(other) = by_value.insert(ordinal, ex.id.get_ref()) {
            return Err(CatalogError::Ordering {
                origin: origin.to_string(),
                reason: format!(
                    "value {ordinal} is used by both '{other}' and '{}'",
                    ex.id.get_ref()
                ),
            });
        }
        ordinals.push(ordinal);
    }
    Ok(ordinals)
}

fn invalid_id_reason(id: &str) -> Option<String> {
    if id.is_empty() {
        return Some("must not be empty".to_string());
    }
    if id.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
        return Some(format!("'{id}' must not contain whitespace or path separators"));
    }
    None
}

fn invalid_path_reason(path: &str, base: &str) -> Option<String> {
    if path.trim().is_empty() {
        return Some("must not be empty".to_string());
    }
    let escapes = Path::new(path).components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Some(format!(
            "'{path}' must be relative to the {base} directory"
        ));
    }
    None
}

/// 1-based line number of a byte offset.
fn line_of(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}
