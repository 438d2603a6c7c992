use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How an exercise is checked.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseMode {
    /// Run the file as a program; a clean exit passes.
    #[default]
    Run,
    /// Run the test routine for the file; all tests passing passes.
    Test,
}

impl ExerciseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExerciseMode::Run => "run",
            ExerciseMode::Test => "test",
        }
    }
}

impl fmt::Display for ExerciseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exercise {
    pub id: String,
    /// Position in learning order (strictly increasing across the collection).
    pub ordinal: u32,
    /// Path relative to the exercises directory.
    pub path: PathBuf,
    pub name: String,
    pub section: Option<String>,
    pub mode: ExerciseMode,
    pub hint: Option<String>,
    pub requires_previous: bool,
    /// Test file named by the catalog, relative to the tests directory.
    pub test: Option<PathBuf>,
}

impl Exercise {
    /// Test file paired with this exercise, relative to the tests directory.
    ///
    /// An explicit catalog entry wins. Otherwise an exercise inside a topic
    /// directory, `<topic>/<file>`, pairs with `<topic>/test_<file>`; the
    /// checker only uses that file when it exists.
    pub fn paired_test(&self) -> Option<PathBuf> {
        if let Some(test) = &self.test {
            return Some(test.clone());
        }
        let topic = self.path.parent().filter(|dir| !dir.as_os_str().is_empty())?;
        let mut name = OsString::from("test_");
        name.push(self.path.file_name()?);
        Some(topic.join(name))
    }
}

/// Exercises in learning order. Never empty; ids unique; ordinals increasing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExerciseCollection {
    exercises: Vec<Exercise>,
}

impl ExerciseCollection {
    /// Wrap exercises that already satisfy the collection invariants.
    ///
    /// Only the catalog parser constructs collections; it validates first.
    pub(crate) fn from_validated(exercises: Vec<Exercise>) -> Self {
        debug_assert!(!exercises.is_empty());
        debug_assert!(exercises.windows(2).all(|w| w[0].ordinal < w[1].ordinal));
        Self { exercises }
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Exercise> {
        self.exercises.iter()
    }

    pub fn as_slice(&self) -> &[Exercise] {
        &self.exercises
    }

    pub fn get(&self, id: &str) -> Option<&Exercise> {
        self.exercises.iter().find(|ex| ex.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.exercises.iter().position(|ex| ex.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// The exercise immediately before `id` in learning order.
    pub fn previous(&self, id: &str) -> Option<&Exercise> {
        let index = self.position(id)?;
        index.checked_sub(1).map(|prev| &self.exercises[prev])
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.exercises.iter().map(|ex| ex.id.as_str())
    }
}

impl<'a> IntoIterator for &'a ExerciseCollection {
    type Item = &'a Exercise;
    type IntoIter = std::slice::Iter<'a, Exercise>;

    fn into_iter(self) -> Self::IntoIter {
        self.exercises.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::test_support::exercise;

    #[test]
    fn topic_exercise_pairs_with_prefixed_test() {
        let mut ex = exercise("vars1", 1);
        ex.path = "01_variables/vars1.py".into();
        assert_eq!(
            ex.paired_test().as_deref(),
            Some(Path::new("01_variables/test_vars1.py"))
        );
    }

    #[test]
    fn top_level_exercise_has_no_derived_test() {
        let ex = exercise("intro1", 1);
        assert_eq!(ex.paired_test(), None);
    }

    #[test]
    fn explicit_test_wins() {
        let mut ex = exercise("vars1", 1);
        ex.path = "01_variables/vars1.py".into();
        ex.test = Some("shared/test_types.py".into());
        assert_eq!(ex.paired_test().as_deref(), Some(Path::new("shared/test_types.py")));
    }
}
