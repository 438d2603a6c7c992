//! Reference solutions, stored under `solutions/` with the same layout as
//! `exercises/`.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::exercise::Exercise;
use crate::io::init::TrainerPaths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub path: PathBuf,
    pub contents: String,
}

/// The solution for `exercise`, or `None` when the workspace ships none.
pub fn read_solution(paths: &TrainerPaths, exercise: &Exercise) -> Result<Option<Solution>> {
    let path = paths.solutions_dir.join(&exercise.path);
    if !path.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("read solution {}", path.display()))?;
    Ok(Some(Solution { path, contents }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::exercise;

    #[test]
    fn solution_mirrors_the_exercise_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TrainerPaths::new(temp.path());
        let mut ex = exercise("vars1", 1);
        ex.path = "01_variables/vars1.py".into();
        let file = paths.solutions_dir.join("01_variables/vars1.py");
        fs::create_dir_all(file.parent().expect("parent")).expect("mkdir");
        fs::write(&file, "x = 1\n").expect("write");

        let solution = read_solution(&paths, &ex).expect("read").expect("present");
        assert_eq!(solution.path, file);
        assert_eq!(solution.contents, "x = 1\n");
    }

    #[test]
    fn missing_solution_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TrainerPaths::new(temp.path());
        assert_eq!(read_solution(&paths, &exercise("intro1", 1)).expect("read"), None);
    }
}
