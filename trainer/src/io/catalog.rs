//! Loading the exercise catalog from disk.

use std::fs;
use std::path::Path;

use tracing::{debug, instrument};

use crate::core::catalog::parse_catalog;
use crate::error::CatalogError;
use crate::exercise::ExerciseCollection;

/// Read and validate `catalog_path`, then confirm every exercise file exists
/// under `exercises_dir` and every explicit `test` file under `tests_dir`.
///
/// Derived test pairings are optional and not checked here.
#[instrument(skip_all, fields(path = %catalog_path.display()))]
pub fn load_catalog(
    catalog_path: &Path,
    exercises_dir: &Path,
    tests_dir: &Path,
) -> Result<ExerciseCollection, CatalogError> {
    let source = fs::read_to_string(catalog_path).map_err(|source| CatalogError::Read {
        path: catalog_path.to_path_buf(),
        source,
    })?;
    let collection = parse_catalog(&source, &catalog_path.display().to_string())?;
    for exercise in &collection {
        let path = exercises_dir.join(&exercise.path);
        if !path.is_file() {
            return Err(CatalogError::MissingFile {
                id: exercise.id.clone(),
                path,
            });
        }
        if let Some(test) = &exercise.test {
            let path = tests_dir.join(test);
            if !path.is_file() {
                return Err(CatalogError::MissingTest {
                    id: exercise.id.clone(),
                    path,
                });
            }
        }
    }
    debug!(exercises = collection.len(), "catalog loaded");
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = "\
[[exercises]]
id = \"intro1\"
path = \"intro1.py\"

[[exercises]]
id = \"intro2\"
path = \"intro2.py\"
mode = \"test\"
";

    #[test]
    fn loads_when_all_files_exist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let catalog = temp.path().join("info.toml");
        fs::write(&catalog, CATALOG).expect("write catalog");
        fs::write(temp.path().join("intro1.py"), "print('hi')\n").expect("write");
        fs::write(temp.path().join("intro2.py"), "def test_x(): pass\n").expect("write");

        let collection = load_catalog(&catalog, temp.path(), temp.path()).expect("load");
        assert_eq!(collection.ids().collect::<Vec<_>>(), vec!["intro1", "intro2"]);
    }

    #[test]
    fn missing_exercise_file_names_the_exercise() {
        let temp = tempfile::tempdir().expect("tempdir");
        let catalog = temp.path().join("info.toml");
        fs::write(&catalog, CATALOG).expect("write catalog");
        fs::write(temp.path().join("intro1.py"), "print('hi')\n").expect("write");

        let err = load_catalog(&catalog, temp.path(), temp.path()).unwrap_err();
        assert!(
            matches!(&err, CatalogError::MissingFile { id, .. } if id == "intro2"),
            "{err}"
        );
    }

    #[test]
    fn missing_explicit_test_names_the_exercise() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tests = temp.path().join("tests");
        let catalog = temp.path().join("info.toml");
        fs::write(
            &catalog,
            "[[exercises]]\nid = \"intro1\"\npath = \"intro1.py\"\ntest = \"test_intro1.py\"\n",
        )
        .expect("write catalog");
        fs::write(temp.path().join("intro1.py"), "print('hi')\n").expect("write");

        let err = load_catalog(&catalog, temp.path(), &tests).unwrap_err();
        assert!(
            matches!(&err, CatalogError::MissingTest { id, .. } if id == "intro1"),
            "{err}"
        );

        fs::create_dir_all(&tests).expect("mkdir");
        fs::write(tests.join("test_intro1.py"), "def test_hi(): pass\n").expect("write");
        assert!(load_catalog(&catalog, temp.path(), &tests).is_ok());
    }

    #[test]
    fn missing_catalog_is_a_read_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_catalog(&temp.path().join("info.toml"), temp.path(), temp.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }), "{err}");
    }
}
