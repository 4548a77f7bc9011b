use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DppError, Result};

/// One fitted parameter set: channel density scales plus the current
/// threshold measured for it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSet {
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
    /// pA
    pub rheobase: f64,
}

/// Read-only collection of model sets keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelLibrary {
    pub model_sets: BTreeMap<usize, ModelSet>,
}

impl ModelLibrary {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// A library with one unscaled set under id 0.
    pub fn single(rheobase: f64) -> Self {
        Self {
            model_sets: BTreeMap::from([(
                0,
                ModelSet {
                    variables: BTreeMap::new(),
                    rheobase,
                },
            )]),
        }
    }

    pub fn get(&self, id: usize) -> Result<&ModelSet> {
        self.model_sets.get(&id).ok_or_else(|| {
            DppError::InvalidArgument(format!(
                "model id {id} is not in the library ({} sets)",
                self.model_sets.len()
            ))
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.model_sets.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_sets_keyed_by_id() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model_sets": {{
                "0": {{"variables": {{"naf": 1.1, "kaf": 0.9}}, "rheobase": 250.0}},
                "3": {{"rheobase": 310.0}}
            }}}}"#
        )
        .unwrap();

        let library = ModelLibrary::load(file.path()).unwrap();
        assert_eq!(library.ids().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(library.get(0).unwrap().variables["naf"], 1.1);
        assert!(library.get(3).unwrap().variables.is_empty());
        assert!(matches!(library.get(1), Err(DppError::InvalidArgument(_))));
    }

    #[test]
    fn malformed_library_is_a_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"model_sets\": [1, 2]}}").unwrap();
        assert!(matches!(
            ModelLibrary::load(file.path()),
            Err(DppError::Json(_))
        ));
    }
}
