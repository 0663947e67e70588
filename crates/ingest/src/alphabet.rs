use std::path::Path;

use tracing::info;

use crate::error::ReaderError;

/// Position-indexed letters and transliterations of one script.
///
/// Loaded from a `lang,script,translit` CSV where `script` and `translit`
/// are comma-separated lists; a letter's position in the list is its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    letters: Vec<String>,
    translit: Vec<String>,
}

impl Alphabet {
    pub fn new(letters: Vec<String>, translit: Vec<String>) -> Self {
        Self { letters, translit }
    }

    pub fn load(path: &Path, lang: &str) -> Result<Self, ReaderError> {
        let mut reader = csv::Reader::from_path(path).map_err(|source| ReaderError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

        let headers = reader
            .headers()
            .map_err(|source| ReaderError::Csv {
                path: path.to_path_buf(),
                source,
            })?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h.trim() == name);
        let (Some(lang_col), Some(script_col), Some(translit_col)) =
            (column("lang"), column("script"), column("translit"))
        else {
            let missing = ["lang", "script", "translit"]
                .into_iter()
                .filter(|name| column(name).is_none())
                .map(String::from)
                .collect();
            return Err(ReaderError::Schema {
                path: path.to_path_buf(),
                missing,
            });
        };

        for row in reader.records() {
            let row = row.map_err(|source| ReaderError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            if row.get(lang_col).map(str::trim) != Some(lang) {
                continue;
            }

            let split = |i: usize| -> Vec<String> {
                row.get(i)
                    .unwrap_or("")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect()
            };
            let alphabet = Self::new(split(script_col), split(translit_col));
            info!(lang, letters = alphabet.letters.len(), "Loaded alphabet");
            return Ok(alphabet);
        }

        Err(ReaderError::UnknownLanguage {
            path: path.to_path_buf(),
            lang: lang.to_string(),
        })
    }

    pub fn letter(&self, id: usize) -> Option<&str> {
        self.letters.get(id).map(String::as_str)
    }

    pub fn transliteration(&self, id: usize) -> Option<&str> {
        self.translit.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.letters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.letters.is_empty()
    }
}
