use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::phase::Constellation;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{key}` was not found; looked for {}", display_paths(.searched))]
    Missing { key: String, searched: Vec<PathBuf> },
    #[error("could not read prompt file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// System prompts for one business line, keyed by prompt key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromptLibrary {
    prompts: BTreeMap<String, String>,
}

impl PromptLibrary {
    /// Reads every prompt the constellation refers to from
    /// `<dir>/<business_line>/<business_line>_<key>[_<variant>].txt`.
    /// A variant file wins over the plain one when both exist.
    pub fn load(
        dir: &Path,
        business_line: &str,
        constellation: &Constellation,
    ) -> Result<Self, PromptError> {
        let mut prompts = BTreeMap::new();
        for key in constellation.prompt_keys() {
            let text =
                read_prompt(dir, business_line, key, constellation.prompt_variant.as_deref())?;
            prompts.insert(key.to_string(), text);
        }
        Ok(Self { prompts })
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { prompts: entries.into_iter().map(|(key, text)| (key.into(), text.into())).collect() }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.prompts.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|path| format!("`{}`", path.display())).collect::<Vec<_>>().join(", ")
}

fn read_prompt(
    dir: &Path,
    business_line: &str,
    key: &str,
    variant: Option<&str>,
) -> Result<String, PromptError> {
    let folder = dir.join(business_line);
    let mut candidates = Vec::with_capacity(2);
    if let Some(variant) = variant {
        candidates.push(folder.join(format!("{business_line}_{key}_{variant}.txt")));
    }
    candidates.push(folder.join(format!("{business_line}_{key}.txt")));

    for path in &candidates {
        match fs::read_to_string(path) {
            Ok(text) => {
                tracing::debug!(
                    event_name = "prompts.loaded",
                    prompt_key = key,
                    path = %path.display(),
                    "loaded prompt"
                );
                return Ok(text);
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => return Err(PromptError::Read { path: path.clone(), source }),
        }
    }

    Err(PromptError::Missing { key: key.to_string(), searched: candidates })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use crate::constellation::ConstellationRegistry;
    use crate::prompts::{PromptError, PromptLibrary};

    fn write_prompt(dir: &Path, name: &str, text: &str) {
        let folder = dir.join("sbus");
        fs::create_dir_all(&folder).expect("mkdir");
        fs::write(folder.join(name), text).expect("write prompt");
    }

    #[test]
    fn variant_files_win_and_plain_files_fill_the_gaps() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_prompt(dir.path(), "sbus_a_matcher.txt", "plain matcher");
        write_prompt(dir.path(), "sbus_a_matcher_one_critic.txt", "variant matcher");
        write_prompt(dir.path(), "sbus_critic.txt", "critic");
        write_prompt(dir.path(), "sbus_b_matcher.txt", "enricher");
        let constellation = ConstellationRegistry::builtin().load("p1m1m2c").expect("load");

        let library = PromptLibrary::load(dir.path(), "sbus", &constellation).expect("prompts");

        assert_eq!(library.len(), 3);
        assert_eq!(library.get("a_matcher"), Some("variant matcher"));
        assert_eq!(library.get("b_matcher"), Some("enricher"));
    }

    #[test]
    fn missing_prompt_names_the_searched_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_prompt(dir.path(), "sbus_a_matcher.txt", "matcher");
        let constellation = ConstellationRegistry::builtin().load("p1m1_p2m2").expect("load");

        let error = PromptLibrary::load(dir.path(), "sbus", &constellation).expect_err("missing");

        assert!(matches!(&error, PromptError::Missing { key, .. } if key == "b_matcher"));
        assert!(error.to_string().contains("sbus_b_matcher_no_critic.txt"));
    }
}
