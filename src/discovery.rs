use anyhow::{Context, Result};
use log::warn;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::models::{DECLARATION_FILE_NAME, DEFAULT_WORKING_DIR};

/// Ancestor levels checked before the walk gives up. Deep enough for any
/// real filesystem tree while keeping the loop bounded.
const MAX_WALK_DEPTH: usize = 64;

#[derive(Clone, Debug)]
pub struct ConfigDocument {
    pub path: PathBuf,
    pub declarations: serde_yaml::Value,
}

/// Collects every declaration document visible from `start_dir`: one per
/// ancestor directory carrying a declaration file, unioned with the
/// explicitly registered paths. Sorted so the deepest document comes last
/// and wins any flattened name lookup built on top.
///
/// Unreadable or unparsable documents are skipped with a warning; the
/// caller always gets the documents that could be read.
pub fn find_documents(start_dir: &Path, registered: &[PathBuf]) -> Vec<ConfigDocument> {
    let mut paths = Vec::new();

    let mut current = start_dir;
    for _ in 0..MAX_WALK_DEPTH {
        // The filesystem root itself is never scanned.
        let parent = match current.parent() {
            Some(parent) => parent,
            None => break,
        };

        let candidate = current.join(DECLARATION_FILE_NAME);
        if candidate.is_file() {
            paths.push(candidate);
        }
        current = parent;
    }

    for path in registered {
        if !path.is_file() {
            warn!("registered declaration file {:?} no longer exists, skipping", path);
            continue;
        }
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }

    paths.sort_by_key(|path| path.as_os_str().len());

    paths
        .into_iter()
        .filter_map(|path| match read_document(&path) {
            Ok(document) => Some(document),
            Err(err) => {
                warn!("skipping declaration file {:?}: {:#}", path, err);
                None
            }
        })
        .collect()
}

fn read_document(path: &Path) -> Result<ConfigDocument> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Couldn't read declaration file {:?}.", path))?;
    let substituted = substitute_variables(path, &raw);
    let declarations = serde_yaml::from_str(&substituted)
        .with_context(|| format!("Declaration file {:?} is not valid YAML.", path))?;

    Ok(ConfigDocument {
        path: path.to_path_buf(),
        declarations,
    })
}

/// Rewrites `$VAR` tokens in the raw document text before parsing.
///
/// Process environment variables are substituted first, then the synthetic
/// tokens. A real environment variable named like a synthetic token
/// (`YAML_LOCATION_DIR`, `UID`, `DEFAULT_WORKING_DIR`) therefore shadows
/// it. Known quirk, kept for compatibility.
pub fn substitute_variables(path: &Path, raw: &str) -> String {
    let mut text = raw.to_string();

    for (name, value) in env::vars() {
        text = text.replace(&format!("${}", name), &value);
    }

    let location_dir = path
        .parent()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default();
    text = text.replace("$YAML_LOCATION_DIR", &location_dir);
    text = text.replace("$UID", &host_uid().to_string());
    text.replace("$DEFAULT_WORKING_DIR", DEFAULT_WORKING_DIR)
}

pub fn host_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_declaration(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(DECLARATION_FILE_NAME);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn walk_collects_one_document_per_level_deepest_last() {
        let root = TempDir::new().unwrap();
        let mid = root.path().join("project");
        let leaf = mid.join("src");
        fs::create_dir_all(&leaf).unwrap();

        write_declaration(root.path(), "containers: {}\n");
        write_declaration(&mid, "containers: {}\n");
        write_declaration(&leaf, "containers: {}\n");

        let documents = find_documents(&leaf, &[]);
        assert_eq!(documents.len(), 3);
        assert_eq!(documents[2].path, leaf.join(DECLARATION_FILE_NAME));
        assert_eq!(documents[0].path, root.path().join(DECLARATION_FILE_NAME));
    }

    #[test]
    fn invalid_yaml_is_skipped_not_fatal() {
        let root = TempDir::new().unwrap();
        let leaf = root.path().join("leaf");
        fs::create_dir_all(&leaf).unwrap();

        write_declaration(root.path(), "containers: [not: valid: yaml\n");
        write_declaration(&leaf, "containers: {}\n");

        let documents = find_documents(&leaf, &[]);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].path, leaf.join(DECLARATION_FILE_NAME));
    }

    #[test]
    fn registered_paths_are_unioned_in() {
        let tree = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();

        let registered = write_declaration(elsewhere.path(), "containers: {}\n");
        let missing = elsewhere.path().join("gone").join(DECLARATION_FILE_NAME);

        let documents = find_documents(tree.path(), &[registered.clone(), missing]);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].path, registered);
    }

    #[test]
    fn synthetic_tokens_are_substituted() {
        let path = Path::new("/some/project/docker-shim.yml");
        let text = substitute_variables(path, "dir: $YAML_LOCATION_DIR\nwd: $DEFAULT_WORKING_DIR\n");
        assert_eq!(text, "dir: /some/project\nwd: /app\n");
    }

    #[test]
    fn environment_variables_are_substituted_first() {
        env::set_var("DOCKER_SHIM_TEST_TOKEN", "expanded");
        let path = Path::new("/p/docker-shim.yml");
        let text = substitute_variables(path, "value: $DOCKER_SHIM_TEST_TOKEN\n");
        assert_eq!(text, "value: expanded\n");
    }
}
