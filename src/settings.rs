use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap as Map,
    env, fs,
    path::{Path, PathBuf},
};

const SETTINGS_FILE_NAME: &str = "settings.json";
const CONFIG_DIR_ENV: &str = "DOCKER_SHIM_CONFIG_DIR";
const DATA_DIR_ENV: &str = "DOCKER_SHIM_HOME";

/// Root for the tool's own data: the shim directory and the optional
/// user-switcher binary live below it.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    let home =
        dirs::home_dir().ok_or_else(|| anyhow!("Couldn't determine the home directory."))?;
    Ok(home.join(".local").join("docker-shim"))
}

pub fn shim_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("bin"))
}

pub fn user_switcher_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("switch_user"))
}

/// Persisted tool state: the registered declaration-file paths and the
/// last-known build-tree hash per image tag. Read at the start of an
/// invocation and written back as a whole; last writer wins.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub yaml_paths: Vec<PathBuf>,

    #[serde(default)]
    pub build_hashes: Map<String, String>,
}

impl Settings {
    pub fn config_dir() -> Result<PathBuf> {
        if let Some(dir) = env::var_os(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }

        let base = dirs::config_dir()
            .ok_or_else(|| anyhow!("Couldn't determine the user configuration directory."))?;
        Ok(base.join("docker-shim"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(SETTINGS_FILE_NAME))
    }

    pub fn load() -> Result<Settings> {
        Self::load_from(Self::default_path()?)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Couldn't read settings file {:?}.", path))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("Settings file {:?} is not valid JSON.", path))?;
        Ok(settings)
    }

    pub fn save(&mut self) -> Result<()> {
        self.save_to(Self::default_path()?)
    }

    pub fn save_to<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Couldn't create settings directory {:?}.", parent))?;
        }

        self.yaml_paths.sort();
        self.yaml_paths.dedup();

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("Couldn't write settings file {:?}.", path))?;
        Ok(())
    }

    pub fn add_yaml_path(&mut self, path: PathBuf) {
        self.yaml_paths.push(path);
    }

    pub fn remove_yaml_path(&mut self, path: &Path) {
        self.yaml_paths.retain(|existing| existing != path);
    }

    pub fn build_hash(&self, image_tag: &str) -> Option<&str> {
        self.build_hashes
            .get(&Self::build_hash_key(image_tag))
            .map(|hash| hash.as_str())
    }

    pub fn set_build_hash(&mut self, image_tag: &str, hash: String) {
        self.build_hashes.insert(Self::build_hash_key(image_tag), hash);
    }

    fn build_hash_key(image_tag: &str) -> String {
        image_tag.replace(':', "_")
    }
}
