use std::{collections::BTreeMap as Map, path::PathBuf};

pub const DECLARATION_FILE_NAME: &str = "docker-shim.yml";
pub const DEFAULT_WORKING_DIR: &str = "/app";
pub const RESOURCE_NAME_PREFIX: &str = "docker_shim";
pub const USER_SWITCHER_ENTRYPOINT: &str = "/switch_user";

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ImageName(pub String);

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ContainerName(pub String);

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct VolumeName(pub String);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuildPolicy {
    Always,
    IfChanged,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Volume {
    Simple {
        source: String,
        target: String,
    },
    DriverBacked {
        name: String,
        driver: String,
        driver_opts: Map<String, String>,
        target: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommandAlias {
    pub name: String,
    pub path: Option<String>,
    pub default_params: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildSpec {
    pub context: String,
    pub dockerfile: String,
}

/// The subset of container attributes a conditional rule may overwrite.
/// Fields left `None` (or empty for the list-valued ones) are not applied.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overwrite {
    pub entrypoint: Option<String>,
    pub env_file: Option<String>,
    pub pre_exec_hook_command: Option<String>,
    pub post_exec_hook_command: Option<String>,
    pub quiet: Option<bool>,
    pub working_dir: Option<String>,
    pub volumes: Vec<Volume>,
    pub environment: Vec<String>,
    pub user: Option<String>,
    pub inject_user_switcher: Option<bool>,
    pub networks: Vec<String>,
    pub ports: Vec<String>,
    pub stay_in_root: Option<bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConditionalOverride {
    pub command_pattern: String,
    pub overwrite: Overwrite,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub name: String,
    pub image: Option<String>,
    pub build: Option<BuildSpec>,
    pub commands: Vec<CommandAlias>,
    pub volumes: Vec<Volume>,
    pub environment: Vec<String>,
    pub networks: Vec<String>,
    pub ports: Vec<String>,
    pub entrypoint: Option<String>,
    pub env_file: Option<String>,
    pub user: Option<String>,
    pub working_dir: String,
    pub stay_in_root: bool,
    pub privileged: bool,
    pub inject_user_switcher: bool,
    pub keep_volumes: bool,
    pub auto_rebuild_images: bool,
    pub quiet: bool,
    pub pre_exec_hook_command: Option<String>,
    pub post_exec_hook_command: Option<String>,
    pub fs_location: PathBuf,
    pub fs_location_hash: String,
    pub docker_compose_project_name: String,
    pub conditional_config_containers: Vec<ConditionalOverride>,
}

impl Container {
    /// Engine-level container name, namespaced by the declaring directory so
    /// same-named containers from different projects never collide.
    pub fn container_name(&self) -> ContainerName {
        ContainerName(format!(
            "{}_{}_{}",
            RESOURCE_NAME_PREFIX, self.fs_location_hash, self.name
        ))
    }

    /// Image tag used for locally built images.
    pub fn built_image_name(&self) -> ImageName {
        ImageName(format!(
            "{}_{}_{}:latest",
            RESOURCE_NAME_PREFIX, self.fs_location_hash, self.name
        ))
    }

    pub fn volume_name(&self, volume_name: &str) -> VolumeName {
        VolumeName(format!(
            "{}_{}_{}",
            RESOURCE_NAME_PREFIX, self.fs_location_hash, volume_name
        ))
    }
}
