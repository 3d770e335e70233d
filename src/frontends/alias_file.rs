use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap as Map;

use crate::{
    discovery::ConfigDocument,
    hasher,
    models::{
        BuildSpec, CommandAlias, ConditionalOverride, Container, Overwrite, Volume,
        DEFAULT_WORKING_DIR,
    },
    services::ConfigFrontend,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct AliasFile {
    #[serde(default)]
    pub volumes: Map<String, VolumeTemplate>,

    // Containers are parsed individually so one malformed entry doesn't
    // take the rest of the document down with it.
    #[serde(default)]
    pub containers: Map<String, serde_yaml::Value>,

    #[serde(default)]
    pub keep_volumes: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct VolumeTemplate {
    pub driver: Option<String>,

    #[serde(default)]
    pub driver_opts: Map<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ContainerEntry {
    pub image: Option<String>,

    pub build: Option<BuildEntry>,

    #[serde(default)]
    pub commands: Vec<CommandEntry>,

    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub environment: Vec<String>,

    #[serde(default)]
    pub networks: Vec<String>,

    #[serde(default)]
    pub ports: Vec<String>,

    pub entrypoint: Option<String>,

    pub env_file: Option<String>,

    pub user: Option<String>,

    pub working_dir: Option<String>,

    #[serde(default)]
    pub stay_in_root: bool,

    pub privileged: Option<bool>,

    #[serde(default)]
    pub inject_user_switcher: bool,

    pub auto_rebuild_images: Option<bool>,

    #[serde(default)]
    pub quiet: bool,

    pub pre_exec_hook_command: Option<String>,

    pub post_exec_hook_command: Option<String>,

    #[serde(default)]
    pub command_pattern_conditional_config: Vec<ConditionalEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BuildEntry {
    pub context: String,
    pub dockerfile: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum CommandEntry {
    Name(String),
    Spec(Map<String, CommandSpec>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CommandSpec {
    pub path: Option<String>,

    #[serde(default)]
    pub default_params: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ConditionalEntry {
    pub command_pattern: String,

    pub entrypoint: Option<String>,

    pub env_file: Option<String>,

    pub pre_exec_hook_command: Option<String>,

    pub post_exec_hook_command: Option<String>,

    pub quiet: Option<bool>,

    pub working_dir: Option<String>,

    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub environment: Vec<String>,

    pub user: Option<String>,

    pub inject_user_switcher: Option<bool>,

    #[serde(default)]
    pub networks: Vec<String>,

    #[serde(default)]
    pub ports: Vec<String>,

    pub stay_in_root: Option<bool>,
}

pub struct AliasFileFrontend;

impl AliasFileFrontend {
    pub fn new() -> AliasFileFrontend {
        AliasFileFrontend
    }

    pub fn containers_from_documents(&mut self, documents: &[ConfigDocument]) -> Vec<Container> {
        documents
            .iter()
            .flat_map(|document| self.containers(document))
            .collect()
    }
}

impl ConfigFrontend for AliasFileFrontend {
    fn containers(&mut self, document: &ConfigDocument) -> Vec<Container> {
        let file: AliasFile = match serde_yaml::from_value(document.declarations.clone()) {
            Ok(file) => file,
            Err(err) => {
                warn!(
                    "declaration file {:?} has an unexpected shape: {}",
                    document.path, err
                );
                return Vec::new();
            }
        };

        let global_volumes = global_volume_templates(&file);

        let fs_location = document
            .path
            .parent()
            .map(|dir| dir.to_path_buf())
            .unwrap_or_default();
        let fs_location_hash = hasher::location_hash(&fs_location);
        let docker_compose_project_name = fs_location
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut containers = Vec::new();
        for (container_name, value) in &file.containers {
            let entry: ContainerEntry = match serde_yaml::from_value(value.clone()) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        "skipping container {:?} in {:?}: {}",
                        container_name, document.path, err
                    );
                    continue;
                }
            };

            containers.push(Container {
                name: container_name.clone(),
                image: entry.image.clone(),
                build: entry.build.as_ref().map(|build| BuildSpec {
                    context: build.context.clone(),
                    dockerfile: build.dockerfile.clone(),
                }),
                commands: build_commands(&entry.commands),
                volumes: build_volumes(&entry.volumes, &global_volumes),
                environment: entry.environment.clone(),
                networks: entry.networks.clone(),
                ports: entry.ports.clone(),
                entrypoint: entry.entrypoint.clone(),
                env_file: entry.env_file.clone(),
                user: entry.user.clone(),
                working_dir: entry
                    .working_dir
                    .clone()
                    .unwrap_or_else(|| DEFAULT_WORKING_DIR.to_string()),
                stay_in_root: entry.stay_in_root,
                privileged: entry.privileged.unwrap_or(true),
                inject_user_switcher: entry.inject_user_switcher,
                keep_volumes: file.keep_volumes,
                auto_rebuild_images: entry.auto_rebuild_images.unwrap_or(true),
                quiet: entry.quiet,
                pre_exec_hook_command: entry.pre_exec_hook_command.clone(),
                post_exec_hook_command: entry.post_exec_hook_command.clone(),
                fs_location: fs_location.clone(),
                fs_location_hash: fs_location_hash.clone(),
                docker_compose_project_name: docker_compose_project_name.clone(),
                conditional_config_containers: build_conditionals(
                    &entry.command_pattern_conditional_config,
                    &global_volumes,
                ),
            });
        }

        containers
    }
}

fn global_volume_templates(file: &AliasFile) -> Map<String, Volume> {
    let mut templates = Map::new();
    for (volume_key, template) in &file.volumes {
        if let Some(driver) = &template.driver {
            templates.insert(
                volume_key.clone(),
                Volume::DriverBacked {
                    name: volume_key.clone(),
                    driver: driver.clone(),
                    driver_opts: template.driver_opts.clone(),
                    target: String::new(),
                },
            );
        }
    }
    templates
}

fn build_commands(entries: &[CommandEntry]) -> Vec<CommandAlias> {
    let mut commands = Vec::new();
    for entry in entries {
        match entry {
            CommandEntry::Name(name) => commands.push(CommandAlias {
                name: name.clone(),
                path: None,
                default_params: Vec::new(),
            }),
            CommandEntry::Spec(spec) => {
                // Single-key mapping: the key is the alias name.
                if let Some((name, spec)) = spec.iter().next() {
                    commands.push(CommandAlias {
                        name: name.clone(),
                        path: spec.path.clone(),
                        default_params: spec.default_params.clone(),
                    });
                }
            }
        }
    }
    commands
}

/// Container volume strings are `source:target` pairs; when the left side
/// names a global driver-backed volume template, the template is cloned
/// with the target filled in.
fn build_volumes(entries: &[String], global_volumes: &Map<String, Volume>) -> Vec<Volume> {
    let mut volumes = Vec::new();
    for entry in entries {
        let mut partials = entry.splitn(2, ':');
        let source = match partials.next() {
            Some(source) if !source.is_empty() => source,
            _ => continue,
        };
        let target = match partials.next() {
            Some(target) if !target.is_empty() => target,
            _ => {
                warn!("volume entry {:?} has no target, skipping", entry);
                continue;
            }
        };

        match global_volumes.get(source) {
            Some(Volume::DriverBacked {
                name,
                driver,
                driver_opts,
                ..
            }) => volumes.push(Volume::DriverBacked {
                name: name.clone(),
                driver: driver.clone(),
                driver_opts: driver_opts.clone(),
                target: target.to_string(),
            }),
            _ => volumes.push(Volume::Simple {
                source: source.to_string(),
                target: target.to_string(),
            }),
        }
    }
    volumes
}

fn build_conditionals(
    entries: &[ConditionalEntry],
    global_volumes: &Map<String, Volume>,
) -> Vec<ConditionalOverride> {
    entries
        .iter()
        .map(|entry| ConditionalOverride {
            command_pattern: entry.command_pattern.clone(),
            overwrite: Overwrite {
                entrypoint: entry.entrypoint.clone(),
                env_file: entry.env_file.clone(),
                pre_exec_hook_command: entry.pre_exec_hook_command.clone(),
                post_exec_hook_command: entry.post_exec_hook_command.clone(),
                quiet: entry.quiet,
                working_dir: entry.working_dir.clone(),
                volumes: build_volumes(&entry.volumes, global_volumes),
                environment: entry.environment.clone(),
                user: entry.user.clone(),
                inject_user_switcher: entry.inject_user_switcher,
                networks: entry.networks.clone(),
                ports: entry.ports.clone(),
                stay_in_root: entry.stay_in_root,
            },
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct AliasTarget {
    pub container: Container,
    pub command: Option<CommandAlias>,
}

/// Flattened alias lookup across every resolved container. Containers are
/// visited in discovery order, so entries from deeper documents overwrite
/// shallower ones. A container's own name resolves too, but an explicit
/// command alias with the same name shadows it.
pub fn alias_table(containers: &[Container]) -> Map<String, AliasTarget> {
    let mut table = Map::new();
    for container in containers {
        table.insert(
            container.name.clone(),
            AliasTarget {
                container: container.clone(),
                command: None,
            },
        );
        for command in &container.commands {
            table.insert(
                command.name.clone(),
                AliasTarget {
                    container: container.clone(),
                    command: Some(command.clone()),
                },
            );
        }
    }
    table
}
