use std::path::Path;

use crate::models::{
    CommandAlias, Container, ContainerName, ImageName, Volume, DEFAULT_WORKING_DIR,
    USER_SWITCHER_ENTRYPOINT,
};

/// Everything the synthesizer needs, gathered up front so the argument
/// assembly itself stays a pure function. The resolved run name is threaded
/// through here explicitly instead of living in any process-wide state.
#[derive(Clone, Debug)]
pub struct RunRequest<'a> {
    pub container: &'a Container,
    pub image: &'a ImageName,
    pub run_name: &'a ContainerName,
    pub command: Option<&'a CommandAlias>,
    pub attributes: &'a [String],
    pub interactive: bool,
    pub external_networks: &'a [String],
    pub current_dir: &'a Path,
    pub user_switcher: Option<&'a Path>,
    pub uid: u32,
}

/// Assembles the ordered argument vector for the engine's run sub-command.
/// The order is part of the contract; engines can be sensitive to flag
/// placement and the tests assert exact sequences.
pub fn run_arguments(request: &RunRequest) -> Vec<String> {
    let container = request.container;
    let mut arguments = vec![
        "run".to_string(),
        "--pid=host".to_string(),
        "--rm".to_string(),
        format!("--name={}", request.run_name.0),
    ];

    if request.interactive {
        arguments.push("-it".to_string());
    }

    for volume in &container.volumes {
        arguments.push("-v".to_string());
        arguments.push(volume_mount(container, volume));
    }

    if container.inject_user_switcher {
        if let Some(switcher) = request.user_switcher {
            arguments.push("-v".to_string());
            arguments.push(format!(
                "{}:{}",
                switcher.to_string_lossy(),
                USER_SWITCHER_ENTRYPOINT
            ));
        }
    }

    if let Some(entrypoint) = &container.entrypoint {
        arguments.push("--entrypoint".to_string());
        arguments.push(entrypoint.clone());
    }

    if let Some(env_file) = &container.env_file {
        arguments.push("--env-file".to_string());
        arguments.push(container.fs_location.join(env_file).to_string_lossy().into_owned());
    }

    for environment in &container.environment {
        arguments.push("-e".to_string());
        arguments.push(environment.clone());
    }

    arguments.push("-e".to_string());
    arguments.push(format!("UID_HOST={}", request.uid));

    // An existing compose network for the same project directory is joined
    // opportunistically so aliased commands can reach its services.
    let project_network = format!("{}_default", container.docker_compose_project_name);
    if request
        .external_networks
        .iter()
        .any(|network| *network == project_network)
    {
        arguments.push("--network".to_string());
        arguments.push(project_network);
    }

    for network in &container.networks {
        if network != "default" {
            arguments.push("--network".to_string());
            arguments.push(network.clone());
        }
    }

    for port in &container.ports {
        arguments.push("-p".to_string());
        arguments.push(port.clone());
    }

    arguments.push("-w".to_string());
    arguments.push(working_directory(container, request.current_dir));

    if let Some(user) = &container.user {
        arguments.push("--user".to_string());
        arguments.push(user.clone());
    }

    if container.privileged {
        arguments.push("--privileged".to_string());
    }

    arguments.push(request.image.0.clone());

    if container.inject_user_switcher {
        arguments.push(USER_SWITCHER_ENTRYPOINT.to_string());
    }

    arguments.push(internal_command(container, request.command));

    if let Some(command) = request.command {
        arguments.extend(command.default_params.iter().cloned());
    }

    arguments.extend(request.attributes.iter().cloned());

    arguments
}

/// The executable invoked inside the container: the command's explicit
/// path, else the command alias itself, else the container name.
fn internal_command(container: &Container, command: Option<&CommandAlias>) -> String {
    match command {
        Some(command) => command
            .path
            .clone()
            .unwrap_or_else(|| command.name.clone()),
        None => container.name.clone(),
    }
}

fn volume_mount(container: &Container, volume: &Volume) -> String {
    match volume {
        Volume::Simple { source, target } => format!("{}:{}", source, target),
        Volume::DriverBacked { name, target, .. } => {
            format!("{}:{}", container.volume_name(name).0, target)
        }
    }
}

/// Image reference for display purposes, resolved the same way the run
/// path resolves it but without consulting the engine.
pub fn preview_image(container: &Container) -> ImageName {
    match (&container.build, &container.image) {
        (Some(_), _) => container.built_image_name(),
        (None, Some(image)) => ImageName(image.clone()),
        (None, None) => container.built_image_name(),
    }
}

/// The in-container working directory. Unless the container pins itself to
/// its root, the caller's position below the declaring directory is
/// mirrored inside the container.
pub fn working_directory(container: &Container, current_dir: &Path) -> String {
    if !container.stay_in_root {
        let segment = path_segment(current_dir, &container.fs_location);
        let base = if container.working_dir.is_empty() {
            DEFAULT_WORKING_DIR
        } else {
            container.working_dir.as_str()
        };

        if segment.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base.trim_end_matches('/'), segment)
        }
    } else if !container.working_dir.is_empty() {
        container.working_dir.clone()
    } else {
        DEFAULT_WORKING_DIR.to_string()
    }
}

fn path_segment(current_dir: &Path, fs_location: &Path) -> String {
    current_dir
        .strip_prefix(fs_location)
        .map(|segment| segment.to_string_lossy().trim_matches('/').to_string())
        .unwrap_or_default()
}

/// Suffixes the namespaced name with the number of running containers that
/// already carry it, so concurrent invocations of the same alias from the
/// same directory get distinct engine names.
pub fn collision_suffixed_name(
    base: &ContainerName,
    running: &[ContainerName],
) -> ContainerName {
    let count = running.iter().filter(|name| name.0.contains(&base.0)).count();
    ContainerName(format!("{}_{}", base.0, count))
}
