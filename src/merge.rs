use crate::models::{Container, Overwrite};

/// Produces the effective configuration for one invocation. Conditional
/// rules are scanned in declared order and the first whose pattern is a
/// prefix of the invoked command line wins; later matches are ignored.
/// The base container is never mutated.
pub fn merge(container: &Container, invoked_command_line: &str) -> Container {
    for conditional in &container.conditional_config_containers {
        if invoked_command_line.starts_with(&conditional.command_pattern) {
            return apply(container.clone(), &conditional.overwrite);
        }
    }

    container.clone()
}

// One-way overlay: a field only applies when it carries a value. Empty and
// false override values leave the base untouched, so a rule can add or
// replace but never erase.
fn apply(mut container: Container, overwrite: &Overwrite) -> Container {
    if let Some(entrypoint) = non_empty(&overwrite.entrypoint) {
        container.entrypoint = Some(entrypoint);
    }
    if let Some(env_file) = non_empty(&overwrite.env_file) {
        container.env_file = Some(env_file);
    }
    if let Some(hook) = non_empty(&overwrite.pre_exec_hook_command) {
        container.pre_exec_hook_command = Some(hook);
    }
    if let Some(hook) = non_empty(&overwrite.post_exec_hook_command) {
        container.post_exec_hook_command = Some(hook);
    }
    if overwrite.quiet == Some(true) {
        container.quiet = true;
    }
    if let Some(working_dir) = non_empty(&overwrite.working_dir) {
        container.working_dir = working_dir;
    }
    if !overwrite.volumes.is_empty() {
        container.volumes = overwrite.volumes.clone();
    }
    if !overwrite.environment.is_empty() {
        container.environment = overwrite.environment.clone();
    }
    if let Some(user) = non_empty(&overwrite.user) {
        container.user = Some(user);
    }
    if overwrite.inject_user_switcher == Some(true) {
        container.inject_user_switcher = true;
    }
    if !overwrite.networks.is_empty() {
        container.networks = overwrite.networks.clone();
    }
    if !overwrite.ports.is_empty() {
        container.ports = overwrite.ports.clone();
    }
    if overwrite.stay_in_root == Some(true) {
        container.stay_in_root = true;
    }

    container
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}
