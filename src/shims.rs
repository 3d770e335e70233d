use anyhow::{Context, Result};
use log::{info, warn};
use std::{
    collections::BTreeSet as Set,
    env, fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crate::{
    discovery,
    frontends::AliasFileFrontend,
    models::Container,
    settings::Settings,
};

const SHIM_BODY: &str = "#!/usr/bin/env bash\ndocker-shim run $0 $@\n";

/// The directory of proxy executables. Each entry redirects an invocation
/// of its own basename back into the tool's run sub-command.
pub struct ShimDirectory {
    root: PathBuf,
}

impl ShimDirectory {
    pub fn new(root: PathBuf) -> ShimDirectory {
        ShimDirectory { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Creation is idempotent: an existing shim is left untouched so
    /// externally adjusted permissions survive the reconciliation loop.
    pub fn create(&self, name: &str) -> Result<()> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.root)
            .with_context(|| format!("Couldn't create shim directory {:?}.", self.root))?;

        let path = self.root.join(&name);
        if path.is_file() {
            return Ok(());
        }

        fs::write(&path, SHIM_BODY)
            .with_context(|| format!("Couldn't write shim {:?}.", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o775))
                .with_context(|| format!("Couldn't mark shim {:?} executable.", path))?;
        }

        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Ok(());
        }

        let path = self.root.join(&name);
        if path.is_file() {
            fs::remove_file(&path)
                .with_context(|| format!("Couldn't remove shim {:?}.", path))?;
        }
        Ok(())
    }

    pub fn remove_all(&self) -> Result<()> {
        for name in self.list() {
            self.remove(&name)?;
        }
        Ok(())
    }

    /// Converges the directory onto `desired`: extraneous shims are
    /// removed, missing ones created. Calling it again with the same set
    /// changes nothing.
    pub fn sync(&self, desired: &Set<String>) -> Result<()> {
        let desired: Set<String> = desired
            .iter()
            .map(|name| normalize_name(name))
            .filter(|name| !name.is_empty())
            .collect();

        for existing in self.list() {
            if !desired.contains(&existing) {
                self.remove(&existing)?;
            }
        }

        for name in &desired {
            self.create(name)?;
        }

        Ok(())
    }
}

// Shims are flat files; path separators in an alias would escape the
// directory.
fn normalize_name(name: &str) -> String {
    name.replace('/', "")
}

/// The set of shim names declared across the given containers: each
/// command alias by name, or the container's own name when it declares no
/// commands.
pub fn desired_shims(containers: &[Container]) -> Set<String> {
    let mut desired = Set::new();
    for container in containers {
        if container.commands.is_empty() {
            desired.insert(container.name.clone());
        } else {
            for command in &container.commands {
                desired.insert(command.name.clone());
            }
        }
    }
    desired
}

/// One reconciliation pass: re-resolve all known documents and converge
/// the shim directory onto the declared command set.
pub fn reconcile(shims: &ShimDirectory) -> Result<()> {
    let settings = Settings::load()?;
    let current_dir = env::current_dir()?;
    let documents = discovery::find_documents(&current_dir, &settings.yaml_paths);
    let containers = AliasFileFrontend::new().containers_from_documents(&documents);

    shims.sync(&desired_shims(&containers))
}

/// The reconciliation loop. Every tick is independent: a failing pass is
/// logged and the next tick starts fresh, so the daemon survives transient
/// configuration breakage indefinitely.
pub fn run_daemon(shims: &ShimDirectory, interval: Duration) -> Result<()> {
    // Stale shims from a previous run never survive a restart.
    shims.remove_all()?;
    info!("reconciling shims in {:?} every {:?}", shims.root(), interval);

    loop {
        if let Err(err) = reconcile(shims) {
            warn!("shim reconciliation failed: {:#}", err);
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn desired(names: &[&str]) -> Set<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn sync_converges_from_any_prior_state() {
        let dir = TempDir::new().unwrap();
        let shims = ShimDirectory::new(dir.path().to_path_buf());

        shims.create("stale").unwrap();
        shims.create("kept").unwrap();

        shims.sync(&desired(&["kept", "fresh"])).unwrap();
        assert_eq!(shims.list(), vec!["fresh", "kept"]);
    }

    #[test]
    fn sync_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let shims = ShimDirectory::new(dir.path().to_path_buf());

        shims.sync(&desired(&["tool"])).unwrap();

        // A second pass must leave an externally customized shim alone.
        let path = dir.path().join("tool");
        fs::write(&path, "#!/bin/sh\ncustom\n").unwrap();
        shims.sync(&desired(&["tool"])).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "#!/bin/sh\ncustom\n");
    }

    #[test]
    fn shim_names_are_normalized() {
        let dir = TempDir::new().unwrap();
        let shims = ShimDirectory::new(dir.path().to_path_buf());

        shims.sync(&desired(&["bin/tool"])).unwrap();
        assert_eq!(shims.list(), vec!["bintool"]);
    }

    #[test]
    fn created_shims_redirect_into_the_run_path() {
        let dir = TempDir::new().unwrap();
        let shims = ShimDirectory::new(dir.path().to_path_buf());

        shims.create("tool").unwrap();
        let contents = fs::read_to_string(dir.path().join("tool")).unwrap();
        assert!(contents.starts_with("#!/usr/bin/env bash\n"));
        assert!(contents.contains("docker-shim run $0 $@"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("tool")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o775);
        }
    }

    #[test]
    fn remove_all_empties_the_directory() {
        let dir = TempDir::new().unwrap();
        let shims = ShimDirectory::new(dir.path().to_path_buf());

        shims.sync(&desired(&["a", "b", "c"])).unwrap();
        shims.remove_all().unwrap();
        assert!(shims.list().is_empty());
    }

    #[test]
    fn containers_without_commands_contribute_their_own_name() {
        use crate::models::CommandAlias;

        fn container(name: &str, commands: Vec<CommandAlias>) -> Container {
            Container {
                name: name.into(),
                image: Some("alpine".into()),
                build: None,
                commands,
                volumes: Vec::new(),
                environment: Vec::new(),
                networks: Vec::new(),
                ports: Vec::new(),
                entrypoint: None,
                env_file: None,
                user: None,
                working_dir: "/app".into(),
                stay_in_root: false,
                privileged: true,
                inject_user_switcher: false,
                keep_volumes: false,
                auto_rebuild_images: true,
                quiet: false,
                pre_exec_hook_command: None,
                post_exec_hook_command: None,
                fs_location: std::path::PathBuf::from("/work/project"),
                fs_location_hash: "12345678".into(),
                docker_compose_project_name: "project".into(),
                conditional_config_containers: Vec::new(),
            }
        }

        fn alias(name: &str) -> CommandAlias {
            CommandAlias {
                name: name.into(),
                path: None,
                default_params: Vec::new(),
            }
        }

        let with_commands = container("toolbox", vec![alias("composer"), alias("php")]);
        let bare = container("psql", Vec::new());

        let names = desired_shims(&[with_commands, bare]);
        assert_eq!(names, desired(&["composer", "php", "psql"]));
    }
}
