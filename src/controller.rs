use anyhow::{anyhow, Result};
use crossterm::style::{Colorize, Styler};
use log::warn;
use number_prefix::NumberPrefix;
use std::path::{Path, PathBuf};

use crate::{
    discovery, exec, hasher,
    invocation::{self, RunRequest},
    models::{BuildPolicy, BuildSpec, CommandAlias, Container, ContainerName, ImageName, Volume},
    services::ContainerBackend,
    settings::{self, Settings},
};

const ENGINE_BIN: &str = "docker";

pub struct Controller {
    backend: Box<dyn ContainerBackend>,
    settings: Settings,
    settings_path: PathBuf,
    quiet: bool,
}

impl Controller {
    pub fn init<B>(
        backend: B,
        settings: Settings,
        settings_path: PathBuf,
        quiet: bool,
    ) -> Controller
    where
        B: 'static + ContainerBackend,
    {
        Controller {
            backend: Box::new(backend),
            settings,
            settings_path,
            quiet,
        }
    }

    /// Resolves the image for a container: built images carry the
    /// namespaced tag and are rebuilt according to the policy, external
    /// images are pulled when the tag is missing locally.
    pub fn ensure_image(
        &mut self,
        container: &Container,
        build_policy: BuildPolicy,
    ) -> Result<ImageName> {
        match &container.build {
            Some(build) => {
                let image = container.built_image_name();
                let rebuild = match build_policy {
                    BuildPolicy::Always => true,
                    BuildPolicy::IfChanged => {
                        !self.backend.image_exists(&image)?
                            || self.image_needs_rebuild(container, build, &image)?
                    }
                };

                if rebuild {
                    self.build_image(container, build, &image)?;
                }
                Ok(image)
            }
            None => {
                let image = container
                    .image
                    .clone()
                    .map(ImageName)
                    .ok_or_else(|| {
                        anyhow!(
                            "Container {:?} declares neither a build nor an image.",
                            container.name
                        )
                    })?;

                if !self.backend.image_exists(&image)? {
                    if !self.quiet && !container.quiet {
                        println!("{} {}", "Pulling image".cyan().bold(), image.0);
                    }
                    self.backend.pull_image(&image)?;
                }
                Ok(image)
            }
        }
    }

    // Only locally anchored contexts participate in change tracking; an
    // absolute context is assumed to be managed by whoever owns that path.
    fn image_needs_rebuild(
        &mut self,
        container: &Container,
        build: &BuildSpec,
        image: &ImageName,
    ) -> Result<bool> {
        if !build.context.starts_with('.') {
            return Ok(false);
        }
        if !container.auto_rebuild_images {
            return Ok(false);
        }

        let recorded = match self.settings.build_hash(&image.0) {
            Some(recorded) => recorded.to_string(),
            None => return Ok(true),
        };

        let (current, _) = hasher::tree_hash(build_hash_dir(container, build))?;
        Ok(recorded != current)
    }

    fn build_image(
        &mut self,
        container: &Container,
        build: &BuildSpec,
        image: &ImageName,
    ) -> Result<()> {
        let context = build_context(container, build);
        let dockerfile = context.join(&build.dockerfile);

        if !self.quiet && !container.quiet {
            println!("{} {}", "Building image".green().bold(), image.0);
        }
        self.backend.build_image(image, &context, &dockerfile)?;

        let (hash, hashed_size) = hasher::tree_hash(build_hash_dir(container, build))?;
        if !self.quiet && !container.quiet {
            match NumberPrefix::binary(hashed_size as f32) {
                NumberPrefix::Standalone(bytes) => {
                    println!("Hashed build context ({} bytes)", bytes)
                }
                NumberPrefix::Prefixed(prefix, n) => {
                    println!("Hashed build context ({:.1} {}B)", n, prefix)
                }
            }
        }

        self.settings.set_build_hash(&image.0, hash);
        self.settings.save_to(&self.settings_path)?;
        Ok(())
    }

    /// The full run flow: resolve the image, tear down leftovers, create
    /// volumes, execute in the foreground and clean up. Cleanup runs on
    /// every exit path, including failure and interrupt.
    pub fn run(
        &mut self,
        container: &Container,
        command: Option<&CommandAlias>,
        attributes: &[String],
        current_dir: &Path,
    ) -> Result<i32> {
        let image = self.ensure_image(container, BuildPolicy::IfChanged)?;

        let running = self.backend.list_containers(false)?;
        let run_name = invocation::collision_suffixed_name(&container.container_name(), &running);

        self.remove_container_if_exists(&run_name)?;
        self.create_volumes(container)?;

        let external_networks = self.backend.list_networks()?;
        let interactive = exec::stdin_is_tty();
        let user_switcher = settings::user_switcher_path()
            .ok()
            .filter(|path| path.is_file());

        let request = RunRequest {
            container,
            image: &image,
            run_name: &run_name,
            command,
            attributes,
            interactive,
            external_networks: &external_networks,
            current_dir,
            user_switcher: user_switcher.as_deref(),
            uid: discovery::host_uid(),
        };
        let arguments = invocation::run_arguments(&request);

        if let Some(hook) = &container.pre_exec_hook_command {
            if let Err(err) = exec::run_hook(hook) {
                warn!("pre-exec hook failed: {:#}", err);
            }
        }

        if !self.quiet && !container.quiet {
            println!(
                "{} {} {}",
                "Executing:".cyan().bold(),
                ENGINE_BIN,
                arguments.join(" ")
            );
        }

        let run_result = exec::run_foreground(ENGINE_BIN, &arguments, interactive);

        if !container.keep_volumes {
            if let Err(err) = self.remove_volumes(container) {
                warn!("volume cleanup failed: {:#}", err);
            }
        }
        if let Err(err) = self.remove_container_if_exists(&run_name) {
            warn!("container cleanup failed: {:#}", err);
        }

        if let Some(hook) = &container.post_exec_hook_command {
            if let Err(err) = exec::run_hook(hook) {
                warn!("post-exec hook failed: {:#}", err);
            }
        }

        run_result
    }

    fn remove_container_if_exists(&mut self, name: &ContainerName) -> Result<()> {
        let existing = self.backend.list_containers(true)?;
        if existing.iter().any(|candidate| candidate == name) {
            self.backend.remove_container(name)?;
        }
        Ok(())
    }

    fn create_volumes(&mut self, container: &Container) -> Result<()> {
        let existing = self.backend.list_volumes()?;
        for volume in &container.volumes {
            if let Volume::DriverBacked {
                name,
                driver,
                driver_opts,
                ..
            } = volume
            {
                let volume_name = container.volume_name(name);
                if !existing.contains(&volume_name) {
                    self.backend.create_volume(&volume_name, driver, driver_opts)?;
                }
            }
        }
        Ok(())
    }

    fn remove_volumes(&mut self, container: &Container) -> Result<()> {
        let existing = self.backend.list_volumes()?;
        for volume in &container.volumes {
            if let Volume::DriverBacked { name, .. } = volume {
                let volume_name = container.volume_name(name);
                if existing.contains(&volume_name) {
                    self.backend.remove_volume(&volume_name)?;
                }
            }
        }
        Ok(())
    }
}

fn build_context(container: &Container, build: &BuildSpec) -> PathBuf {
    let context = build.context.as_str();
    if context == "." {
        container.fs_location.clone()
    } else if let Some(stripped) = context.strip_prefix("./") {
        container.fs_location.join(stripped)
    } else if context.starts_with('/') {
        PathBuf::from(context)
    } else {
        container.fs_location.join(context)
    }
}

// Change tracking hashes the directory the dockerfile lives in, which may
// be a subdirectory of the context.
fn build_hash_dir(container: &Container, build: &BuildSpec) -> PathBuf {
    let context = build_context(container, build);
    let dockerfile = context.join(&build.dockerfile);
    dockerfile
        .parent()
        .map(|parent| parent.to_path_buf())
        .unwrap_or(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VolumeName;
    use std::{cell::RefCell, collections::BTreeMap as Map, fs, rc::Rc};
    use tempfile::TempDir;

    #[derive(Default)]
    struct BackendState {
        images: Vec<String>,
        calls: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct RecordingBackend {
        state: Rc<RefCell<BackendState>>,
    }

    impl RecordingBackend {
        fn with_images(images: &[&str]) -> RecordingBackend {
            let backend = RecordingBackend::default();
            backend.state.borrow_mut().images =
                images.iter().map(|image| image.to_string()).collect();
            backend
        }

        fn calls(&self) -> Vec<String> {
            self.state.borrow().calls.clone()
        }
    }

    impl ContainerBackend for RecordingBackend {
        fn image_exists(&mut self, name: &ImageName) -> Result<bool> {
            Ok(self.state.borrow().images.contains(&name.0))
        }

        fn pull_image(&mut self, name: &ImageName) -> Result<()> {
            self.state.borrow_mut().calls.push(format!("pull {}", name.0));
            Ok(())
        }

        fn build_image(
            &mut self,
            name: &ImageName,
            _context: &Path,
            _dockerfile: &Path,
        ) -> Result<()> {
            self.state.borrow_mut().calls.push(format!("build {}", name.0));
            Ok(())
        }

        fn list_containers(&mut self, _all: bool) -> Result<Vec<ContainerName>> {
            Ok(Vec::new())
        }

        fn remove_container(&mut self, name: &ContainerName) -> Result<()> {
            self.state.borrow_mut().calls.push(format!("rm {}", name.0));
            Ok(())
        }

        fn list_volumes(&mut self) -> Result<Vec<VolumeName>> {
            Ok(Vec::new())
        }

        fn create_volume(
            &mut self,
            name: &VolumeName,
            _driver: &str,
            _driver_opts: &Map<String, String>,
        ) -> Result<()> {
            self.state
                .borrow_mut()
                .calls
                .push(format!("volume create {}", name.0));
            Ok(())
        }

        fn remove_volume(&mut self, name: &VolumeName) -> Result<()> {
            self.state
                .borrow_mut()
                .calls
                .push(format!("volume rm {}", name.0));
            Ok(())
        }

        fn list_networks(&mut self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn test_container(fs_location: &Path) -> Container {
        Container {
            name: "tool".into(),
            image: None,
            build: None,
            commands: Vec::new(),
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
            quiet: true,
            pre_exec_hook_command: None,
            post_exec_hook_command: None,
            fs_location: fs_location.to_path_buf(),
            fs_location_hash: "12345678".into(),
            docker_compose_project_name: "project".into(),
            conditional_config_containers: Vec::new(),
        }
    }

    fn controller(backend: RecordingBackend, dir: &TempDir) -> Controller {
        Controller::init(
            backend,
            Settings::default(),
            dir.path().join("settings.json"),
            true,
        )
    }

    #[test]
    fn missing_built_image_triggers_a_build_never_a_pull() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let mut container = test_container(dir.path());
        container.build = Some(BuildSpec {
            context: ".".into(),
            dockerfile: "Dockerfile".into(),
        });

        let backend = RecordingBackend::default();
        let mut controller = controller(backend.clone(), &dir);

        let image = controller
            .ensure_image(&container, BuildPolicy::IfChanged)
            .unwrap();
        assert_eq!(image.0, "docker_shim_12345678_tool:latest");
        assert_eq!(
            backend.calls(),
            vec!["build docker_shim_12345678_tool:latest"]
        );
    }

    #[test]
    fn missing_external_image_triggers_a_pull_never_a_build() {
        let dir = TempDir::new().unwrap();
        let mut container = test_container(dir.path());
        container.image = Some("alpine:3.12".into());

        let backend = RecordingBackend::default();
        let mut controller = controller(backend.clone(), &dir);

        let image = controller
            .ensure_image(&container, BuildPolicy::IfChanged)
            .unwrap();
        assert_eq!(image.0, "alpine:3.12");
        assert_eq!(backend.calls(), vec!["pull alpine:3.12"]);
    }

    #[test]
    fn present_external_image_is_not_pulled_again() {
        let dir = TempDir::new().unwrap();
        let mut container = test_container(dir.path());
        container.image = Some("alpine:3.12".into());

        let backend = RecordingBackend::with_images(&["alpine:3.12"]);
        let mut controller = controller(backend.clone(), &dir);

        controller
            .ensure_image(&container, BuildPolicy::IfChanged)
            .unwrap();
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn unchanged_build_tree_skips_the_rebuild() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let mut container = test_container(dir.path());
        container.build = Some(BuildSpec {
            context: ".".into(),
            dockerfile: "Dockerfile".into(),
        });
        let image = container.built_image_name();

        let (hash, _) = hasher::tree_hash(dir.path()).unwrap();
        let mut settings = Settings::default();
        settings.set_build_hash(&image.0, hash);

        let backend = RecordingBackend::with_images(&[image.0.as_str()]);
        let mut controller = Controller::init(
            backend.clone(),
            settings,
            dir.path().join("settings.json"),
            true,
        );

        controller
            .ensure_image(&container, BuildPolicy::IfChanged)
            .unwrap();
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn changed_build_tree_triggers_a_rebuild() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let mut container = test_container(dir.path());
        container.build = Some(BuildSpec {
            context: ".".into(),
            dockerfile: "Dockerfile".into(),
        });
        let image = container.built_image_name();

        let mut settings = Settings::default();
        settings.set_build_hash(&image.0, "stale".into());

        let backend = RecordingBackend::with_images(&[image.0.as_str()]);
        let mut controller = Controller::init(
            backend.clone(),
            settings,
            dir.path().join("settings.json"),
            true,
        );

        controller
            .ensure_image(&container, BuildPolicy::IfChanged)
            .unwrap();
        assert_eq!(backend.calls(), vec![format!("build {}", image.0)]);
    }

    #[test]
    fn absolute_build_context_never_auto_rebuilds() {
        let dir = TempDir::new().unwrap();
        let context = dir.path().join("ctx");
        fs::create_dir_all(&context).unwrap();
        fs::write(context.join("Dockerfile"), "FROM scratch\n").unwrap();

        let mut container = test_container(dir.path());
        container.build = Some(BuildSpec {
            context: context.to_string_lossy().into_owned(),
            dockerfile: "Dockerfile".into(),
        });
        let image = container.built_image_name();

        let backend = RecordingBackend::with_images(&[image.0.as_str()]);
        let mut controller = controller(backend.clone(), &dir);

        controller
            .ensure_image(&container, BuildPolicy::IfChanged)
            .unwrap();
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn neither_build_nor_image_is_an_error() {
        let dir = TempDir::new().unwrap();
        let container = test_container(dir.path());

        let backend = RecordingBackend::default();
        let mut controller = controller(backend, &dir);

        assert!(controller
            .ensure_image(&container, BuildPolicy::IfChanged)
            .is_err());
    }

    #[test]
    fn forced_build_policy_always_rebuilds() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let mut container = test_container(dir.path());
        container.build = Some(BuildSpec {
            context: ".".into(),
            dockerfile: "Dockerfile".into(),
        });
        let image = container.built_image_name();

        let (hash, _) = hasher::tree_hash(dir.path()).unwrap();
        let mut settings = Settings::default();
        settings.set_build_hash(&image.0, hash);

        let backend = RecordingBackend::with_images(&[image.0.as_str()]);
        let mut controller = Controller::init(
            backend.clone(),
            settings,
            dir.path().join("settings.json"),
            true,
        );

        controller
            .ensure_image(&container, BuildPolicy::Always)
            .unwrap();
        assert_eq!(backend.calls(), vec![format!("build {}", image.0)]);
    }
}
