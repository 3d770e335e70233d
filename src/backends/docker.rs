use anyhow::{anyhow, Context, Result};
use log::debug;
use std::{
    collections::BTreeMap as Map,
    path::Path,
    process::{Command, Stdio},
};

use crate::{
    models::{ContainerName, ImageName, VolumeName},
    services::ContainerBackend,
};

/// Talks to the engine through the `docker` command line client. The run
/// sub-command itself is executed elsewhere (it has to share the caller's
/// terminal); everything here is query/mutation plumbing.
pub struct DockerBackend {
    docker_bin: String,
    quiet: bool,
}

impl DockerBackend {
    pub fn connect(quiet: bool) -> Result<DockerBackend> {
        let backend = DockerBackend {
            docker_bin: "docker".to_string(),
            quiet,
        };

        let probe = Command::new(&backend.docker_bin)
            .args(&["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .context("Couldn't execute the docker client. Is docker installed?")?;
        if !probe.status.success() {
            return Err(anyhow!(
                "The docker daemon is not reachable. Is it running?"
            ));
        }
        debug!(
            "connected to docker {}",
            String::from_utf8_lossy(&probe.stdout).trim()
        );

        Ok(backend)
    }

    fn output_lines(&self, args: &[&str]) -> Result<Vec<String>> {
        let output = Command::new(&self.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Couldn't execute docker {}.", args.join(" ")))?;

        if !output.status.success() {
            return Err(anyhow!(
                "docker {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn run_checked(&self, args: &[&str]) -> Result<()> {
        self.output_lines(args).map(|_| ())
    }

    // The engine normalizes untagged references to `:latest`; tag listings
    // always carry an explicit tag.
    fn normalize_tag(name: &ImageName) -> String {
        if name.0.contains(':') {
            name.0.clone()
        } else {
            format!("{}:latest", name.0)
        }
    }
}

impl ContainerBackend for DockerBackend {
    fn image_exists(&mut self, name: &ImageName) -> Result<bool> {
        let wanted = Self::normalize_tag(name);
        let tags = self.output_lines(&[
            "image",
            "ls",
            "--all",
            "--format",
            "{{.Repository}}:{{.Tag}}",
        ])?;
        Ok(tags.iter().any(|tag| *tag == wanted))
    }

    fn pull_image(&mut self, name: &ImageName) -> Result<()> {
        let mut command = Command::new(&self.docker_bin);
        command.args(&["pull", &name.0]).stdin(Stdio::null());
        if self.quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = command
            .status()
            .context("Couldn't execute the docker client.")?;
        if !status.success() {
            return Err(anyhow!("Pulling image {} failed.", name.0));
        }
        Ok(())
    }

    fn build_image(&mut self, name: &ImageName, context: &Path, dockerfile: &Path) -> Result<()> {
        let mut command = Command::new(&self.docker_bin);
        command
            .arg("build")
            .arg("--rm")
            .arg("--tag")
            .arg(&name.0)
            .arg("--file")
            .arg(dockerfile)
            .arg(context)
            .stdin(Stdio::null());
        if self.quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = command
            .status()
            .context("Couldn't execute the docker client.")?;
        if !status.success() {
            return Err(anyhow!(
                "Building image {} from {:?} failed.",
                name.0,
                dockerfile
            ));
        }
        Ok(())
    }

    fn list_containers(&mut self, all: bool) -> Result<Vec<ContainerName>> {
        let mut args = vec!["ps", "--format", "{{.Names}}"];
        if all {
            args.insert(1, "--all");
        }

        let names = self.output_lines(&args)?;
        Ok(names.into_iter().map(ContainerName).collect())
    }

    fn remove_container(&mut self, name: &ContainerName) -> Result<()> {
        self.run_checked(&["rm", "--force", &name.0])
    }

    fn list_volumes(&mut self) -> Result<Vec<VolumeName>> {
        let names = self.output_lines(&["volume", "ls", "--format", "{{.Name}}"])?;
        Ok(names.into_iter().map(VolumeName).collect())
    }

    fn create_volume(
        &mut self,
        name: &VolumeName,
        driver: &str,
        driver_opts: &Map<String, String>,
    ) -> Result<()> {
        let mut args = vec![
            "volume".to_string(),
            "create".to_string(),
            "--driver".to_string(),
            driver.to_string(),
        ];
        for (key, value) in driver_opts {
            args.push("--opt".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(name.0.clone());

        let arg_refs: Vec<&str> = args.iter().map(|arg| arg.as_str()).collect();
        self.run_checked(&arg_refs)
    }

    fn remove_volume(&mut self, name: &VolumeName) -> Result<()> {
        self.run_checked(&["volume", "rm", "--force", &name.0])
    }

    fn list_networks(&mut self) -> Result<Vec<String>> {
        self.output_lines(&["network", "ls", "--format", "{{.Name}}"])
    }
}
