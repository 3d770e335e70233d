use anyhow::{anyhow, Result};
use crossterm::style::{Colorize, Styler};
use std::{
    collections::BTreeMap as Map,
    env,
    path::PathBuf,
    process,
    sync::atomic::Ordering,
    time::Duration,
};
use structopt::{clap::AppSettings, StructOpt};

use backends::DockerBackend;
use controller::Controller;
use frontends::{alias_table, AliasFileFrontend, AliasTarget};
use invocation::RunRequest;
use models::{BuildPolicy, DECLARATION_FILE_NAME};
use services::ContainerBackend;
use settings::Settings;
use shims::ShimDirectory;

mod backends;
mod controller;
mod discovery;
mod exec;
mod frontends;
mod hasher;
mod invocation;
mod merge;
mod models;
mod services;
mod settings;
mod shims;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "docker-shim",
    about = "Runs aliased commands inside per-project docker containers."
)]
struct Opt {
    /// Only forward output from the container process itself.
    #[structopt(long)]
    quiet: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Registers a declaration file so the shim daemon picks it up.
    Add {
        #[structopt(long, parse(from_os_str))]
        path: Option<PathBuf>,
    },
    /// Unregisters a previously added declaration file.
    Remove {
        #[structopt(long, parse(from_os_str))]
        path: Option<PathBuf>,
    },
    /// Prints every resolvable alias and the invocation it expands to.
    List,
    /// Resolves an alias and executes it inside its container.
    #[structopt(setting = AppSettings::TrailingVarArg)]
    #[structopt(setting = AppSettings::AllowLeadingHyphen)]
    Run {
        alias: String,
        args: Vec<String>,
    },
    /// Builds container images, either one container by name or all.
    Build { name: String },
    /// Keeps the shim directory synchronized with the declared commands.
    Daemon {
        /// Seconds between reconciliation passes.
        #[structopt(long, default_value = "10")]
        interval: u64,

        /// Remove every shim and exit instead of reconciling.
        #[structopt(long)]
        clear: bool,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init_custom_env("LOG");

    let opt = Opt::from_args();
    match opt.command {
        Command::Add { path } => add_path(path),
        Command::Remove { path } => remove_path(path),
        Command::List => list(),
        Command::Run { alias, args } => run(&alias, &args, opt.quiet),
        Command::Build { name } => build(&name, opt.quiet),
        Command::Daemon { interval, clear } => daemon(interval, clear),
    }
}

fn declared_path(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path,
        None => env::current_dir()?.join(DECLARATION_FILE_NAME),
    };

    if !path.to_string_lossy().ends_with(DECLARATION_FILE_NAME) {
        return Err(anyhow!(
            "{:?} does not name a {} file.",
            path,
            DECLARATION_FILE_NAME
        ));
    }
    if !path.is_file() {
        return Err(anyhow!("{:?} does not exist.", path));
    }

    Ok(path.canonicalize()?)
}

fn add_path(path: Option<PathBuf>) -> Result<()> {
    let path = declared_path(path)?;
    let mut settings = Settings::load()?;
    settings.add_yaml_path(path.clone());
    settings.save()?;

    println!("Added {} to the registered declaration files.", path.display());
    Ok(())
}

fn remove_path(path: Option<PathBuf>) -> Result<()> {
    let path = declared_path(path)?;
    let mut settings = Settings::load()?;
    settings.remove_yaml_path(&path);
    settings.save()?;

    println!(
        "Removed {} from the registered declaration files.",
        path.display()
    );
    Ok(())
}

fn resolve_targets(settings: &Settings) -> Result<Map<String, AliasTarget>> {
    let current_dir = env::current_dir()?;
    let documents = discovery::find_documents(&current_dir, &settings.yaml_paths);
    let containers = AliasFileFrontend::new().containers_from_documents(&documents);
    Ok(alias_table(&containers))
}

fn list() -> Result<()> {
    let settings = Settings::load()?;
    let targets = resolve_targets(&settings)?;

    let mut backend = DockerBackend::connect(true)?;
    let external_networks = backend.list_networks()?;
    let running = backend.list_containers(false)?;

    let current_dir = env::current_dir()?;
    let user_switcher = settings::user_switcher_path()
        .ok()
        .filter(|path| path.is_file());
    let uid = discovery::host_uid();

    for (alias, target) in &targets {
        let image = invocation::preview_image(&target.container);
        let run_name =
            invocation::collision_suffixed_name(&target.container.container_name(), &running);

        let request = RunRequest {
            container: &target.container,
            image: &image,
            run_name: &run_name,
            command: target.command.as_ref(),
            attributes: &[],
            interactive: true,
            external_networks: &external_networks,
            current_dir: &current_dir,
            user_switcher: user_switcher.as_deref(),
            uid,
        };
        let arguments = invocation::run_arguments(&request);
        println!("{}: docker {}", alias.as_str().bold(), arguments.join(" "));
    }

    Ok(())
}

fn run(alias: &str, args: &[String], quiet: bool) -> Result<()> {
    // Shims invoke this path with their own $0, so a full path reduces to
    // its basename.
    let wanted = alias.rsplit('/').next().unwrap_or(alias);

    let settings = Settings::load()?;
    let targets = resolve_targets(&settings)?;

    let target = match targets.get(wanted) {
        Some(target) => target,
        None => {
            if !quiet {
                eprintln!("Container {} not found!", wanted);
            }
            process::exit(1);
        }
    };

    let command_line = std::iter::once(wanted.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    let effective = merge::merge(&target.container, &command_line);

    let interrupted = exec::install_interrupt_guard()?;

    let backend = DockerBackend::connect(quiet || effective.quiet)?;
    let mut controller = Controller::init(backend, settings, Settings::default_path()?, quiet);

    let current_dir = env::current_dir()?;
    let code = controller.run(&effective, target.command.as_ref(), args, &current_dir)?;

    if interrupted.load(Ordering::SeqCst) {
        println!();
        println!("{}", "Interrupted.".red().bold());
        process::exit(130);
    }
    process::exit(code);
}

fn build(name: &str, quiet: bool) -> Result<()> {
    let settings = Settings::load()?;
    let current_dir = env::current_dir()?;
    let documents = discovery::find_documents(&current_dir, &settings.yaml_paths);
    let containers = AliasFileFrontend::new().containers_from_documents(&documents);

    let backend = DockerBackend::connect(quiet)?;
    let mut controller = Controller::init(backend, settings, Settings::default_path()?, quiet);

    let mut built_any = false;
    for container in &containers {
        if container.build.is_none() {
            continue;
        }
        if name != "all" && container.name != name {
            continue;
        }

        controller.ensure_image(container, BuildPolicy::Always)?;
        built_any = true;
    }

    if !built_any && name != "all" {
        return Err(anyhow!("No buildable container named {:?} was found.", name));
    }
    Ok(())
}

fn daemon(interval: u64, clear: bool) -> Result<()> {
    let shims = ShimDirectory::new(settings::shim_dir()?);

    if clear {
        shims.remove_all()?;
        println!("Removed all shims from {}.", shims.root().display());
        return Ok(());
    }

    shims::run_daemon(&shims, Duration::from_secs(interval))
}
