use anyhow::Result;
use std::{collections::BTreeMap as Map, path::Path};

use crate::{
    discovery::ConfigDocument,
    models::{Container, ContainerName, ImageName, VolumeName},
};

pub trait ConfigFrontend {
    fn containers(&mut self, document: &ConfigDocument) -> Vec<Container>;
}

/// Boundary to the container engine. Implementations never invent engine
/// semantics; every method maps onto one engine operation.
pub trait ContainerBackend {
    fn image_exists(&mut self, name: &ImageName) -> Result<bool>;

    fn pull_image(&mut self, name: &ImageName) -> Result<()>;

    fn build_image(&mut self, name: &ImageName, context: &Path, dockerfile: &Path) -> Result<()>;

    fn list_containers(&mut self, all: bool) -> Result<Vec<ContainerName>>;

    fn remove_container(&mut self, name: &ContainerName) -> Result<()>;

    fn list_volumes(&mut self) -> Result<Vec<VolumeName>>;

    fn create_volume(
        &mut self,
        name: &VolumeName,
        driver: &str,
        driver_opts: &Map<String, String>,
    ) -> Result<()>;

    fn remove_volume(&mut self, name: &VolumeName) -> Result<()>;

    fn list_networks(&mut self) -> Result<Vec<String>>;
}
