pub use self::docker::DockerBackend;

mod docker;
