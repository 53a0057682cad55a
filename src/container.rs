use crate::{
    config::Settings,
    docker_client::{ContainerClient, DockerClient, RunningState},
    error::{Error, Result},
    image::DockerImage,
};
use docker_api::opts::{ContainerCreateOpts, HostPort, PublishPort};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::{io::AsyncReadExt, net::TcpStream};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct GenericContainerBuilder {
    image: DockerImage,
    environment_variables: HashMap<String, String>,
    exposed_ports: HashMap<u16, Option<u16>>,
    files: Vec<FileCopy>,
    labels: HashMap<String, String>,
    wait_strategy_on_startup: ReadyStrategy,
    start_timeout: Option<Duration>,
}

impl GenericContainerBuilder {
    fn new(image: DockerImage) -> Self {
        GenericContainerBuilder {
            image,
            environment_variables: HashMap::new(),
            exposed_ports: HashMap::new(),
            files: Vec::new(),
            labels: HashMap::new(),
            wait_strategy_on_startup: ReadyStrategy::None,
            start_timeout: None,
        }
    }

    pub fn add_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.environment_variables.insert(key.into(), value.into());
        self
    }

    /// Publishes `port/tcp` on a host port picked by the daemon.
    pub fn add_exposed_tcp_port(mut self, port: u16) -> Self {
        self.exposed_ports.insert(port, None);
        self
    }

    /// Binds `container_port/tcp` to `host_port` on every host interface.
    pub fn add_fixed_exposed_tcp_port(mut self, host_port: u16, container_port: u16) -> Self {
        self.exposed_ports.insert(container_port, Some(host_port));
        self
    }

    /// Copies a host file into the container after it is created and before
    /// it starts. Works against remote daemons, unlike a bind mount.
    pub fn add_file_copy<P: AsRef<Path>, S: Into<String>>(
        mut self,
        host_path: P,
        container_path: S,
    ) -> Self {
        self.files.push(FileCopy {
            host_path: host_path.as_ref().to_path_buf(),
            container_path: container_path.into(),
        });
        self
    }

    pub fn add_label<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn wait_for_listening_port(mut self, port: u16) -> Self {
        self.wait_strategy_on_startup = ReadyStrategy::ListeningPort(port);
        self
    }

    /// Overrides `TESTCONTAINERS_STARTUP_TIMEOUT` for this container.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn image(&self) -> &DockerImage {
        &self.image
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment_variables.get(key).map(String::as_str)
    }

    pub fn exposed_ports(&self) -> &HashMap<u16, Option<u16>> {
        &self.exposed_ports
    }

    pub fn files(&self) -> &[FileCopy] {
        &self.files
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn ready_strategy(&self) -> &ReadyStrategy {
        &self.wait_strategy_on_startup
    }

    pub fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout
    }

    /// Pulls the image when missing, creates the container and copies the
    /// requested files into it. Files are read before anything is created.
    pub async fn create_with(self, settings: &Settings) -> Result<GenericContainer> {
        let contents = self
            .files
            .iter()
            .map(|file| {
                std::fs::read(&file.host_path).map_err(|source| Error::CopyFile {
                    path: file.host_path.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let docker = DockerClient::new(settings)?;
        if !docker.image_exists_locally(&self.image).await? {
            info!("🐋 Pulling image {}", self.image);
            docker.pull(&self.image).await?;
        }
        let container = docker.create(&ContainerCreateOpts::from(&self)).await?;
        debug!("🐋 Container {} created from {}", container.id(), self.image);
        let start_timeout = self.start_timeout.unwrap_or(settings.startup_timeout);
        let container = GenericContainer {
            params: self,
            container,
            host: settings.container_host.clone(),
            start_timeout,
        };

        for (file, bytes) in container.params.files.iter().zip(&contents) {
            if let Err(error) = container
                .container
                .copy_file_into(&file.container_path, bytes)
                .await
            {
                return Err(container.discard(error).await);
            }
        }
        Ok(container)
    }
}

impl From<&GenericContainerBuilder> for ContainerCreateOpts {
    fn from(params: &GenericContainerBuilder) -> Self {
        let mut opts = ContainerCreateOpts::builder()
            .image(params.image.get_full_name())
            .env(
                params
                    .environment_variables
                    .iter()
                    .map(|(name, value)| format!("{name}={value}")),
            )
            .labels(params.labels.clone())
            .publish_all_ports();

        for (&container_port, host_port) in &params.exposed_ports {
            let exposed = PublishPort::tcp(container_port.into());
            opts = match host_port {
                Some(host_port) => opts.expose(exposed, HostPort::new((*host_port).into())),
                None => opts.publish(exposed),
            };
        }

        opts.build()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileCopy {
    pub host_path: PathBuf,
    pub container_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadyStrategy {
    /// Ready once `port/tcp` accepts TCP connections from the host.
    ListeningPort(u16),
    None,
}

impl ReadyStrategy {
    pub(crate) async fn wait(
        &self,
        container: &ContainerClient,
        host: &str,
        timeout: Duration,
    ) -> Result<()> {
        let timeout_instant = Instant::now() + timeout;
        loop {
            let state = container.refresh().await?;
            if !state.running {
                return Err(Error::ContainerExited { name: state.name });
            }
            match self {
                ReadyStrategy::ListeningPort(port) => {
                    if let Some(&host_port) = state.ports.get(&tcp_spec(*port)) {
                        if accepts_connections(host, host_port).await {
                            return Ok(());
                        }
                        debug!("🐋 {host}:{host_port} not accepting connections yet");
                    }
                }
                ReadyStrategy::None => return Ok(()),
            }
            if timeout_instant < Instant::now() {
                return Err(Error::StartTimeout {
                    name: state.name,
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// The docker userland proxy accepts connections on a published port before
/// anything listens inside the container, then hangs up. A listener that keeps
/// the connection open (or talks first) is the real server.
async fn accepts_connections(host: &str, port: u16) -> bool {
    let connect = TcpStream::connect((host, port));
    let mut stream = match tokio::time::timeout(PROBE_TIMEOUT, connect).await {
        Ok(Ok(stream)) => stream,
        _ => return false,
    };
    let mut buf = [0u8; 1];
    match tokio::time::timeout(PROBE_TIMEOUT, stream.read(&mut buf)).await {
        Err(_elapsed) => true,
        Ok(Ok(read)) => read > 0,
        Ok(Err(_)) => false,
    }
}

fn tcp_spec(port: u16) -> String {
    format!("{port}/tcp")
}

pub struct GenericContainer {
    params: GenericContainerBuilder,
    container: ContainerClient,
    host: String,
    start_timeout: Duration,
}

impl GenericContainer {
    pub fn from_image(image: DockerImage) -> GenericContainerBuilder {
        GenericContainerBuilder::new(image)
    }

    pub fn id(&self) -> String {
        self.container.id()
    }

    /// Starts the container and blocks until its ready strategy is satisfied.
    pub async fn start(&self) -> Result<()> {
        self.container.start().await?;
        self.params
            .wait_strategy_on_startup
            .wait(&self.container, &self.host, self.start_timeout)
            .await?;
        let name = self
            .container
            .running_state()
            .map_or_else(|| self.id(), |state| state.name);
        info!("🐋 Container {name} is ready");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.container.stop().await
    }

    pub async fn kill(&self) -> Result<()> {
        self.container.kill().await
    }

    /// Force-removes the container. Host and port lookups fail afterwards.
    pub async fn terminate(&self) -> Result<()> {
        self.container.remove().await
    }

    /// Removes a container that failed to come up and hands back the error
    /// that caused it.
    pub async fn discard(&self, error: Error) -> Error {
        if let Err(remove_error) = self.terminate().await {
            warn!(
                "🐋 Unable to remove container {} after failure: {remove_error}",
                self.id()
            );
        }
        error
    }

    /// Inspects the container again. Returns whether it is still running; a
    /// container already stopped or removed through this handle isn't
    /// inspected.
    pub async fn refresh(&self) -> Result<bool> {
        if self.container.running_state().is_none() {
            return Ok(false);
        }
        Ok(self.container.refresh().await?.running)
    }

    /// Host on which published ports are reachable, as of the last inspection.
    pub fn get_host(&self) -> Result<&str> {
        match self.container.running_state() {
            Some(_) => Ok(&self.host),
            None => Err(Error::NotRunning),
        }
    }

    pub fn get_host_port<S: Into<String>>(&self, container_port_spec: S) -> Option<u16> {
        let container_port_spec: String = container_port_spec.into();
        self.container
            .running_state()?
            .ports
            .get(&container_port_spec)
            .copied()
    }

    pub fn get_host_tcp_port(&self, container_port: u16) -> Result<u16> {
        let state = self.container.running_state().ok_or(Error::NotRunning)?;
        resolve_tcp_port(&state, container_port)
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn running_state(&self) -> Option<RunningState> {
        self.container.running_state()
    }
}

pub(crate) fn resolve_tcp_port(state: &RunningState, container_port: u16) -> Result<u16> {
    let spec = tcp_spec(container_port);
    state
        .ports
        .get(&spec)
        .copied()
        .ok_or(Error::PortNotMapped { port: spec })
}
