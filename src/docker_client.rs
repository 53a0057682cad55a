use crate::{config::Settings, error::Result, image::DockerImage};
use docker_api::{
    models::{ContainerInspect200Response, ImageBuildChunk, NetworkSettings},
    opts::{
        ContainerCreateOpts, ContainerRemoveOpts, ContainerStopOpts, ImageFilter, ImageListOpts,
        PullOpts,
    },
    Container, Docker,
};
use futures_util::StreamExt;
use log::{debug, info};
use std::{
    collections::HashMap,
    fmt::Display,
    sync::{PoisonError, RwLock},
};

pub(crate) struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    pub(crate) fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            docker: Docker::new(&settings.docker_host)?,
        })
    }

    pub(crate) async fn image_exists_locally(&self, image: &DockerImage) -> Result<bool> {
        let images = self
            .docker
            .images()
            .list(
                &ImageListOpts::builder()
                    .filter(vec![ImageFilter::from(image)])
                    .build(),
            )
            .await?;
        Ok(!images.is_empty())
    }

    pub(crate) async fn pull(&self, image: &DockerImage) -> Result<()> {
        let images = self.docker.images();
        let opts = PullOpts::builder().image(image.get_full_name()).build();
        let mut stream = images.pull(&opts);
        while let Some(chunk) = stream.next().await {
            debug!("{}", Loggable::from(chunk?));
        }
        Ok(())
    }

    pub(crate) async fn create(&self, opts: &ContainerCreateOpts) -> Result<ContainerClient> {
        let container = self.docker.containers().create(opts).await?;
        Ok(ContainerClient::new(container))
    }
}

struct Loggable {
    message: String,
}

impl From<ImageBuildChunk> for Loggable {
    fn from(chunk: ImageBuildChunk) -> Self {
        let message = match chunk {
            ImageBuildChunk::Update { stream } => format!("Update: {stream}"),
            ImageBuildChunk::Error {
                error,
                error_detail,
            } => format!("Error: {error}: {}", error_detail.message),
            ImageBuildChunk::Digest { aux } => format!("Digest: {}", aux.id),
            ImageBuildChunk::PullStatus {
                status,
                id,
                progress,
                progress_detail: _,
            } => format!(
                "Pull: {status} {} {}",
                id.unwrap_or_default(),
                progress.unwrap_or_default()
            ),
        };
        Loggable { message }
    }
}

impl Display for Loggable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "🐋 {}", self.message.trim())
    }
}

pub(crate) struct ContainerClient {
    inner_container: Container,
    running_state: RwLock<Option<RunningState>>,
}

impl ContainerClient {
    fn new(container: Container) -> Self {
        ContainerClient {
            inner_container: container,
            running_state: RwLock::new(None),
        }
    }

    pub(crate) fn id(&self) -> String {
        self.inner_container.id().to_string()
    }

    pub(crate) async fn start(&self) -> Result<()> {
        self.inner_container.start().await?;
        Ok(())
    }

    /// Writes `bytes` at `path` inside the container through the archive API,
    /// so the daemon doesn't need to see the client filesystem.
    pub(crate) async fn copy_file_into(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.inner_container.copy_file_into(path, bytes).await?;
        debug!("🐋 Copied {} bytes to {path}", bytes.len());
        Ok(())
    }

    /// Inspects the container and remembers the outcome as its running state.
    pub(crate) async fn refresh(&self) -> Result<RunningState> {
        let inspect = self.inner_container.inspect().await?;
        let state = RunningState::from(inspect);
        self.set_running_state(state.running.then(|| state.clone()));
        Ok(state)
    }

    pub(crate) fn running_state(&self) -> Option<RunningState> {
        self.running_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) async fn stop(&self) -> Result<()> {
        self.inner_container
            .stop(&ContainerStopOpts::builder().build())
            .await?;
        let name = self.forget();
        info!("🐋 Container {name} is stopped");
        Ok(())
    }

    pub(crate) async fn kill(&self) -> Result<()> {
        self.inner_container
            .stop(&ContainerStopOpts::builder().signal("SIGKILL").build())
            .await?;
        let name = self.forget();
        info!("🐋 Container {name} killed");
        Ok(())
    }

    pub(crate) async fn remove(&self) -> Result<()> {
        self.inner_container
            .remove(&ContainerRemoveOpts::builder().force(true).volumes(true).build())
            .await?;
        let name = self.forget();
        info!("🐋 Container {name} removed");
        Ok(())
    }

    fn set_running_state(&self, state: Option<RunningState>) {
        *self
            .running_state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn forget(&self) -> String {
        let mut rw_state = self
            .running_state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        rw_state
            .take()
            .map_or_else(|| self.inner_container.id().to_string(), |s| s.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RunningState {
    pub(crate) name: String,
    pub(crate) running: bool,
    /// Host port published for each container port spec, e.g. `1433/tcp`.
    pub(crate) ports: HashMap<String, u16>,
}

impl From<ContainerInspect200Response> for RunningState {
    fn from(inspect: ContainerInspect200Response) -> Self {
        let running = inspect
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        let name = inspect
            .name
            .map(|name| name.trim_start_matches('/').to_string())
            .or(inspect.id)
            .unwrap_or_default();

        RunningState {
            name,
            running,
            ports: extract_port_mapping(inspect.network_settings),
        }
    }
}

fn extract_port_mapping(network_settings: Option<NetworkSettings>) -> HashMap<String, u16> {
    let Some(ports) = network_settings.and_then(|settings| settings.ports) else {
        return HashMap::new();
    };
    ports
        .into_iter()
        .filter_map(|(container_port_spec, bindings)| {
            // prefer the IPv4 binding, docker also reports one on `::`
            let host_port = bindings?
                .into_iter()
                .filter(|binding| {
                    binding
                        .host_ip
                        .as_deref()
                        .map_or(true, |ip| !ip.contains(':'))
                })
                .find_map(|binding| binding.host_port?.parse::<u16>().ok())?;
            Some((container_port_spec, host_port))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_ipv4_published_ports() {
        let settings: NetworkSettings = serde_json::from_value(json!({
            "Ports": {
                "1433/tcp": [
                    { "HostIp": "::", "HostPort": "32769" },
                    { "HostIp": "0.0.0.0", "HostPort": "32768" }
                ],
                "1434/udp": null
            }
        }))
        .unwrap();

        let mapping = extract_port_mapping(Some(settings));

        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("1433/tcp"), Some(&32768));
    }

    #[test]
    fn running_state_from_inspect() {
        let inspect: ContainerInspect200Response = serde_json::from_value(json!({
            "Id": "0f3e",
            "Name": "/sleepy_mssql",
            "State": { "Running": true }
        }))
        .unwrap();

        let state = RunningState::from(inspect);

        assert_eq!(state.name, "sleepy_mssql");
        assert!(state.running);
        assert!(state.ports.is_empty());
    }

    #[test]
    fn exited_container_is_not_running() {
        let inspect: ContainerInspect200Response = serde_json::from_value(json!({
            "Id": "0f3e",
            "State": { "Running": false, "Status": "exited" }
        }))
        .unwrap();

        let state = RunningState::from(inspect);

        assert_eq!(state.name, "0f3e");
        assert!(!state.running);
    }
}
