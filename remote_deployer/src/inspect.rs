//! Read-only view of the containers of the local container engine, answered as
//! JSON values.

use std::collections::HashMap;

use bollard::{
    container::{InspectContainerOptions, ListContainersOptions},
    errors::Error as BollardError,
    secret::{ContainerInspectResponse, ContainerSummary, MountPoint, PortBinding},
    Docker,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stacked_errors::{Result, StackableErr};

/// Connects to the engine with the default socket or `DOCKER_HOST`
pub async fn connect_docker() -> Result<Docker> {
    // this can touch the filesystem, keep it off the async workers
    tokio::task::spawn_blocking(|| Docker::connect_with_defaults().stack())
        .await
        .stack()?
}

/// A container as it appears in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub name: String,
    pub id: String,
}

/// The reduced description of one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDescription {
    pub name: String,
    #[serde(rename = "short hash")]
    pub short_id: String,
    /// The first tag of the image, or the image reference the container was
    /// created from when the image is untagged
    pub image: String,
    #[serde(rename = "port")]
    pub ports: HashMap<String, Option<Vec<PortBinding>>>,
    pub created: Option<String>,
    #[serde(rename = "volumes")]
    pub mounts: Vec<MountPoint>,
}

/// Docker reports names with a leading slash
fn strip_name(name: &str) -> String {
    name.strip_prefix('/').unwrap_or(name).to_owned()
}

/// Docker clients show the first 12 hex digits
pub fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

impl ContainerEntry {
    pub fn from_summary(summary: &ContainerSummary) -> Self {
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|name| strip_name(name))
            .unwrap_or_default();
        Self {
            name,
            id: summary.id.clone().unwrap_or_default(),
        }
    }
}

impl ContainerDescription {
    pub fn from_inspect(record: &ContainerInspectResponse, image_tags: &[String]) -> Self {
        let image = image_tags
            .first()
            .cloned()
            .or_else(|| record.config.as_ref().and_then(|c| c.image.clone()))
            .unwrap_or_default();
        Self {
            name: record.name.as_deref().map(strip_name).unwrap_or_default(),
            short_id: record.id.as_deref().map(short_id).unwrap_or_default(),
            image,
            ports: record
                .network_settings
                .as_ref()
                .and_then(|n| n.ports.clone())
                .unwrap_or_default(),
            created: record.created.clone(),
            mounts: record.mounts.clone().unwrap_or_default(),
        }
    }
}

/// Answers `{"containers": [{"name", "id"}, ..]}`, stopped containers are only
/// included if `all`
#[tracing::instrument(skip(docker))]
pub async fn list_containers(docker: &Docker, all: bool) -> Result<Value> {
    let summaries = docker
        .list_containers(Some(ListContainersOptions::<String> {
            all,
            ..Default::default()
        }))
        .await
        .stack_err("list_containers -> engine request failed")?;
    let containers: Vec<ContainerEntry> =
        summaries.iter().map(ContainerEntry::from_summary).collect();
    Ok(json!({ "containers": containers }))
}

/// Answers `{"id": record}` for the container `id`, where the record is the
/// full inspection if `all` and a [ContainerDescription] otherwise. An unknown
/// container answers `{}`.
#[tracing::instrument(skip(docker))]
pub async fn describe_container(docker: &Docker, id: &str, all: bool) -> Result<Value> {
    let record = match docker
        .inspect_container(id, None::<InspectContainerOptions>)
        .await
    {
        Ok(record) => record,
        Err(BollardError::DockerResponseServerError {
            status_code: 404, ..
        }) => return Ok(json!({})),
        Err(e) => {
            return Err(e)
                .stack_err_with(|| format!("describe_container(id: {id}) -> request failed"))
        }
    };
    let record = if all {
        serde_json::to_value(&record).stack()?
    } else {
        let tags = match record.image.as_deref() {
            Some(image) => docker
                .inspect_image(image)
                .await
                .ok()
                .and_then(|image| image.repo_tags)
                .unwrap_or_default(),
            None => vec![],
        };
        serde_json::to_value(ContainerDescription::from_inspect(&record, &tags)).stack()?
    };
    Ok(json!({ "id": record }))
}
