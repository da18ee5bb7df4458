//! `RemoteStorage` over the Solid protocol (LDP containers and resources).

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, IF_NONE_MATCH, LINK};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use dechat_core::address;
use dechat_core::storage::{RemoteStorage, StorageError};
use dechat_core::turtle::Graph;

use crate::config::PodConfig;

pub const LDP_CONTAINS: &str = "http://www.w3.org/ns/ldp#contains";
const BASIC_CONTAINER: &str = "<http://www.w3.org/ns/ldp#BasicContainer>; rel=\"type\"";
const TURTLE: &str = "text/turtle";
const SPARQL_UPDATE: &str = "application/sparql-update";

/// HTTP client for one or more Solid pods, sharing one connection pool.
#[derive(Clone)]
pub struct SolidPod {
    client: Client,
    token: Option<String>,
}

impl SolidPod {
    pub fn new(config: &PodConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            token: config.access_token.clone(),
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn send(&self, path: &str, builder: RequestBuilder) -> Result<Response, StorageError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| StorageError::Transport(format!("{}: {}", path, e)))?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            debug!("{} answered {}", path, status);
            Err(status_error(path, status))
        }
    }

    async fn text(&self, path: &str) -> Result<String, StorageError> {
        let resp = self
            .send(path, self.request(Method::GET, path).header(ACCEPT, TURTLE))
            .await?;
        resp.text()
            .await
            .map_err(|e| StorageError::Transport(format!("{}: {}", path, e)))
    }

    async fn put(&self, path: &str, body: &str, create_only: bool) -> Result<(), StorageError> {
        let mut builder = self
            .request(Method::PUT, path)
            .header(CONTENT_TYPE, TURTLE)
            .body(body.to_string());
        if create_only {
            builder = builder.header(IF_NONE_MATCH, "*");
        }
        self.send(path, builder).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match self.send(path, self.request(Method::DELETE, path)).await {
            Ok(_) => Ok(()),
            Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Apply a SPARQL update to the resource at `path`.
    pub async fn patch(&self, path: &str, update: &str) -> Result<(), StorageError> {
        let builder = self
            .request(Method::PATCH, path)
            .header(CONTENT_TYPE, SPARQL_UPDATE)
            .body(update.to_string());
        self.send(path, builder).await.map(|_| ())
    }

    /// Fetch and parse a Turtle document.
    pub async fn graph(&self, path: &str) -> Result<Graph, StorageError> {
        let body = self.text(path).await?;
        Graph::parse(&body, path)
            .map_err(|e| StorageError::Transport(format!("unreadable document {}: {}", path, e)))
    }
}

#[async_trait]
impl RemoteStorage for SolidPod {
    async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        let builder = self
            .request(Method::PUT, path)
            .header(CONTENT_TYPE, TURTLE)
            .header(LINK, BASIC_CONTAINER);
        match self.send(path, builder).await {
            Ok(_) => Ok(()),
            // a concurrent create got there first
            Err(StorageError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_file(&self, path: &str, body: &str) -> Result<(), StorageError> {
        self.put(path, body, true).await
    }

    async fn read_folder(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let body = self.text(path).await?;
        container_entries(&body, path)
    }

    async fn read_file(&self, path: &str) -> Result<String, StorageError> {
        self.text(path).await
    }

    async fn update_file(&self, path: &str, body: &str) -> Result<(), StorageError> {
        self.put(path, body, false).await
    }

    async fn delete_folder(&self, path: &str) -> Result<(), StorageError> {
        let entries = match self.read_folder(path).await {
            Ok(entries) => entries,
            Err(StorageError::NotFound(_)) => {
                warn!("Folder {} already gone", path);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for entry in entries {
            if entry.ends_with('/') {
                self.delete_folder(&entry).await?;
            } else {
                self.delete(&entry).await?;
            }
        }
        self.delete(&address::acl_resource(path)).await?;
        self.delete(path).await
    }
}

fn status_error(path: &str, status: StatusCode) -> StorageError {
    let path = path.to_string();
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => StorageError::NotFound(path),
        StatusCode::UNAUTHORIZED => StorageError::Unauthorized(path),
        StatusCode::FORBIDDEN => StorageError::Forbidden(path),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => StorageError::AlreadyExists(path),
        other => StorageError::Status {
            path,
            status: other.as_u16(),
        },
    }
}

/// Members of the container at `url`, as absolute URLs, sorted.
fn container_entries(body: &str, url: &str) -> Result<Vec<String>, StorageError> {
    let graph = Graph::parse(body, url)
        .map_err(|e| StorageError::Transport(format!("unreadable listing of {}: {}", url, e)))?;
    let mut entries: Vec<String> = graph
        .objects(url, LDP_CONTAINS)
        .filter_map(|term| term.as_iri())
        .map(str::to_string)
        .collect();
    entries.sort();
    entries.dedup();
    Ok(entries)
}
