//! SurrealDB Handle - Connection management
//!
//! A [`StoreTarget`] says where the Mnemos tables live: an authenticated
//! remote server, a bare URL, or the embedded file store under `.mnemos/db`.
//! Every connection runs the idempotent schema migration before returning.

use crate::error::StateError;
use crate::migrations;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

const DEFAULT_NAMESPACE: &str = "mnemos";
const DEFAULT_DATABASE: &str = "main";
const DEFAULT_LOCAL_PATH: &str = ".mnemos/db";

/// Credentials for a remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAuth {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Sign in as a root user instead of a database user.
    pub root: bool,
}

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// `SURREALDB_ENDPOINT`, `SURREALDB_USERNAME` and `SURREALDB_PASSWORD`
    /// are all set. `SURREALDB_NAMESPACE`, `SURREALDB_DATABASE` and
    /// `SURREALDB_ROOT=true` refine them.
    Remote(RemoteAuth),
    /// `SURREALDB_URL`, e.g. `mem://` or `ws://localhost:8000`.
    Url(String),
    /// Embedded file store.
    Local,
}

impl StoreTarget {
    pub fn from_env() -> Self {
        Self::resolve(|name| std::env::var(name).ok())
    }

    /// Resolve a target from a variable lookup. Remote credentials win over
    /// a URL; with neither, the local store is used.
    pub fn resolve(var: impl Fn(&str) -> Option<String>) -> Self {
        let set = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let (Some(endpoint), Some(username), Some(password)) = (
            set("SURREALDB_ENDPOINT"),
            set("SURREALDB_USERNAME"),
            set("SURREALDB_PASSWORD"),
        ) {
            return StoreTarget::Remote(RemoteAuth {
                endpoint,
                username,
                password,
                namespace: set("SURREALDB_NAMESPACE")
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                database: set("SURREALDB_DATABASE")
                    .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
                root: set("SURREALDB_ROOT").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            });
        }
        match set("SURREALDB_URL") {
            Some(url) => StoreTarget::Url(url),
            None => StoreTarget::Local,
        }
    }
}

/// Connected SurrealDB client with the Mnemos schema in place.
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// Connect to SurrealDB in-memory and set up schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        info!("Connecting to SurrealDB (in-memory)");
        Self::connect_url("mem://").await
    }

    /// Connect to the target named by the `SURREALDB_*` environment.
    #[instrument(skip_all)]
    pub async fn setup_from_env() -> Result<Self> {
        Self::open(StoreTarget::from_env()).await
    }

    pub async fn open(target: StoreTarget) -> Result<Self> {
        match target {
            StoreTarget::Remote(auth) => {
                info!(endpoint = %auth.endpoint, namespace = %auth.namespace, root = auth.root, "Connecting to remote SurrealDB");
                Self::connect(&auth.endpoint, Some(&auth)).await
            }
            StoreTarget::Url(url) => {
                info!("SURREALDB_URL found, connecting to {}", url);
                Self::connect_url(&url).await
            }
            StoreTarget::Local => {
                std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
                    StateError::Connection(format!(
                        "Failed to create database directory {}: {}",
                        DEFAULT_LOCAL_PATH, e
                    ))
                })?;
                let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
                info!("Using local persistence: {}", url);
                Self::connect_url(&url).await
            }
        }
    }

    /// Connect to any URL understood by `surrealdb::engine::any`.
    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(url, None).await
    }

    async fn connect(url: &str, auth: Option<&RemoteAuth>) -> Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        let (namespace, database) = match auth {
            Some(auth) => {
                let signin = if auth.root {
                    db.signin(Root {
                        username: &auth.username,
                        password: &auth.password,
                    })
                    .await
                } else {
                    db.signin(Database {
                        namespace: &auth.namespace,
                        database: &auth.database,
                        username: &auth.username,
                        password: &auth.password,
                    })
                    .await
                };
                signin.map_err(|e| StateError::Connection(format!("Authentication failed: {}", e)))?;
                (auth.namespace.as_str(), auth.database.as_str())
            }
            None => (DEFAULT_NAMESPACE, DEFAULT_DATABASE),
        };

        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn target(vars: &[(&str, &str)]) -> StoreTarget {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StoreTarget::resolve(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_remote_credentials_take_priority() {
        let resolved = target(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_USERNAME", "svc"),
            ("SURREALDB_PASSWORD", "secret"),
            ("SURREALDB_ROOT", "TRUE"),
            ("SURREALDB_URL", "mem://"),
        ]);
        match resolved {
            StoreTarget::Remote(auth) => {
                assert_eq!(auth.namespace, "mnemos");
                assert_eq!(auth.database, "main");
                assert!(auth.root);
            }
            other => panic!("expected remote target, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_credentials_fall_back() {
        let resolved = target(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_USERNAME", "svc"),
            ("SURREALDB_URL", "mem://"),
        ]);
        assert_eq!(resolved, StoreTarget::Url("mem://".to_string()));
        assert_eq!(target(&[("SURREALDB_URL", " ")]), StoreTarget::Local);
        assert_eq!(target(&[]), StoreTarget::Local);
    }
}
