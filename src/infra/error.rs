use std::path::PathBuf;

use thiserror::Error;

use crate::store::contracts::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to read config file at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to read fixture file at {path}: {source}")]
    FixtureRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture file at {path}: {source}")]
    FixtureParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to seed store from fixture: {0}")]
    FixtureSeed(#[source] StoreError),
    #[error("failed to initialize logging: {0}")]
    LoggingInit(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
