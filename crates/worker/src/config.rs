//! Environment-driven worker configuration.
//!
//! Everything is read through a lookup function so tests can feed a map;
//! [`WorkerConfig::from_env`] uses the process environment. Empty values
//! count as missing.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use sweeper_infra::TaskKind;
use sweeper_infra::store::PgSettings;

use crate::cli::Role;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DRIVE_DB_HOST: &str = "DRIVE_DB_HOST";
pub const DRIVE_DB_PORT: &str = "DRIVE_DB_PORT";
pub const DRIVE_DB_USER: &str = "DRIVE_DB_USER";
pub const DRIVE_DB_PASS: &str = "DRIVE_DB_PASS";
pub const DRIVE_DB_NAME: &str = "DRIVE_DB_NAME";
pub const BROKER_URL: &str = "BROKER_URL";
pub const AMQP_SERVER: &str = "AMQP_SERVER";
pub const NODE_ENV: &str = "NODE_ENV";
pub const MARK_DELETED_ITEMS_QUEUE_NAME: &str = "MARK_DELETED_ITEMS_QUEUE_NAME";
pub const FOLDERS_MAX_ENQUEUED: &str = "TASK_MARK_DELETED_ITEMS_PRODUCER_MAX_ENQUEUED_ITEMS";
pub const FOLDERS_MAX_CONCURRENT: &str = "TASK_MARK_DELETED_ITEMS_CONSUMER_MAX_CONCURRENT_ITEMS";
pub const FILES_MAX_ENQUEUED: &str = "TASK_DELETE_FILES_PRODUCER_MAX_ENQUEUED_ITEMS";
pub const FILES_MAX_CONCURRENT: &str = "TASK_DELETE_FILES_CONSUMER_MAX_CONCURRENT_ITEMS";
pub const GATEWAY_ENDPOINT: &str = "NETWORK_GATEWAY_DELETE_FILES_ENDPOINT";
pub const GATEWAY_SECRET: &str = "NETWORK_GATEWAY_DELETE_FILES_SECRET";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing env var: {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub endpoint: String,
    /// Base64 of a PEM RSA private key.
    pub secret: String,
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSettings {
    Producer { max_queue_size: u64 },
    Consumer {
        max_concurrent: usize,
        gateway: Option<GatewaySettings>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub task: TaskKind,
    pub database: PgSettings,
    pub broker_url: String,
    pub queue_name: String,
    pub role: RoleSettings,
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &'static str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.required(key)?;
        raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
    }

    fn positive<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
        T::Err: fmt::Display,
    {
        let value: T = self.parsed(key)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }
}

impl WorkerConfig {
    pub fn from_env(task: TaskKind, role: Role) -> Result<Self, ConfigError> {
        Self::from_lookup(task, role, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(task: TaskKind, role: Role, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database = match env.optional(DATABASE_URL) {
            Some(url) => PgSettings::Url(url),
            None => PgSettings::Parts {
                host: env.required(DRIVE_DB_HOST)?,
                port: env.parsed(DRIVE_DB_PORT)?,
                user: env.required(DRIVE_DB_USER)?,
                password: env.required(DRIVE_DB_PASS)?,
                database: env.required(DRIVE_DB_NAME)?,
            },
        };

        let broker_url = env
            .optional(BROKER_URL)
            .or_else(|| env.optional(AMQP_SERVER))
            .ok_or(ConfigError::Missing(BROKER_URL))?;

        let (queue_name, max_enqueued_key, max_concurrent_key) = match task {
            TaskKind::DeleteFolders => (
                env.required(MARK_DELETED_ITEMS_QUEUE_NAME)?,
                FOLDERS_MAX_ENQUEUED,
                FOLDERS_MAX_CONCURRENT,
            ),
            TaskKind::DeleteFiles => (
                format!("{}-{}", task.as_str(), env.required(NODE_ENV)?),
                FILES_MAX_ENQUEUED,
                FILES_MAX_CONCURRENT,
            ),
        };

        let role = match role {
            Role::Producer => RoleSettings::Producer {
                max_queue_size: env.positive(max_enqueued_key)?,
            },
            Role::Consumer => RoleSettings::Consumer {
                max_concurrent: env.positive(max_concurrent_key)?,
                gateway: match task {
                    TaskKind::DeleteFolders => None,
                    TaskKind::DeleteFiles => Some(GatewaySettings {
                        endpoint: env.required(GATEWAY_ENDPOINT)?,
                        secret: env.required(GATEWAY_SECRET)?,
                    }),
                },
            },
        };

        Ok(Self {
            task,
            database,
            broker_url,
            queue_name,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: Vec<(&'static str, &'static str)>) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            (DRIVE_DB_HOST, "localhost"),
            (DRIVE_DB_PORT, "5432"),
            (DRIVE_DB_USER, "drive"),
            (DRIVE_DB_PASS, "pass"),
            (DRIVE_DB_NAME, "drive"),
            (AMQP_SERVER, "redis://localhost:6379"),
            (MARK_DELETED_ITEMS_QUEUE_NAME, "mark-deleted-items"),
            (FOLDERS_MAX_ENQUEUED, "1000"),
            (FOLDERS_MAX_CONCURRENT, "10"),
            (NODE_ENV, "production"),
            (FILES_MAX_ENQUEUED, "500"),
            (FILES_MAX_CONCURRENT, "4"),
            (GATEWAY_ENDPOINT, "https://gateway.internal/v1/files"),
            (GATEWAY_SECRET, "c2VjcmV0"),
        ]
    }

    fn without(key: &str) -> Vec<(&'static str, &'static str)> {
        base().into_iter().filter(|(k, _)| *k != key).collect()
    }

    #[test]
    fn folder_producer_reads_its_own_keys() {
        let config = WorkerConfig::from_lookup(TaskKind::DeleteFolders, Role::Producer, lookup(base())).unwrap();

        assert_eq!(config.queue_name, "mark-deleted-items");
        assert_eq!(config.broker_url, "redis://localhost:6379");
        assert_eq!(config.role, RoleSettings::Producer { max_queue_size: 1000 });
        assert!(matches!(config.database, PgSettings::Parts { port: 5432, .. }));
    }

    #[test]
    fn file_queue_name_includes_the_environment() {
        let config = WorkerConfig::from_lookup(TaskKind::DeleteFiles, Role::Consumer, lookup(base())).unwrap();

        assert_eq!(config.queue_name, "delete-files-production");
        match config.role {
            RoleSettings::Consumer { max_concurrent, gateway } => {
                assert_eq!(max_concurrent, 4);
                assert_eq!(gateway.unwrap().endpoint, "https://gateway.internal/v1/files");
            }
            other => panic!("unexpected role settings {other:?}"),
        }
    }

    #[test]
    fn database_url_overrides_parts() {
        let mut pairs = without(DRIVE_DB_HOST);
        pairs.push((DATABASE_URL, "postgres://drive@db/drive"));
        let config = WorkerConfig::from_lookup(TaskKind::DeleteFolders, Role::Consumer, lookup(pairs)).unwrap();

        assert_eq!(config.database, PgSettings::Url("postgres://drive@db/drive".into()));
    }

    #[test]
    fn broker_url_takes_precedence_over_amqp_server() {
        let mut pairs = base();
        pairs.push((BROKER_URL, "redis://broker:6379"));
        let config = WorkerConfig::from_lookup(TaskKind::DeleteFolders, Role::Producer, lookup(pairs)).unwrap();

        assert_eq!(config.broker_url, "redis://broker:6379");
    }

    #[test]
    fn missing_keys_are_named() {
        let err = WorkerConfig::from_lookup(TaskKind::DeleteFolders, Role::Producer, lookup(without(FOLDERS_MAX_ENQUEUED)))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing(FOLDERS_MAX_ENQUEUED));

        let err = WorkerConfig::from_lookup(TaskKind::DeleteFiles, Role::Consumer, lookup(without(GATEWAY_SECRET)))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing(GATEWAY_SECRET));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut pairs = without(MARK_DELETED_ITEMS_QUEUE_NAME);
        pairs.push((MARK_DELETED_ITEMS_QUEUE_NAME, "   "));
        let err = WorkerConfig::from_lookup(TaskKind::DeleteFolders, Role::Consumer, lookup(pairs)).unwrap_err();

        assert_eq!(err, ConfigError::Missing(MARK_DELETED_ITEMS_QUEUE_NAME));
    }

    #[test]
    fn numbers_must_parse_and_be_positive() {
        let mut pairs = without(FOLDERS_MAX_CONCURRENT);
        pairs.push((FOLDERS_MAX_CONCURRENT, "ten"));
        let err = WorkerConfig::from_lookup(TaskKind::DeleteFolders, Role::Consumer, lookup(pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: FOLDERS_MAX_CONCURRENT, .. }));

        let mut pairs = without(FOLDERS_MAX_CONCURRENT);
        pairs.push((FOLDERS_MAX_CONCURRENT, "0"));
        let err = WorkerConfig::from_lookup(TaskKind::DeleteFolders, Role::Consumer, lookup(pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: FOLDERS_MAX_CONCURRENT, .. }));
    }

    #[test]
    fn producer_does_not_need_gateway_settings() {
        let pairs: Vec<_> = base()
            .into_iter()
            .filter(|(k, _)| *k != GATEWAY_ENDPOINT && *k != GATEWAY_SECRET)
            .collect();
        assert!(WorkerConfig::from_lookup(TaskKind::DeleteFiles, Role::Producer, lookup(pairs)).is_ok());
    }
}
