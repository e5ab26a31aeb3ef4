//! Service configuration.
//!
//! Values are layered: built-in defaults, then the YAML file named by `--config`, then
//! `EVENTHUB_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `EVENTHUB_LIFECYCLE__PAYMENT_TIMEOUT=30m`).

use crate::db::store::UnitBudget;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Event-ticketing transaction lifecycle service")]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short = 'f', long = "config", env = "EVENTHUB_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub lifecycle: LifecycleConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
    pub storage: StorageConfig,
    pub cors: CorsConfig,
    pub enable_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4400,
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            lifecycle: LifecycleConfig::default(),
            scheduler: SchedulerConfig::default(),
            notifications: NotificationsConfig::default(),
            storage: StorageConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// In-process store; state is lost on shutdown
    Memory,
    External {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::External {
            url: "postgres://localhost:5432/eventhub".to_string(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub proxy_header: ProxyHeaderAuthConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            proxy_header: ProxyHeaderAuthConfig::default(),
        }
    }
}

/// Identity headers set by the authenticating proxy in front of the service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyHeaderAuthConfig {
    pub user_header: String,
    pub role_header: String,
}

impl Default for ProxyHeaderAuthConfig {
    fn default() -> Self {
        Self {
            user_header: "x-eventhub-user".to_string(),
            role_header: "x-eventhub-role".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a new transaction waits for a payment proof
    #[serde(with = "humantime_serde")]
    pub payment_timeout: Duration,
    /// How long the organizer has to accept or reject once proof is uploaded
    #[serde(with = "humantime_serde")]
    pub decision_window: Duration,
    /// Extra time past the decision deadline before the transaction is auto-canceled
    #[serde(with = "humantime_serde")]
    pub stale_grace: Duration,
    /// Lifetime of earned points
    #[serde(with = "humantime_serde")]
    pub points_validity: Duration,
    pub budgets: BudgetsConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(2 * 60 * 60),
            decision_window: Duration::from_secs(3 * 24 * 60 * 60),
            stale_grace: Duration::from_secs(3 * 24 * 60 * 60),
            points_validity: Duration::from_secs(90 * 24 * 60 * 60),
            budgets: BudgetsConfig::default(),
        }
    }
}

/// Unit-of-work budgets per operation kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetsConfig {
    pub create: UnitBudget,
    pub payment_proof: UnitBudget,
    pub decision: UnitBudget,
    pub cancel: UnitBudget,
    pub sweep_item: UnitBudget,
    pub read: UnitBudget,
    /// Organizer edits to events, ticket types and vouchers
    pub catalog: UnitBudget,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        let secs = Duration::from_secs;
        Self {
            create: UnitBudget::new(secs(20), secs(60)),
            payment_proof: UnitBudget::new(secs(10), secs(30)),
            decision: UnitBudget::new(secs(10), secs(30)),
            cancel: UnitBudget::new(secs(5), secs(10)),
            sweep_item: UnitBudget::new(secs(5), secs(10)),
            read: UnitBudget::new(secs(5), secs(10)),
            catalog: UnitBudget::new(secs(5), secs(10)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Period of the expiry / auto-cancel / points sweeps
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Period of the notification outbox drain
    #[serde(with = "humantime_serde")]
    pub notification_interval: Duration,
    /// Only one replica runs the scheduler, chosen through a Postgres advisory lock
    pub leader_election: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            notification_interval: Duration::from_secs(5 * 60),
            leader_election: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    pub from: String,
    pub transport: MailTransportConfig,
    /// Delivery attempts before an outbox row is marked FAILED
    pub max_attempts: i32,
    /// Rows picked up per drain
    pub batch_size: i64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            from: "EventHub <no-reply@eventhub.local>".to_string(),
            transport: MailTransportConfig::default(),
            max_attempts: 3,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MailTransportConfig {
    /// Log messages instead of sending them
    #[default]
    Log,
    /// Write each message as a `.eml` file into `directory`
    File { directory: PathBuf },
    Smtp {
        host: String,
        #[serde(default = "default_smtp_port")]
        port: u16,
        username: Option<String>,
        password: Option<String>,
    },
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory,
    Local {
        directory: PathBuf,
        /// Prefix joined with the stored file name to form the proof URL
        public_base_url: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            directory: PathBuf::from("data/payment-proofs"),
            public_base_url: "/static/payment-proofs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Config = Self::figment(args).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("EVENTHUB_").split("__"))
    }

    fn validate(&self) -> Result<(), figment::Error> {
        if self.notifications.max_attempts < 1 {
            return Err(figment::Error::from("notifications.max_attempts must be at least 1".to_string()));
        }
        if self.scheduler.interval.is_zero() || self.scheduler.notification_interval.is_zero() {
            return Err(figment::Error::from("scheduler intervals must be non-zero".to_string()));
        }
        if self.lifecycle.payment_timeout.is_zero() {
            return Err(figment::Error::from("lifecycle.payment_timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
