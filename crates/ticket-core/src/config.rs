//! Configuration for the ticket core
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working setup. Values can be overridden from the environment with the
//! `CAS_TICKETS` prefix and `__` between path segments, e.g.
//! `CAS_TICKETS__POOL__CAPACITY=16` or
//! `CAS_TICKETS__POLICIES__SERVICE_TICKET__NUMBER_OF_USES=2`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{OAuthCodeCompactor, SerializerPool, TicketCipher, TypeTable, DEFAULT_POOL_CAPACITY};
use crate::error::ConfigError;
use crate::expiration::ExpirationPolicy;
use crate::ticket::DefaultUniqueTicketIdGenerator;

pub const ENV_PREFIX: &str = "CAS_TICKETS";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketsConfig {
    pub registry: RegistryConfig,
    pub pool: PoolConfig,
    pub cleaner: CleanerConfig,
    pub compact: CompactConfig,
    pub policies: PoliciesConfig,
    pub id_generator: IdGeneratorConfig,
    pub logging: LoggingSettings,
}

impl TicketsConfig {
    /// Load from an optional file plus the environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: TicketsConfig = settings.try_deserialize()?;
        loaded.validate()?;
        debug!("Loaded ticket configuration: {:?}", loaded);
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.capacity == 0 {
            return Err(ConfigError::Invalid("pool.capacity must be at least 1".to_string()));
        }
        if self.compact.max_length == 0 {
            return Err(ConfigError::Invalid("compact.max_length must be at least 1".to_string()));
        }
        if self.cleaner.enabled && self.cleaner.repeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cleaner.repeat_interval_secs must be at least 1".to_string(),
            ));
        }
        self.registry.cipher()?;
        for (name, policy) in self.policies.iter() {
            policy
                .to_policy()
                .map_err(|e| ConfigError::Invalid(format!("policies.{}: {}", name, e)))?;
        }
        Ok(())
    }
}

/// Logging section, turned into a [`LoggingConfig`](crate::logging::LoggingConfig)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
    pub log_spans: bool,
    /// Per-target filter directives, e.g. `cas_ticket_core::registry=trace`
    pub directives: Vec<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            log_spans: false,
            directives: Vec::new(),
        }
    }
}

/// Registry behavior
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Key store entries by the SHA-512 digest of the ticket id
    pub hash_ticket_ids: bool,
    /// Keep only the latest ticket per service in a session
    pub only_track_most_recent_session: bool,
    /// Hex-encoded AES-256 key; stored frames are encrypted when set
    pub encryption_key: Option<String>,
}

impl RegistryConfig {
    /// Cipher for stored frames, `None` when encryption is off
    pub fn cipher(&self) -> Result<Option<TicketCipher>, ConfigError> {
        self.encryption_key
            .as_deref()
            .map(|key| {
                TicketCipher::from_hex_key(key).map_err(|e| ConfigError::Invalid(format!("registry.encryption_key: {}", e)))
            })
            .transpose()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hash_ticket_ids: false,
            only_track_most_recent_session: true,
            encryption_key: None,
        }
    }
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("hash_ticket_ids", &self.hash_ticket_ids)
            .field("only_track_most_recent_session", &self.only_track_most_recent_session)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Serializer pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
    /// How long `borrow` waits before giving up; waits forever when unset
    pub borrow_timeout_ms: Option<u64>,
    /// Refuse types missing from the registration table
    pub registration_required: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
            borrow_timeout_ms: None,
            registration_required: false,
        }
    }
}

impl PoolConfig {
    pub fn build(&self) -> SerializerPool {
        let table = TypeTable::with_ticket_types()
            .registration_required(self.registration_required)
            .build();
        SerializerPool::with_timeout(table, self.capacity, self.borrow_timeout_ms.map(Duration::from_millis))
    }
}

/// Background cleaner schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    pub enabled: bool,
    pub start_delay_secs: u64,
    pub repeat_interval_secs: u64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay_secs: 20,
            repeat_interval_secs: 120,
        }
    }
}

impl CleanerConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_secs(self.repeat_interval_secs.max(1))
    }
}

/// Compact codec
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactConfig {
    pub max_length: usize,
}

impl Default for CompactConfig {
    fn default() -> Self {
        Self {
            max_length: crate::codec::compact::DEFAULT_MAX_LENGTH,
        }
    }
}

impl CompactConfig {
    pub fn oauth_code_compactor(&self) -> OAuthCodeCompactor {
        OAuthCodeCompactor::new(self.max_length)
    }
}

/// Id generator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdGeneratorConfig {
    pub random_length: usize,
    /// Node suffix appended to every id
    pub suffix: Option<String>,
}

impl Default for IdGeneratorConfig {
    fn default() -> Self {
        Self {
            random_length: DefaultUniqueTicketIdGenerator::DEFAULT_RANDOM_LENGTH,
            suffix: None,
        }
    }
}

impl IdGeneratorConfig {
    pub fn build(&self) -> DefaultUniqueTicketIdGenerator {
        DefaultUniqueTicketIdGenerator::with_settings(self.random_length, self.suffix.clone())
    }
}

/// Expiration policy per ticket kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoliciesConfig {
    pub ticket_granting_ticket: PolicyConfig,
    pub service_ticket: PolicyConfig,
    pub proxy_granting_ticket: PolicyConfig,
    pub proxy_ticket: PolicyConfig,
    pub oauth_code: PolicyConfig,
}

impl PoliciesConfig {
    fn iter(&self) -> impl Iterator<Item = (&'static str, &PolicyConfig)> {
        [
            ("ticket_granting_ticket", &self.ticket_granting_ticket),
            ("service_ticket", &self.service_ticket),
            ("proxy_granting_ticket", &self.proxy_granting_ticket),
            ("proxy_ticket", &self.proxy_ticket),
            ("oauth_code", &self.oauth_code),
        ]
        .into_iter()
    }
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            ticket_granting_ticket: PolicyConfig::ticket_granting(28_800, 7_200),
            service_ticket: PolicyConfig::multi_use(1, 10),
            proxy_granting_ticket: PolicyConfig::ticket_granting(28_800, 7_200),
            proxy_ticket: PolicyConfig::multi_use(1, 10),
            oauth_code: PolicyConfig::multi_use(1, 30),
        }
    }
}

/// Which policy a [`PolicyConfig`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    Never,
    Always,
    HardTimeout,
    Timeout,
    MultiUse,
    Throttled,
    TicketGranting,
}

/// Flat description of an [`ExpirationPolicy`]. Fields a kind does not use are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    pub time_to_kill_seconds: u64,
    pub max_time_to_live_seconds: u64,
    pub number_of_uses: u64,
    pub time_in_between_uses_seconds: u64,
    /// Hard lifetime for remember-me sessions; wraps the policy when set
    pub remember_me_time_to_kill_seconds: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Never,
            time_to_kill_seconds: 0,
            max_time_to_live_seconds: 0,
            number_of_uses: 0,
            time_in_between_uses_seconds: 0,
            remember_me_time_to_kill_seconds: None,
        }
    }
}

impl PolicyConfig {
    pub fn multi_use(number_of_uses: u64, time_to_kill_seconds: u64) -> Self {
        Self {
            kind: PolicyKind::MultiUse,
            number_of_uses,
            time_to_kill_seconds,
            ..Self::default()
        }
    }

    pub fn ticket_granting(max_time_to_live_seconds: u64, time_to_kill_seconds: u64) -> Self {
        Self {
            kind: PolicyKind::TicketGranting,
            max_time_to_live_seconds,
            time_to_kill_seconds,
            ..Self::default()
        }
    }

    pub fn to_policy(&self) -> Result<ExpirationPolicy, ConfigError> {
        let policy = match self.kind {
            PolicyKind::Never => ExpirationPolicy::NeverExpires,
            PolicyKind::Always => ExpirationPolicy::AlwaysExpires,
            PolicyKind::HardTimeout => ExpirationPolicy::hard_timeout(self.time_to_kill_seconds),
            PolicyKind::Timeout => ExpirationPolicy::timeout(self.time_to_kill_seconds),
            PolicyKind::MultiUse => {
                if self.number_of_uses == 0 {
                    return Err(ConfigError::Invalid("number_of_uses must be at least 1".to_string()));
                }
                ExpirationPolicy::multi_time_use_or_timeout(self.number_of_uses, self.time_to_kill_seconds)
            }
            PolicyKind::Throttled => ExpirationPolicy::ThrottledUseAndTimeout {
                time_to_kill_seconds: self.time_to_kill_seconds,
                time_in_between_uses_seconds: self.time_in_between_uses_seconds,
            },
            PolicyKind::TicketGranting => {
                if self.max_time_to_live_seconds < self.time_to_kill_seconds {
                    return Err(ConfigError::Invalid(
                        "max_time_to_live_seconds is shorter than time_to_kill_seconds".to_string(),
                    ));
                }
                ExpirationPolicy::ticket_granting_ticket(self.max_time_to_live_seconds, self.time_to_kill_seconds)
            }
        };

        Ok(match self.remember_me_time_to_kill_seconds {
            Some(seconds) => {
                ExpirationPolicy::remember_me_delegating(ExpirationPolicy::hard_timeout(seconds), policy)
            }
            None => policy,
        })
    }
}
