use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::billing::models::ProductListing;
use crate::billing::pricing::ResourceUsage;
use crate::error::{BillingError, BillingResult};

pub mod http;

pub use http::{HttpProvisioningDriver, HttpProvisioningServer};

/// Well-known resource ids reported by provisioning backends.
pub const RESOURCE_TRAFFIC_USAGE: i64 = 0;
pub const RESOURCE_PORT_RESERVATION: i64 = 1;

/// key: provisioning-config -> typed configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::Text(_) => "text",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "map",
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(value)
    }
}

/// Dictionary of typed values handed to a provisioning driver. Drivers validate
/// the keys they need when a server is built, not inside the billing core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, ConfigValue>);

/// Per server instance settings stored on the catalog entry.
pub type ServerConfiguration = Configuration;
/// Per account settings supplied at purchase time.
pub type AccountConfiguration = Configuration;

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn text(&self, key: &str) -> BillingResult<Option<&str>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ConfigValue::Text(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(mismatch(key, "text", other)),
        }
    }

    pub fn require_text(&self, key: &str) -> BillingResult<&str> {
        self.text(key)?
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| BillingError::InvalidConfiguration(format!("`{key}` is required")))
    }

    pub fn integer(&self, key: &str) -> BillingResult<Option<i64>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ConfigValue::Integer(value)) => Ok(Some(*value)),
            Some(other) => Err(mismatch(key, "integer", other)),
        }
    }

    pub fn boolean(&self, key: &str) -> BillingResult<Option<bool>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ConfigValue::Bool(value)) => Ok(Some(*value)),
            Some(other) => Err(mismatch(key, "bool", other)),
        }
    }
}

fn mismatch(key: &str, expected: &str, found: &ConfigValue) -> BillingError {
    BillingError::InvalidConfiguration(format!(
        "`{key}` must be {expected}, found {}",
        found.type_name()
    ))
}

/// One metered resource on a hosted account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReading {
    pub resource_id: i64,
    #[serde(default)]
    pub allocated: Decimal,
    pub used: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    #[serde(default)]
    pub resources: Vec<ResourceReading>,
}

impl AccountSnapshot {
    pub fn usage_map(&self) -> ResourceUsage {
        self.resources
            .iter()
            .map(|reading| (reading.resource_id, reading.used))
            .collect()
    }
}

/// key: provisioning-server -> account lifecycle on a hosting backend
#[async_trait]
pub trait ProvisioningServer: Send + Sync {
    async fn create_account(
        &self,
        serial_number: i64,
        configuration: &AccountConfiguration,
    ) -> Result<()>;

    async fn get_account(&self, serial_number: i64) -> Result<AccountSnapshot>;

    async fn update_account(
        &self,
        serial_number: i64,
        configuration: &AccountConfiguration,
    ) -> Result<()>;

    async fn delete_account(&self, serial_number: i64) -> Result<()>;

    async fn suspend_account(&self, serial_number: i64) -> Result<()>;

    async fn unsuspend_account(&self, serial_number: i64) -> Result<()>;

    /// Resets metered counters for a new billing period.
    async fn refresh_account(&self, serial_number: i64) -> Result<()>;
}

/// Builds a [`ProvisioningServer`] for one configured server instance.
pub trait ProvisioningDriver: Send + Sync {
    fn connect(
        &self,
        instance_id: &str,
        configuration: &ServerConfiguration,
    ) -> BillingResult<Arc<dyn ProvisioningServer>>;
}

/// Server built for one instance, kept while its configuration is unchanged.
struct ConnectedServer {
    configuration: ServerConfiguration,
    server: Arc<dyn ProvisioningServer>,
}

/// key: provisioning-registry -> server type lookup, built at startup
///
/// Connected servers are cached per `(server type, instance id)` so sweeps do
/// not rebuild a client for every product.
#[derive(Clone, Default)]
pub struct ProvisioningRegistry {
    drivers: HashMap<String, Arc<dyn ProvisioningDriver>>,
    servers: Arc<DashMap<(String, String), ConnectedServer>>,
}

impl ProvisioningRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        server_type: impl Into<String>,
        driver: Arc<dyn ProvisioningDriver>,
    ) {
        let server_type = server_type.into();
        self.servers.retain(|(kind, _), _| *kind != server_type);
        self.drivers.insert(server_type, driver);
    }

    pub fn with_driver(
        mut self,
        server_type: impl Into<String>,
        driver: Arc<dyn ProvisioningDriver>,
    ) -> Self {
        self.register(server_type, driver);
        self
    }

    pub fn server_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn resolve(
        &self,
        listing: &ProductListing,
    ) -> BillingResult<Arc<dyn ProvisioningServer>> {
        let driver = self
            .drivers
            .get(&listing.server_type)
            .ok_or_else(|| BillingError::UnknownServerType(listing.server_type.clone()))?;

        let key = (
            listing.server_type.clone(),
            listing.server_instance_id.clone(),
        );
        if let Some(cached) = self.servers.get(&key) {
            if cached.configuration == listing.server_configuration {
                return Ok(cached.server.clone());
            }
        }

        let server = driver.connect(&listing.server_instance_id, &listing.server_configuration)?;
        self.servers.insert(
            key,
            ConnectedServer {
                configuration: listing.server_configuration.clone(),
                server: server.clone(),
            },
        );
        Ok(server)
    }
}

impl fmt::Debug for ProvisioningRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningRegistry")
            .field("server_types", &self.server_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn configuration_accessors_check_types() {
        let config = Configuration::new()
            .with("endpoint", "https://panel.example.net")
            .with("timeout_secs", 10_i64)
            .with("verify_tls", true);

        assert_eq!(
            config.require_text("endpoint").unwrap(),
            "https://panel.example.net"
        );
        assert_eq!(config.integer("timeout_secs").unwrap(), Some(10));
        assert_eq!(config.boolean("verify_tls").unwrap(), Some(true));
        assert_eq!(config.text("token").unwrap(), None);
        assert!(matches!(
            config.integer("endpoint"),
            Err(BillingError::InvalidConfiguration(_))
        ));
        assert!(config.require_text("token").is_err());
    }

    #[test]
    fn configuration_deserializes_from_json_object() {
        let config: Configuration = serde_json::from_str(
            r#"{"endpoint":"http://10.0.0.2","ports":[80,443],"limits":{"cpu":2}}"#,
        )
        .unwrap();
        assert_eq!(config.require_text("endpoint").unwrap(), "http://10.0.0.2");
        assert_eq!(
            config.get("ports"),
            Some(&ConfigValue::List(vec![
                ConfigValue::Integer(80),
                ConfigValue::Integer(443)
            ]))
        );
        assert!(matches!(config.get("limits"), Some(ConfigValue::Map(_))));
    }

    #[test]
    fn snapshot_exposes_usage_by_resource() {
        let snapshot = AccountSnapshot {
            resources: vec![
                ResourceReading {
                    resource_id: RESOURCE_TRAFFIC_USAGE,
                    allocated: dec!(100),
                    used: dec!(12.5),
                },
                ResourceReading {
                    resource_id: RESOURCE_PORT_RESERVATION,
                    allocated: dec!(2),
                    used: dec!(1),
                },
            ],
        };
        let usage = snapshot.usage_map();
        assert_eq!(usage.get(&RESOURCE_TRAFFIC_USAGE), Some(&dec!(12.5)));
        assert_eq!(usage.get(&RESOURCE_PORT_RESERVATION), Some(&dec!(1)));
    }

    fn listing(server_type: &str) -> ProductListing {
        ProductListing {
            product_id: 1,
            product_group_id: 1,
            name: "shared".into(),
            description: "shared hosting".into(),
            server_type: server_type.into(),
            server_instance_id: "node-1".into(),
            server_configuration: Configuration::new(),
            billing_options: vec![],
            usage_billing_factors: Default::default(),
            hidden: true,
            discontinued: true,
        }
    }

    struct NoopServer;

    #[async_trait]
    impl ProvisioningServer for NoopServer {
        async fn create_account(&self, _: i64, _: &AccountConfiguration) -> Result<()> {
            Ok(())
        }

        async fn get_account(&self, _: i64) -> Result<AccountSnapshot> {
            Ok(AccountSnapshot::default())
        }

        async fn update_account(&self, _: i64, _: &AccountConfiguration) -> Result<()> {
            Ok(())
        }

        async fn delete_account(&self, _: i64) -> Result<()> {
            Ok(())
        }

        async fn suspend_account(&self, _: i64) -> Result<()> {
            Ok(())
        }

        async fn unsuspend_account(&self, _: i64) -> Result<()> {
            Ok(())
        }

        async fn refresh_account(&self, _: i64) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingDriver(std::sync::atomic::AtomicUsize);

    impl ProvisioningDriver for CountingDriver {
        fn connect(
            &self,
            _instance_id: &str,
            _configuration: &ServerConfiguration,
        ) -> BillingResult<Arc<dyn ProvisioningServer>> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Arc::new(NoopServer))
        }
    }

    #[test]
    fn resolve_reuses_server_until_configuration_changes() {
        let driver = Arc::new(CountingDriver::default());
        let registry = ProvisioningRegistry::new().with_driver("panel", driver.clone());
        let mut listing = listing("panel");

        let first = registry.resolve(&listing).unwrap();
        let second = registry.clone().resolve(&listing).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(driver.0.load(std::sync::atomic::Ordering::SeqCst), 1);

        listing.server_configuration = Configuration::new().with("endpoint", "http://10.0.0.9");
        let third = registry.resolve(&listing).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(driver.0.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&third, &registry.resolve(&listing).unwrap()));
    }

    #[test]
    fn unknown_server_type_is_reported() {
        let registry = ProvisioningRegistry::new();
        let listing = listing("cpanel");
        assert!(matches!(
            registry.resolve(&listing),
            Err(BillingError::UnknownServerType(kind)) if kind == "cpanel"
        ));
    }
}
