use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{
    AccountConfiguration, AccountSnapshot, ProvisioningDriver, ProvisioningServer,
    ServerConfiguration,
};
use crate::error::{BillingError, BillingResult};

/// Driver for backends exposing the account lifecycle over REST.
///
/// Server configuration keys: `endpoint` (required), `token` (optional bearer
/// token) and `timeout_secs` (optional, overrides the driver default).
#[derive(Debug, Clone)]
pub struct HttpProvisioningDriver {
    default_timeout: Duration,
}

impl HttpProvisioningDriver {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl ProvisioningDriver for HttpProvisioningDriver {
    fn connect(
        &self,
        instance_id: &str,
        configuration: &ServerConfiguration,
    ) -> BillingResult<Arc<dyn ProvisioningServer>> {
        let endpoint = configuration.require_text("endpoint")?;
        let token = configuration.text("token")?.map(str::to_string);
        let timeout = match configuration.integer("timeout_secs")? {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            Some(secs) => {
                return Err(BillingError::InvalidConfiguration(format!(
                    "`timeout_secs` must be positive, got {secs}"
                )))
            }
            None => self.default_timeout,
        };
        let server = HttpProvisioningServer::new(endpoint, instance_id, token, timeout)?;
        Ok(Arc::new(server))
    }
}

#[derive(Clone)]
pub struct HttpProvisioningServer {
    client: reqwest::Client,
    base_url: String,
    instance_id: String,
    auth_token: Option<String>,
}

impl HttpProvisioningServer {
    pub fn new(
        base_url: impl Into<String>,
        instance_id: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build provisioning client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            instance_id: instance_id.into(),
            auth_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/instances/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.instance_id,
            path.trim_start_matches('/')
        )
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth_token {
            request.bearer_auth(token)
        } else {
            request
        }
    }

    async fn post_action(&self, serial_number: i64, action: &str) -> Result<()> {
        self.auth(
            self.client
                .post(self.endpoint(&format!("accounts/{serial_number}/{action}"))),
        )
        .send()
        .await
        .with_context(|| format!("failed to reach provisioning backend for {action}"))?
        .error_for_status()
        .with_context(|| format!("provisioning backend rejected {action} request"))?;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningServer for HttpProvisioningServer {
    async fn create_account(
        &self,
        serial_number: i64,
        configuration: &AccountConfiguration,
    ) -> Result<()> {
        self.auth(self.client.post(self.endpoint("accounts")))
            .json(&json!({
                "serial_number": serial_number,
                "configuration": configuration,
            }))
            .send()
            .await
            .context("failed to reach provisioning backend for create")?
            .error_for_status()
            .context("provisioning backend rejected create request")?;
        Ok(())
    }

    async fn get_account(&self, serial_number: i64) -> Result<AccountSnapshot> {
        let response = self
            .auth(
                self.client
                    .get(self.endpoint(&format!("accounts/{serial_number}"))),
            )
            .send()
            .await
            .context("failed to reach provisioning backend for account lookup")?
            .error_for_status()
            .context("provisioning backend rejected account lookup")?;
        response
            .json()
            .await
            .context("failed to decode account snapshot")
    }

    async fn update_account(
        &self,
        serial_number: i64,
        configuration: &AccountConfiguration,
    ) -> Result<()> {
        self.auth(
            self.client
                .put(self.endpoint(&format!("accounts/{serial_number}"))),
        )
        .json(&json!({ "configuration": configuration }))
        .send()
        .await
        .context("failed to reach provisioning backend for update")?
        .error_for_status()
        .context("provisioning backend rejected update request")?;
        Ok(())
    }

    async fn delete_account(&self, serial_number: i64) -> Result<()> {
        self.auth(
            self.client
                .delete(self.endpoint(&format!("accounts/{serial_number}"))),
        )
        .send()
        .await
        .context("failed to reach provisioning backend for delete")?
        .error_for_status()
        .context("provisioning backend rejected delete request")?;
        Ok(())
    }

    async fn suspend_account(&self, serial_number: i64) -> Result<()> {
        self.post_action(serial_number, "suspend").await
    }

    async fn unsuspend_account(&self, serial_number: i64) -> Result<()> {
        self.post_action(serial_number, "unsuspend").await
    }

    async fn refresh_account(&self, serial_number: i64) -> Result<()> {
        self.post_action(serial_number, "refresh").await
    }
}
