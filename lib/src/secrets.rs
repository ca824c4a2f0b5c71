//! Secret material resolution for credentials.

use std::collections::HashMap;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use redact::Secret;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::VaultConfig;
use crate::device::Credential;

const PLACEHOLDER_PREFIX: &str = "vault:";

/// KV v2 secret store client.
///
/// Placeholder passwords look like `vault:<mount>/<path>#<field>`.
/// Resolution failures are meant to abort startup, never to be
/// retried per asset.
pub struct SecretStore {
    client: Client,
    address: Url,
    token: Secret<String>,
}

impl SecretStore {
    /// # Errors
    ///
    /// If no token can be read from the configured token file or the
    /// VAULT_TOKEN environment variable.
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let token = match &config.token_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read vault token from {path}"))?
                .trim()
                .to_string(),
            None => std::env::var("VAULT_TOKEN")
                .context("VAULT_TOKEN is not set and no token file is configured")?,
        };
        if token.is_empty() {
            bail!("vault token is empty");
        }

        Ok(Self {
            client: Client::new(),
            address: config.address.clone(),
            token: Secret::new(token),
        })
    }

    /// Replaces placeholder passwords with their stored values,
    /// leaving literal passwords untouched.
    ///
    /// # Errors
    ///
    /// If any placeholder fails to resolve.
    pub async fn resolve_credentials(
        &self,
        credentials: Vec<Credential>,
    ) -> Result<Vec<Credential>> {
        let mut resolved = Vec::with_capacity(credentials.len());
        for Credential { username, password } in credentials {
            let Some(reference) = password
                .expose_secret()
                .strip_prefix(PLACEHOLDER_PREFIX)
                .map(str::to_string)
            else {
                resolved.push(Credential { username, password });
                continue;
            };
            let value = self
                .fetch(&reference)
                .await
                .with_context(|| format!("failed to resolve secret for user {username}"))?;
            resolved.push(Credential::new(username, value));
        }
        Ok(resolved)
    }

    /// Resolves the certificate signer key the same way, leaving a
    /// literal key untouched.
    ///
    /// # Errors
    ///
    /// If the placeholder fails to resolve.
    pub async fn signer_token(&self, key: &str) -> Result<String> {
        match key.strip_prefix(PLACEHOLDER_PREFIX) {
            Some(reference) => self
                .fetch(reference)
                .await
                .context("failed to resolve the signer key"),
            None => Ok(key.to_string()),
        }
    }

    /// Fetches one `<mount>/<path>#<field>` reference.
    async fn fetch(&self, reference: &str) -> Result<String> {
        let (path, field) = reference
            .rsplit_once('#')
            .with_context(|| format!("secret reference {reference:?} is missing its #field"))?;
        let (mount, path) = path
            .split_once('/')
            .with_context(|| format!("secret reference {reference:?} is missing its mount"))?;

        let url = self
            .address
            .join(&format!("v1/{mount}/data/{path}"))
            .context("failed to build secret url")?;
        debug!(%mount, %path, "resolving secret");

        let response = self
            .client
            .get(url)
            .header("X-Vault-Token", self.token.expose_secret())
            .send()
            .await
            .context("secret request failed")?
            .error_for_status()
            .context("secret request rejected")?;
        let body: KvResponse = response
            .json()
            .await
            .context("secret response is not valid json")?;

        body.data
            .data
            .get(field)
            .cloned()
            .with_context(|| format!("secret has no field {field:?}"))
    }
}

#[derive(Debug, Deserialize)]
struct KvResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;
    use wiremock::matchers::header;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    fn store(server: &MockServer) -> SecretStore {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        let mut file = std::fs::File::create(&token_path).unwrap();
        writeln!(file, "s.ighQ9qFeA").unwrap();

        SecretStore::new(&VaultConfig {
            address: Url::parse(&server.uri()).unwrap(),
            token_file: Some(token_path.try_into().unwrap()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn placeholders_resolve_and_literals_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/bmc/admin"))
            .and(header("X-Vault-Token", "s.ighQ9qFeA"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": { "password": "hunter2" } }
            })))
            .mount(&server)
            .await;

        let resolved = store(&server)
            .resolve_credentials(vec![
                Credential::new("admin", "vault:secret/bmc/admin#password"),
                Credential::new("root", "calvin"),
            ])
            .await
            .unwrap();

        assert_eq!(resolved[0], Credential::new("admin", "hunter2"));
        assert_eq!(resolved[1], Credential::new("root", "calvin"));
    }

    #[tokio::test]
    async fn signer_key_resolves_like_a_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/signer/lemur"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": { "key": "lemur-api-key" } }
            })))
            .mount(&server)
            .await;
        let store = store(&server);

        let token = store
            .signer_token("vault:secret/signer/lemur#key")
            .await
            .unwrap();
        assert_eq!(token, "lemur-api-key");

        let literal = store.signer_token("already-a-key").await.unwrap();
        assert_eq!(literal, "already-a-key");
    }

    #[tokio::test]
    async fn missing_field_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/bmc/admin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": { "username": "admin" } }
            })))
            .mount(&server)
            .await;

        let result = store(&server)
            .resolve_credentials(vec![Credential::new(
                "admin",
                "vault:secret/bmc/admin#password",
            )])
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn malformed_references_are_errors() {
        let server = MockServer::start().await;
        let store = store(&server);

        for reference in ["vault:no-field", "vault:#password"] {
            let result = store
                .resolve_credentials(vec![Credential::new("admin", reference)])
                .await;
            assert!(result.is_err(), "{reference} should not resolve");
        }
    }

    #[tokio::test]
    async fn denied_request_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = store(&server)
            .resolve_credentials(vec![Credential::new(
                "admin",
                "vault:secret/bmc/admin#password",
            )])
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn empty_token_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "\n").unwrap();

        let result = SecretStore::new(&VaultConfig {
            address: Url::parse("https://vault.example.com").unwrap(),
            token_file: Some(token_path.try_into().unwrap()),
        });

        assert!(result.is_err());
    }
}
