//! Connection identity in structured ("Secret") form.
//!
//! The engine passes credentials to the connector either as a semicolon
//! connection string (parsed by [`mssql_client::Config::from_connection_string`])
//! or as a pre-structured [`Secret`]. Both resolve to the same
//! [`mssql_client::Config`].

use mssql_client::Config;

use crate::error::ConnectorError;

/// Structured connection identity, as handed to the connector by the
/// engine's secret manager.
///
/// Exactly one of `user`+`password` or `azure_secret` must be present;
/// [`Secret::validate`] enforces this before any I/O is attempted.
#[derive(Debug, Clone)]
pub struct Secret {
    /// Server host name or IP.
    pub host: String,
    /// TCP port (default 1433).
    pub port: u16,
    /// Target database, if any.
    pub database: Option<String>,
    /// SQL authentication username.
    pub user: Option<String>,
    /// SQL authentication password.
    pub password: Option<String>,
    /// Name of a companion secret carrying Azure AD token-acquisition info.
    pub azure_secret: Option<String>,
    /// Azure AD tenant id, when `azure_secret` is present.
    pub azure_tenant: Option<String>,
    /// Encrypt the connection in transit. Default `true`.
    pub use_encrypt: bool,
    /// Trust the server's TLS certificate without validating it against a
    /// CA. Distinct from `use_encrypt`: a connection can be encrypted and
    /// still validate the certificate, or (this flag) encrypted without
    /// validation. Default `false`.
    pub trust_server_certificate: bool,
    /// Whether the engine's catalog integration is enabled for this
    /// attachment. Default `true`. This is consumed by
    /// [`crate::settings::Settings`], not by `Config` itself.
    pub catalog: bool,
}

impl Default for Secret {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            database: None,
            user: None,
            password: None,
            azure_secret: None,
            azure_tenant: None,
            use_encrypt: true,
            trust_server_certificate: false,
            catalog: true,
        }
    }
}

impl Secret {
    /// Parse the engine's semicolon `key=value` connection-string grammar
    /// into a [`Secret`].
    ///
    /// Recognizes the same keys [`mssql_client::Config::from_connection_string`]
    /// does, plus `Catalog`, `azure_secret`, and `azure_tenant`.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, ConnectorError> {
        let mut secret = Self::default();
        let mut explicit_trust: Option<bool> = None;
        let mut explicit_encrypt: Option<bool> = None;

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ConnectorError::Config(format!("invalid key-value: {part}")))?;
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" => {
                    if let Some((host, port)) = value.split_once(',') {
                        secret.host = host.to_string();
                        secret.port = port.parse().map_err(|_| {
                            ConnectorError::Config(format!("invalid port: {port}"))
                        })?;
                    } else {
                        secret.host = value.to_string();
                    }
                }
                "database" | "initial catalog" => secret.database = Some(value.to_string()),
                "user id" | "uid" | "user" => secret.user = Some(value.to_string()),
                "password" | "pwd" => secret.password = Some(value.to_string()),
                "encrypt" => {
                    explicit_encrypt = Some(parse_bool(&key, value)?);
                }
                "trustservercertificate" => {
                    explicit_trust = Some(parse_bool(&key, value)?);
                }
                "catalog" => secret.catalog = parse_bool(&key, value)?,
                "azure_secret" => secret.azure_secret = Some(value.to_string()),
                "azure_tenant" => secret.azure_tenant = Some(value.to_string()),
                _ => {}
            }
        }

        if let (Some(encrypt), Some(trust)) = (explicit_encrypt, explicit_trust) {
            if encrypt && trust {
                return Err(ConnectorError::Config(
                    "Encrypt=true and TrustServerCertificate=true conflict: \
                     specify at most one transport-security alias"
                        .to_string(),
                ));
            }
        }
        if let Some(encrypt) = explicit_encrypt {
            secret.use_encrypt = encrypt;
        }
        if let Some(trust) = explicit_trust {
            secret.trust_server_certificate = trust;
        }

        secret.validate()?;
        Ok(secret)
    }

    /// Reject secrets missing required fields before any network I/O.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.host.is_empty() {
            return Err(ConnectorError::Config("missing Server/Data Source".to_string()));
        }
        let has_sql_auth = self.user.is_some() && self.password.is_some();
        let has_azure_auth = self.azure_secret.is_some();
        if has_sql_auth == has_azure_auth {
            return Err(ConnectorError::Config(
                "exactly one of (User Id + Password) or azure_secret must be present"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Build the lower-layer [`Config`] this secret describes.
    pub fn to_client_config(&self) -> Result<Config, ConnectorError> {
        self.validate()?;

        let mut config = Config::default().host(self.host.clone()).port(self.port);
        if let Some(db) = &self.database {
            config = config.database(db.clone());
        }
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            config = config.credentials(mssql_client::Credentials::sql_server(
                user.clone(),
                password.clone(),
            ));
        }
        config = config.encrypt(self.use_encrypt);
        config = config.trust_server_certificate(self.trust_server_certificate);

        Ok(config)
    }
}

/// Redacted view of a [`Secret`] safe to surface to introspection output.
/// `user`/`azure_secret` are shown as presence flags only; `password` and
/// `azure_tenant` never appear.
#[derive(Debug, Clone)]
pub struct RedactedSecret {
    /// Server host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Target database, if any.
    pub database: Option<String>,
    /// Whether SQL authentication credentials are present.
    pub has_sql_auth: bool,
    /// Whether Azure AD token-acquisition info is present.
    pub has_azure_auth: bool,
    /// Encrypt-in-transit flag.
    pub use_encrypt: bool,
}

impl From<&Secret> for RedactedSecret {
    fn from(s: &Secret) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            database: s.database.clone(),
            has_sql_auth: s.user.is_some(),
            has_azure_auth: s.azure_secret.is_some(),
            use_encrypt: s.use_encrypt,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConnectorError> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        other => Err(ConnectorError::Config(format!(
            "invalid boolean for {key}: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_sql_auth_string() {
        let secret = Secret::from_connection_string(
            "Server=db01,1433;Database=Sales;User Id=app;Password=hunter2;",
        )
        .unwrap();
        assert_eq!(secret.host, "db01");
        assert_eq!(secret.port, 1433);
        assert_eq!(secret.database.as_deref(), Some("Sales"));
        assert_eq!(secret.user.as_deref(), Some("app"));
    }

    #[test]
    fn rejects_conflicting_encrypt_aliases() {
        let err = Secret::from_connection_string(
            "Server=db01;User Id=app;Password=x;Encrypt=true;TrustServerCertificate=true;",
        )
        .unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn rejects_missing_credentials() {
        let err = Secret::from_connection_string("Server=db01;Database=Sales;").unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn rejects_both_credential_kinds() {
        let err = Secret::from_connection_string(
            "Server=db01;User Id=app;Password=x;azure_secret=kv-secret;",
        )
        .unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn trust_server_certificate_is_parsed_independently_of_encrypt() {
        let secret = Secret::from_connection_string(
            "Server=db01;User Id=app;Password=x;TrustServerCertificate=true;",
        )
        .unwrap();
        assert!(secret.trust_server_certificate);
        assert!(secret.use_encrypt);
    }

    #[test]
    fn redacts_password() {
        let secret = Secret::from_connection_string(
            "Server=db01;User Id=app;Password=hunter2;",
        )
        .unwrap();
        let redacted = RedactedSecret::from(&secret);
        assert!(redacted.has_sql_auth);
        assert!(!redacted.has_azure_auth);
    }
}
