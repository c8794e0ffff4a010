use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub email: EmailConfig,
    pub auth: AuthConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL embedded in public status links and label QR codes.
    pub public_base_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    /// Failed-login burst allowed per (client ip, portal) bucket.
    pub login_attempts: u32,
    /// Seconds until one attempt is restored to an exhausted bucket.
    pub login_refill_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                public_base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/shopserver".to_string(),
            },
            email: EmailConfig {
                smtp_server: String::new(),
                smtp_port: 587,
                username: String::new(),
                password: String::new(),
                from: String::new(),
            },
            auth: AuthConfig {
                jwt_secret: String::new(),
                token_ttl_hours: 12,
                login_attempts: 5,
                login_refill_secs: 60,
            },
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("shopserver.toml"))
    }

    /// Defaults, overridden by the TOML file, overridden by SHOPSERVER_* env
    /// vars (double underscore as the section separator). DATABASE_URL wins
    /// over all of them when set.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SHOPSERVER_").split("__"))
            .extract()?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        Ok(config)
    }

    pub fn email_configured(&self) -> bool {
        !self.email.smtp_server.is_empty() && !self.email.from.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_file_missing() {
        let config = AppConfig::load_from(Path::new("/nonexistent/shopserver.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.login_attempts, 5);
        assert!(!config.email_configured());
    }

    #[test]
    fn toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "[server]\nport = 9090\npublic_base_url = \"https://status.example.com\"\n\n\
             [email]\nsmtp_server = \"smtp.example.com\"\nfrom = \"shop@example.com\""
        )
        .unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.public_base_url, "https://status.example.com");
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.email_configured());
    }
}
