use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use catalog_core::{ClientConfig, DEFAULT_BASE_URL};

use crate::sync::controller::DEFAULT_FETCH_LIMIT;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DATA_DIR_NAME: &str = "dcatalog";
const DB_FILE_NAME: &str = "catalog.db";

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub client: ClientConfig,
    pub db_path: PathBuf,
    pub fetch_limit: usize,
}

impl CatalogConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup(|name| std::env::var(name).ok(), &home, dirs::data_dir())
    }

    /// Builds the config from `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F, home: &Path, data_dir: Option<PathBuf>) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("CATALOG_TOKEN")
            .filter(|value| !value.trim().is_empty())
            .context("CATALOG_TOKEN is not set")?;
        let base_url = lookup("CATALOG_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let db_path = match lookup("CATALOG_DB_PATH") {
            Some(value) => expand_with_home(&value, home),
            None => default_db_path(data_dir, home),
        };
        let fetch_limit = read_u64(&lookup, "CATALOG_FETCH_LIMIT", DEFAULT_FETCH_LIMIT as u64);
        let timeout = Duration::from_secs(read_u64(
            &lookup,
            "CATALOG_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        ));
        let pinned_certificate = match lookup("CATALOG_CA_CERT") {
            Some(value) => {
                let path = expand_with_home(&value, home);
                let pem = std::fs::read(&path)
                    .with_context(|| format!("failed to read CA certificate {}", path.display()))?;
                Some(pem)
            }
            None => None,
        };

        let mut client = ClientConfig::new(token).with_base_url(base_url);
        client.timeout = timeout;
        client.pinned_certificate = pinned_certificate;

        Ok(Self {
            client,
            db_path,
            fetch_limit: usize::try_from(fetch_limit).unwrap_or(DEFAULT_FETCH_LIMIT),
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_db_path(data_dir: Option<PathBuf>, home: &Path) -> PathBuf {
    data_dir
        .unwrap_or_else(|| home.join(".local").join("share"))
        .join(DATA_DIR_NAME)
        .join(DB_FILE_NAME)
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let home = Path::new("/home/user");
        let config = CatalogConfig::from_lookup(
            lookup_from(&[("CATALOG_TOKEN", "secret")]),
            home,
            Some(PathBuf::from("/data")),
        )
        .unwrap();

        assert_eq!(config.client.token, "secret");
        assert_eq!(config.client.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.client.timeout, Duration::from_secs(30));
        assert!(config.client.pinned_certificate.is_none());
        assert_eq!(config.fetch_limit, 10);
        assert_eq!(config.db_path, PathBuf::from("/data/dcatalog/catalog.db"));
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = CatalogConfig::from_lookup(lookup_from(&[]), Path::new("/home/user"), None)
            .unwrap_err();
        assert!(err.to_string().contains("CATALOG_TOKEN"));

        let blank = CatalogConfig::from_lookup(
            lookup_from(&[("CATALOG_TOKEN", "  ")]),
            Path::new("/home/user"),
            None,
        );
        assert!(blank.is_err());
    }

    #[test]
    fn overrides_are_read_and_home_is_expanded() {
        let config = CatalogConfig::from_lookup(
            lookup_from(&[
                ("CATALOG_TOKEN", "secret"),
                ("CATALOG_BASE_URL", "http://localhost:8080/v1/"),
                ("CATALOG_DB_PATH", "~/catalog/items.db"),
                ("CATALOG_FETCH_LIMIT", "25"),
                ("CATALOG_TIMEOUT_SECS", "5"),
            ]),
            Path::new("/home/user"),
            None,
        )
        .unwrap();

        assert_eq!(config.client.base_url, "http://localhost:8080/v1/");
        assert_eq!(config.db_path, PathBuf::from("/home/user/catalog/items.db"));
        assert_eq!(config.fetch_limit, 25);
        assert_eq!(config.client.timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = CatalogConfig::from_lookup(
            lookup_from(&[
                ("CATALOG_TOKEN", "secret"),
                ("CATALOG_FETCH_LIMIT", "0"),
                ("CATALOG_TIMEOUT_SECS", "soon"),
            ]),
            Path::new("/home/user"),
            None,
        )
        .unwrap();

        assert_eq!(config.fetch_limit, DEFAULT_FETCH_LIMIT);
        assert_eq!(config.client.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/user/.local/share/dcatalog/catalog.db")
        );
    }

    #[test]
    fn ca_certificate_is_loaded_from_file() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        cert.write_all(b"-----BEGIN CERTIFICATE-----\n").unwrap();
        let path = cert.path().to_string_lossy().into_owned();

        let config = CatalogConfig::from_lookup(
            lookup_from(&[("CATALOG_TOKEN", "secret"), ("CATALOG_CA_CERT", &path)]),
            Path::new("/home/user"),
            None,
        )
        .unwrap();

        assert_eq!(
            config.client.pinned_certificate.as_deref(),
            Some(&b"-----BEGIN CERTIFICATE-----\n"[..])
        );
    }

    #[test]
    fn unreadable_ca_certificate_is_an_error() {
        let err = CatalogConfig::from_lookup(
            lookup_from(&[
                ("CATALOG_TOKEN", "secret"),
                ("CATALOG_CA_CERT", "/nonexistent/ca.pem"),
            ]),
            Path::new("/home/user"),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }
}
