use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(DynamicAccessKeyId);
id_newtype!(AccessKeyId);

pub const MAX_NAME_CHARS: usize = 64;
pub const MAX_PATH_CHARS: usize = 64;
pub const MAX_PREFIX_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerAlgorithm {
    #[default]
    UserIpAddress,
    RandomKeyOnEachConnection,
    RandomServerKeyOnEachConnection,
}

impl LoadBalancerAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserIpAddress => "user_ip_address",
            Self::RandomKeyOnEachConnection => "random_key_on_each_connection",
            Self::RandomServerKeyOnEachConnection => "random_server_key_on_each_connection",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "user_ip_address" => Some(Self::UserIpAddress),
            "random_key_on_each_connection" => Some(Self::RandomKeyOnEachConnection),
            "random_server_key_on_each_connection" => Some(Self::RandomServerKeyOnEachConnection),
            _ => None,
        }
    }
}

/// Validity of a key relative to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccessKeyValidity {
    Forever,
    Valid { expires_at: DateTime<Utc> },
    Expired { expired_at: DateTime<Utc> },
}

impl AccessKeyValidity {
    pub fn at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match expires_at {
            None => Self::Forever,
            Some(expires_at) if expires_at > now => Self::Valid { expires_at },
            Some(expired_at) => Self::Expired { expired_at },
        }
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Expired { .. })
    }
}

pub fn new_dynamic_access_key_path() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.chars().count() <= MAX_PATH_CHARS
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// Matches the set left untouched by JavaScript's encodeURIComponent.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShareUrlError {
    #[error("invalid dashboard origin '{0}'")]
    InvalidOrigin(String),
    #[error("unsupported dashboard scheme '{0}', expected http or https")]
    UnsupportedScheme(String),
}

/// Builds the `ssconf://` URL that clients import to subscribe to a dynamic
/// access key served by the dashboard at `origin`.
pub fn dynamic_access_key_url(origin: &str, path: &str, name: &str) -> Result<String, ShareUrlError> {
    let parsed = Url::parse(origin).map_err(|_| ShareUrlError::InvalidOrigin(origin.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ShareUrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ShareUrlError::InvalidOrigin(origin.to_string()))?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let name = utf8_percent_encode(name, URI_COMPONENT);
    Ok(format!("ssconf://{authority}/api/dak/{path}#{name}"))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn validity_tracks_expiry_relative_to_now() {
        let now = Utc::now();
        assert_eq!(AccessKeyValidity::at(None, now), AccessKeyValidity::Forever);

        let later = now + Duration::days(3);
        assert_eq!(
            AccessKeyValidity::at(Some(later), now),
            AccessKeyValidity::Valid { expires_at: later }
        );

        let validity = AccessKeyValidity::at(Some(now), now);
        assert!(!validity.is_usable());
    }

    #[test]
    fn share_url_swaps_scheme_and_encodes_name() {
        let url = dynamic_access_key_url("https://admin.example.com", "abc123", "Team A/B")
            .expect("url");
        assert_eq!(url, "ssconf://admin.example.com/api/dak/abc123#Team%20A%2FB");

        let url = dynamic_access_key_url("http://127.0.0.1:3000/", "p", "x").expect("url");
        assert_eq!(url, "ssconf://127.0.0.1:3000/api/dak/p#x");
    }

    #[test]
    fn share_url_rejects_non_http_origin() {
        assert_eq!(
            dynamic_access_key_url("ftp://files.example.com", "p", "x"),
            Err(ShareUrlError::UnsupportedScheme("ftp".into()))
        );
        assert!(matches!(
            dynamic_access_key_url("not a url", "p", "x"),
            Err(ShareUrlError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn load_balancer_algorithm_parses_cli_spellings() {
        assert_eq!(
            LoadBalancerAlgorithm::parse("Random-Key-On-Each-Connection"),
            Some(LoadBalancerAlgorithm::RandomKeyOnEachConnection)
        );
        assert_eq!(LoadBalancerAlgorithm::parse("round_robin"), None);
    }

    #[test]
    fn generated_paths_are_valid() {
        let path = new_dynamic_access_key_path();
        assert!(is_valid_path(&path));
        assert!(!is_valid_path("has space"));
        assert!(!is_valid_path(""));
    }
}
