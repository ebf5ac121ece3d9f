//! Errors raised while building and creating a cluster.

use thiserror::Error;

/// Errors that can occur during `cluster create`.
#[derive(Error, Debug)]
pub enum CreateError {
    /// Flag combination is invalid.
    #[error("{0}")]
    Usage(String),

    /// The Talos version does not parse into a version contract.
    #[error("error parsing Talos version {version:?}")]
    VersionParse {
        version: String,
        #[source]
        source: machinery::ConfigError,
    },

    /// Address planning input is wrong.
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Neither IPv4 nor IPv6 was enabled.
    #[error("neither IPv4 nor IPv6 network was enabled")]
    NoFamilyEnabled,

    /// A nameserver is not a literal IP address.
    #[error("failed parsing nameserver IP {0:?}")]
    NameserverParse(String),

    /// User volume spec has an odd number of tokens or a bad size.
    #[error("failed to parse malformed volume definitions: {0}")]
    MalformedUserVolume(String),

    /// CPU share has more than nine fractional digits.
    #[error("value is too precise: {0}")]
    TooPrecise(String),

    /// CPU share is not a decimal number.
    #[error("failed to parse as a rational number: {0}")]
    NotRational(String),

    /// A boot asset could not be fetched.
    #[error("failed to download {url}: {message}")]
    AssetDownload { url: String, message: String },

    /// SideroLink ports kept overlapping.
    #[error("failed to get non-overlapping dynamic ports in {0} attempts")]
    PortAllocExhausted(usize),

    /// Any other invalid input.
    #[error("{0}")]
    Invalid(String),

    /// Machine configuration failure.
    #[error(transparent)]
    Config(#[from] machinery::ConfigError),

    /// Back-end failure.
    #[error(transparent)]
    Provider(#[from] provision::ProviderError),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CreateError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            _ => 1,
        }
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}

/// Result alias for cluster creation.
pub type Result<T> = std::result::Result<T, CreateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CreateError::usage("bad flags").exit_code(), 2);
        assert_eq!(CreateError::NoFamilyEnabled.exit_code(), 1);
        assert_eq!(
            CreateError::NameserverParse("x".into()).to_string(),
            "failed parsing nameserver IP \"x\""
        );
    }

    #[test]
    fn test_version_parse_keeps_source() {
        let err = CreateError::VersionParse {
            version: "v1".into(),
            source: machinery::ConfigError::VersionParse("v1".into()),
        };

        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "error parsing Talos version \"v1\"");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "error parsing version \"v1\"");
    }
}
