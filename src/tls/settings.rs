//! Builds an [`SslConfiguration`] from the `[tls]` config section.

use std::fs;

use crate::config::schema::{ProfileSetting, RoleSetting, TlsSettings};
use crate::tls::{DefaultProfile, RustlsContextBuilder, SslConfiguration, SslConfigurationBuilder, TlsDefaults, TlsError};

impl From<ProfileSetting> for DefaultProfile {
    fn from(setting: ProfileSetting) -> Self {
        match setting {
            ProfileSetting::None => DefaultProfile::None,
            ProfileSetting::Tcp => DefaultProfile::Tcp,
            ProfileSetting::H2 => DefaultProfile::H2,
        }
    }
}

/// Turn a validated `[tls]` section into a configuration.
///
/// PEM files are read here; `defaults` supplies the handshake timeout when
/// the section leaves it unset.
pub fn ssl_configuration_from(settings: &TlsSettings, defaults: TlsDefaults) -> Result<SslConfiguration, TlsError> {
    let mut context_builder = match settings.role {
        RoleSetting::Client => {
            let path = required(&settings.ca_path, "tls.ca_path")?;
            RustlsContextBuilder::client().with_root_certificates_pem(read_pem(path)?)
        }
        RoleSetting::Server => {
            let cert = read_pem(required(&settings.cert_path, "tls.cert_path")?)?;
            let key = read_pem(required(&settings.key_path, "tls.key_path")?)?;
            RustlsContextBuilder::server(cert, key)
        }
    };
    if let Some(name) = &settings.server_name {
        context_builder = context_builder.with_server_name(name.clone());
    }

    let mut builder = SslConfigurationBuilder::new(defaults)
        .context_builder(context_builder)
        .default_configuration(settings.profile.into())
        .close_notify_flush_timeout_millis(settings.close_notify_flush_timeout_ms)
        .close_notify_read_timeout_millis(settings.close_notify_read_timeout_ms);
    if let Some(ms) = settings.handshake_timeout_ms {
        builder = builder.handshake_timeout_millis(ms);
    }
    builder.build()
}

fn required<'a>(path: &'a Option<String>, field: &str) -> Result<&'a str, TlsError> {
    path.as_deref()
        .ok_or_else(|| TlsError::invalid(format!("{} is required", field)))
}

fn read_pem(path: &str) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|e| TlsError::ContextResolution(format!("failed to read {}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fixture(name: &str) -> Option<String> {
        Some(format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name))
    }

    #[test]
    fn client_section() {
        let settings = TlsSettings {
            ca_path: fixture("ca.pem"),
            profile: ProfileSetting::H2,
            handshake_timeout_ms: Some(1500),
            ..TlsSettings::default()
        };
        let config = ssl_configuration_from(&settings, TlsDefaults::default()).unwrap();
        assert_eq!(config.profile(), Some(DefaultProfile::H2));
        assert_eq!(config.handshake_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn unset_handshake_timeout_uses_defaults() {
        let settings = TlsSettings {
            role: RoleSetting::Server,
            cert_path: fixture("server.pem"),
            key_path: fixture("server.key"),
            ..TlsSettings::default()
        };
        let defaults = TlsDefaults { handshake_timeout: Duration::from_millis(900) };
        let config = ssl_configuration_from(&settings, defaults).unwrap();
        assert_eq!(config.handshake_timeout(), Duration::from_millis(900));
    }

    #[test]
    fn negative_timeout_is_invalid() {
        let settings = TlsSettings {
            ca_path: fixture("ca.pem"),
            close_notify_read_timeout_ms: -1,
            ..TlsSettings::default()
        };
        let err = ssl_configuration_from(&settings, TlsDefaults::default()).unwrap_err();
        assert!(matches!(err, TlsError::InvalidConfiguration { .. }));
    }

    #[test]
    fn unreadable_pem_is_a_resolution_error() {
        let settings = TlsSettings {
            ca_path: Some("/nonexistent/ca.pem".into()),
            ..TlsSettings::default()
        };
        let err = ssl_configuration_from(&settings, TlsDefaults::default()).unwrap_err();
        assert!(matches!(err, TlsError::ContextResolution(_)));
    }
}
