use bisync_core::{Endpoint, Result, SyncError};
use russh::keys::{decode_secret_key, PrivateKey};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_KEY: &str = ".ssh/id_rsa";

/// Credential used for every connect of one endpoint.
#[derive(Clone)]
pub(crate) enum Secret {
    Password(String),
    Key(Arc<PrivateKey>),
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Secret::Password(_) => "Secret::Password(..)",
            Secret::Key(_) => "Secret::Key(..)",
        })
    }
}

/// Pick the endpoint's credential: password, then inline key, then key file
/// (`~/.ssh/id_rsa` unless `key_path` names another).
pub(crate) fn resolve(endpoint: &Endpoint) -> Result<Secret> {
    if let Some(password) = &endpoint.password {
        return Ok(Secret::Password(password.clone()));
    }
    let passphrase = endpoint.passphrase.as_deref();
    if let Some(text) = &endpoint.private_key {
        return decode(text, passphrase, "inline private key");
    }
    let path = key_file(endpoint.key_path.as_deref())?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| SyncError::Config(format!("read key {} failed: {e}", path.display())))?;
    decode(&text, passphrase, &path.display().to_string())
}

fn decode(text: &str, passphrase: Option<&str>, origin: &str) -> Result<Secret> {
    decode_secret_key(text, passphrase)
        .map(|k| Secret::Key(Arc::new(k)))
        .map_err(|e| SyncError::Config(format!("{origin}: {e}")))
}

fn key_file(configured: Option<&str>) -> Result<PathBuf> {
    let home = || dirs::home_dir().ok_or_else(|| SyncError::Config("cannot locate home directory".into()));
    match configured {
        Some(p) if p == "~" => home(),
        Some(p) => match p.strip_prefix("~/") {
            Some(rest) => Ok(home()?.join(rest)),
            None => Ok(PathBuf::from(p)),
        },
        None => Ok(home()?.join(DEFAULT_KEY)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "h".into(),
            port: 22,
            user: "u".into(),
            password: None,
            private_key: None,
            key_path: None,
            passphrase: None,
            fingerprints: None,
        }
    }

    #[test]
    fn password_wins_over_keys() {
        let ep = Endpoint {
            password: Some("pw".into()),
            private_key: Some("not a key".into()),
            key_path: Some("/nowhere".into()),
            ..endpoint()
        };
        assert!(matches!(resolve(&ep).unwrap(), Secret::Password(p) if p == "pw"));
    }

    #[test]
    fn bad_inline_key_is_a_config_error() {
        let ep = Endpoint {
            private_key: Some("garbage".into()),
            ..endpoint()
        };
        let err = resolve(&ep).unwrap_err();
        assert!(matches!(err, SyncError::Config(ref m) if m.starts_with("inline private key")));
    }

    #[test]
    fn missing_key_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_missing");
        let ep = Endpoint {
            key_path: Some(path.display().to_string()),
            ..endpoint()
        };
        let err = resolve(&ep).unwrap_err().to_string();
        assert!(err.contains("id_missing"), "{err}");
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(key_file(Some("~/.ssh/k")).unwrap(), home.join(".ssh/k"));
        assert_eq!(key_file(None).unwrap(), home.join(".ssh/id_rsa"));
        assert_eq!(key_file(Some("/etc/k")).unwrap(), PathBuf::from("/etc/k"));
    }
}
