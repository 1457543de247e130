//! Git credentials resolved from Kubernetes Secrets

use crate::crds::SecretRef;
use crate::tasks::config::AuthorConfig;
use crate::tasks::types::Result;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::fmt;
use tracing::{debug, warn};

pub const BASIC_AUTH_TYPE: &str = "kubernetes.io/basic-auth";
pub const SSH_AUTH_TYPE: &str = "kubernetes.io/ssh-auth";

const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";
const SSH_PRIVATE_KEY: &str = "ssh-privatekey";

#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
    SshKey {
        private_key: String,
    },
}

// Secret material never reaches logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::SshKey { .. } => f.write_str("SshKey(<redacted>)"),
        }
    }
}

/// Identity recorded on tags and commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl From<&AuthorConfig> for Author {
    fn from(config: &AuthorConfig) -> Self {
        Author {
            name: config.name.clone(),
            email: config.email.clone(),
        }
    }
}

impl Credentials {
    /// Interpret a Secret by its type; unsupported types are anonymous.
    pub fn from_secret(secret: &Secret) -> Self {
        let field = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|value| String::from_utf8_lossy(&value.0).into_owned())
                .or_else(|| {
                    secret
                        .string_data
                        .as_ref()
                        .and_then(|data| data.get(key))
                        .cloned()
                })
                .unwrap_or_default()
        };

        match secret.type_.as_deref() {
            Some(BASIC_AUTH_TYPE) => Credentials::Basic {
                username: field(USERNAME_KEY),
                password: field(PASSWORD_KEY),
            },
            Some(SSH_AUTH_TYPE) => Credentials::SshKey {
                private_key: field(SSH_PRIVATE_KEY),
            },
            other => {
                debug!(secret_type = ?other, "Secret type carries no git credentials");
                Credentials::Anonymous
            }
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::Basic { username, .. } if !username.is_empty() => Some(username),
            _ => None,
        }
    }

    /// Provider API token; the basic-auth password doubles as one.
    pub fn token(&self) -> Option<String> {
        match self {
            Credentials::Basic { password, .. } if !password.is_empty() => Some(password.clone()),
            _ => None,
        }
    }

    /// Author derived from the username, else `fallback`.
    pub fn author(&self, fallback: &Author) -> Author {
        match self.username() {
            Some(user) => Author {
                name: user.to_string(),
                email: format!("{user}@users.noreply.github.com"),
            },
            None => fallback.clone(),
        }
    }
}

/// Fetch and interpret the referenced Secret. No reference means anonymous.
pub async fn load_credentials(
    client: &Client,
    secret_ref: Option<&SecretRef>,
    default_namespace: &str,
) -> Result<Credentials> {
    let Some(secret_ref) = secret_ref.filter(|s| !s.name.is_empty()) else {
        return Ok(Credentials::Anonymous);
    };

    let namespace = secret_ref
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default_namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get(&secret_ref.name).await?;

    let credentials = Credentials::from_secret(&secret);
    if credentials == Credentials::Anonymous {
        warn!(
            secret = %secret_ref.name,
            namespace = %namespace,
            "Secret is neither basic-auth nor ssh-auth, using anonymous access"
        );
    }
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(type_: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            type_: Some(type_.to_string()),
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Secret::default()
        }
    }

    fn fallback() -> Author {
        Author {
            name: "ks-releaser".to_string(),
            email: "bot@example.com".to_string(),
        }
    }

    #[test]
    fn test_basic_auth_secret() {
        let creds = Credentials::from_secret(&secret(
            BASIC_AUTH_TYPE,
            &[("username", "octocat"), ("password", "ghp_token")],
        ));
        assert_eq!(creds.username(), Some("octocat"));
        assert_eq!(creds.token().as_deref(), Some("ghp_token"));

        let author = creds.author(&fallback());
        assert_eq!(author.name, "octocat");
        assert_eq!(author.email, "octocat@users.noreply.github.com");
        assert!(!format!("{creds:?}").contains("ghp_token"));
    }

    #[test]
    fn test_ssh_and_other_secrets() {
        let ssh = Credentials::from_secret(&secret(SSH_AUTH_TYPE, &[("ssh-privatekey", "key")]));
        assert!(matches!(ssh, Credentials::SshKey { .. }));
        assert_eq!(ssh.token(), None);
        assert_eq!(ssh.author(&fallback()), fallback());

        let opaque = Credentials::from_secret(&secret("Opaque", &[("token", "x")]));
        assert_eq!(opaque, Credentials::Anonymous);
    }
}
