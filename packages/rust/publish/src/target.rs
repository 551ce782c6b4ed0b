//! Publish target identity and credentials.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use docstitch_shared::{PublishConfig, PublishError};

/// A push token. Never printed, logged, or serialized.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub(crate) fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// The ref a publisher overwrites and the credential it pushes with.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    /// Remote URL or local path.
    pub remote: String,
    /// Branch name (without `refs/heads/`).
    pub branch: String,
    credential: Option<Credential>,
}

impl PublishTarget {
    pub fn new(remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            branch: branch.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Build the target from `[publish]`, reading the token from `token_env`.
    ///
    /// A configured `token_env` that is unset in the environment is an error.
    pub fn from_config(config: &PublishConfig) -> Result<Self, PublishError> {
        let remote = config.remote.clone().ok_or_else(|| PublishError::Snapshot {
            detail: "no publish.remote configured".into(),
        })?;
        let mut target = Self::new(remote, config.branch.clone());
        if let Some(var) = &config.token_env {
            let token = std::env::var(var)
                .ok()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| PublishError::MissingCredential { var: var.clone() })?;
            target = target.with_credential(Credential::new(token));
        }
        Ok(target)
    }

    /// Fully qualified ref that gets overwritten.
    pub fn ref_name(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    /// `<remote>#<ref>` with any userinfo redacted.
    pub fn describe(&self) -> String {
        format!("{}#{}", redact_url(&self.remote), self.ref_name())
    }

    /// URL handed to git. It never carries the token; with a credential, any
    /// userinfo already in an https remote is dropped.
    pub(crate) fn push_url(&self) -> String {
        match (&self.credential, self.remote.strip_prefix("https://")) {
            (Some(_), Some(rest)) => format!("https://{}", strip_userinfo(rest)),
            _ => self.remote.clone(),
        }
    }

    /// Environment that hands the token to git as an `http.extraHeader`
    /// through `GIT_CONFIG_*`, keeping it out of the process arguments.
    /// Empty unless the remote is https and a credential is set.
    pub(crate) fn auth_env(&self) -> Vec<(&'static str, String)> {
        match &self.credential {
            Some(cred) if self.remote.starts_with("https://") => vec![
                ("GIT_CONFIG_COUNT", "1".to_string()),
                ("GIT_CONFIG_KEY_0", "http.extraHeader".to_string()),
                (
                    "GIT_CONFIG_VALUE_0",
                    format!("Authorization: Basic {}", basic_auth(cred.secret())),
                ),
            ],
            _ => Vec::new(),
        }
    }

    /// Remove the token and any embedded userinfo from `text`.
    pub(crate) fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        if let Some(cred) = self.credential.as_ref().filter(|c| !c.secret().is_empty()) {
            out = out
                .replace(&basic_auth(cred.secret()), "***")
                .replace(cred.secret(), "***");
        }
        out.split(' ')
            .map(redact_url)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Replace the userinfo part of a URL with `***`. Non-URLs pass through.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

fn strip_userinfo(rest: &str) -> &str {
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => &rest[at + 1..],
        None => rest,
    }
}

fn basic_auth(token: &str) -> String {
    STANDARD.encode(format!("x-access-token:{token}"))
}
