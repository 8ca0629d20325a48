// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote session handling.
//!
//! The remote instance sits behind a classic HTML login form. Retrieving a
//! project archive therefore takes three requests on one cookie-preserving
//! session:
//!
//! 1. `GET {base}/ldap/login` to obtain the session cookie and the `_csrf`
//!    token hidden in the login form.
//! 2. `POST {base}/ldap/login` with the token, username, and password.
//! 3. `GET {base}/project/{id}/download/zip` to fetch the archive.
//!
//! # Login Result Heuristic
//!
//! The remote does not tell clients plainly whether a login worked. When it
//! rejects the credentials it answers with a JSON message, and when it
//! accepts them it answers with an HTML page. So a login only counts as
//! successful if the status is 200 _and_ the body is not JSON.

use crate::path::join_url;

use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::{blocking::Client, StatusCode};
use std::{
    io::{copy, Write},
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, error, info, instrument};

const LOGIN_PATH: &str = "ldap/login";

// INVARIANT: Both patterns are constant and valid.
static INPUT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<input\b[^>]*>"#).expect("input tag pattern is valid")
});
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("attribute pattern is valid")
});

/// Authenticated access to a remote instance.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    client: Client,
    base_url: String,
    download_dir: Option<PathBuf>,
}

impl RemoteSession {
    /// Construct new session for remote instance at base URL.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Client`] if HTTP client cannot be set up.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RemoteError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            download_dir: None,
        })
    }

    /// Place temporary archive files in target directory instead of the
    /// system default.
    pub fn with_download_dir(mut self, directory: impl AsRef<Path>) -> Self {
        self.download_dir = Some(directory.as_ref().to_path_buf());
        self
    }

    /// Log in and download archive of project into a temporary file.
    ///
    /// The temporary file is deleted once dropped.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Unreachable`] if remote cannot be contacted.
    /// - Return [`RemoteError::MissingCredential`] if no secret was given.
    /// - Return [`RemoteError::LoginPage`], [`RemoteError::MissingCsrf`], or
    ///   [`RemoteError::Rejected`] if login fails.
    /// - Return [`RemoteError::Download`] if archive cannot be downloaded.
    /// - Return [`RemoteError::Io`] if temporary file cannot be written.
    #[instrument(skip(self, secret), level = "debug")]
    pub fn fetch_archive(
        &self,
        project_id: &str,
        username: &str,
        secret: Option<&str>,
    ) -> Result<NamedTempFile> {
        self.login(username, secret)?;
        self.download(project_id)
    }

    fn login(&self, username: &str, secret: Option<&str>) -> Result<()> {
        let login_url = join_url([self.base_url.as_str(), LOGIN_PATH]);
        info!("open login page {login_url}");
        let page = self.client.get(&login_url).send().map_err(|err| RemoteError::Unreachable {
            source: err,
            url: login_url.clone(),
        })?;

        let Some(secret) = secret else {
            error!("no password stored for {username}");
            return Err(RemoteError::MissingCredential(username.into()));
        };

        if page.status() != StatusCode::OK {
            return Err(RemoteError::LoginPage(page.status()));
        }

        let body = page.text().map_err(|err| RemoteError::Unreachable {
            source: err,
            url: login_url.clone(),
        })?;
        let csrf = extract_csrf(&body).ok_or(RemoteError::MissingCsrf)?;

        let response = self
            .client
            .post(&login_url)
            .form(&[("_csrf", csrf.as_str()), ("login", username), ("password", secret)])
            .send()
            .map_err(|err| RemoteError::Unreachable {
                source: err,
                url: login_url.clone(),
            })?;
        let status = response.status();
        let body = response.text().map_err(|err| RemoteError::Unreachable {
            source: err,
            url: login_url.clone(),
        })?;

        // INVARIANT: Only a non-JSON body signals an accepted login.
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(message) => {
                error!("authentication failed: {message}");
                Err(RemoteError::Rejected(message.to_string()))
            }
            Err(_) if status == StatusCode::OK => {
                debug!("login response is not JSON, session authenticated");
                Ok(())
            }
            Err(_) => {
                debug!("login response ({status}): {body}");
                Err(RemoteError::Rejected(format!("status {status}")))
            }
        }
    }

    fn download(&self, project_id: &str) -> Result<NamedTempFile> {
        let url = join_url([self.base_url.as_str(), "project", project_id, "download/zip"]);
        info!("download archive {url}");
        let response = self.client.get(&url).send().map_err(|err| RemoteError::Unreachable {
            source: err,
            url: url.clone(),
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().unwrap_or_default();
            debug!("download response body: {body}");
            return Err(RemoteError::Download { status, body });
        }

        let bar = match response.content_length() {
            Some(length) => ProgressBar::new(length),
            None => ProgressBar::new_spinner(),
        };
        if let Ok(style) = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg}  [{wide_bar:.yellow/blue}] {bytes}/{total_bytes}",
        ) {
            bar.set_style(style.progress_chars("-Cco."));
        }
        bar.set_message(format!("project {project_id}"));

        let mut builder = Builder::new();
        builder.prefix("sharemirror-").suffix(".zip");
        let mut file = match &self.download_dir {
            Some(directory) => builder.tempfile_in(directory)?,
            None => builder.tempfile()?,
        };
        let written = copy(&mut bar.wrap_read(response), &mut file)?;
        file.flush()?;
        bar.finish_and_clear();
        info!("downloaded {written} bytes to {:?}", file.path().display());

        Ok(file)
    }
}

/// Find value of hidden `_csrf` input field in HTML document.
pub fn extract_csrf(html: &str) -> Option<String> {
    INPUT_TAG.find_iter(html).find_map(|tag| {
        let mut name = None;
        let mut value = None;
        for capture in ATTRIBUTE.captures_iter(tag.as_str()) {
            let text = capture
                .get(2)
                .or_else(|| capture.get(3))
                .or_else(|| capture.get(4))
                .map(|text| text.as_str());
            match capture[1].to_ascii_lowercase().as_str() {
                "name" => name = text,
                "value" => value = text,
                _ => {}
            }
        }

        if name == Some("_csrf") {
            value.map(str::to_owned)
        } else {
            None
        }
    })
}

/// Remote session error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// HTTP client cannot be constructed.
    #[error("failed to set up HTTP client")]
    Client(#[source] reqwest::Error),

    /// Remote cannot be contacted.
    #[error("failed to reach {url}")]
    Unreachable {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// No secret is available for user.
    #[error("no credential stored for {0}")]
    MissingCredential(String),

    /// Login page answered with unexpected status.
    #[error("login page unreachable: status {0}")]
    LoginPage(StatusCode),

    /// Login page lacks the `_csrf` form field.
    #[error("login page has no _csrf field")]
    MissingCsrf,

    /// Remote rejected the login.
    #[error("authentication failed: {0}")]
    Rejected(String),

    /// Archive download answered with unexpected status.
    #[error("could not download the archive: status {status}")]
    Download { status: StatusCode, body: String },

    /// Temporary archive file cannot be written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Check if error stems from authentication rather than the network.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential(_) | Self::LoginPage(_) | Self::MissingCsrf | Self::Rejected(_)
        )
    }
}

/// Friendly result alias :3
type Result<T, E = RemoteError> = std::result::Result<T, E>;
