// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Credential storage.
//!
//! The mirror never keeps the password of the remote instance in its own
//! files. Instead it asks a [`SecretStore`] for it right before logging in.
//!
//! # Platform Keychains
//!
//! The default store files secrets in the native keychain of the host
//! platform through the `keyring` crate, under the service name
//! [`SERVICE_NAME`] and the username of the remote instance. Which keychain
//! is used is fixed at build time (see [`Keychain`]). The service name is
//! kept stable, so passwords stored by older versions are still found.

use keyring::Entry;
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, info, instrument, warn};

/// Service name that secrets are filed under.
pub const SERVICE_NAME: &str = "sharelatex-versioning";

/// Result of storing a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// No secret existed before, new one was stored.
    Stored,

    /// Existing secret was overwritten.
    Replaced,

    /// Existing secret was kept, because overwriting was not requested.
    Kept,
}

/// Storage of login secrets keyed by username.
pub trait SecretStore {
    /// Look up secret of user.
    fn get(&self, username: &str) -> Result<Option<String>>;

    /// Store secret of user.
    ///
    /// Leaves an existing secret alone unless `overwrite` is set.
    fn set(&self, username: &str, secret: &str, overwrite: bool) -> Result<StoreOutcome>;
}

impl<S> SecretStore for &S
where
    S: SecretStore + ?Sized,
{
    fn get(&self, username: &str) -> Result<Option<String>> {
        (**self).get(username)
    }

    fn set(&self, username: &str, secret: &str, overwrite: bool) -> Result<StoreOutcome> {
        (**self).set(username, secret, overwrite)
    }
}

/// Native keychain of host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keychain {
    /// macOS keychain.
    Apple,

    /// Windows credential manager.
    Windows,

    /// Secret Service API (GNOME Keyring, KWallet).
    SecretService,
}

impl Keychain {
    /// Keychain this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::Apple
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::SecretService
        }
    }
}

impl Display for Keychain {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Apple => "macOS keychain",
            Self::Windows => "Windows credential manager",
            Self::SecretService => "secret service",
        };
        fmt.write_str(name)
    }
}

/// Secret store backed by the platform keychain.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Construct new store filing secrets under [`SERVICE_NAME`].
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Construct new store filing secrets under custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, username: &str) -> Result<Entry> {
        debug!("open {} entry {}/{username}", Keychain::current(), self.service);
        Entry::new(&self.service, username).map_err(CredentialError::Keyring)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    #[instrument(skip(self), level = "debug")]
    fn get(&self, username: &str) -> Result<Option<String>> {
        found(self.entry(username)?.get_password())
    }

    #[instrument(skip(self, secret), level = "debug")]
    fn set(&self, username: &str, secret: &str, overwrite: bool) -> Result<StoreOutcome> {
        let entry = self.entry(username)?;
        let outcome = match found(entry.get_password())? {
            Some(_) if !overwrite => {
                warn!("there is already a password stored for {username}");
                return Ok(StoreOutcome::Kept);
            }
            Some(_) => StoreOutcome::Replaced,
            None => StoreOutcome::Stored,
        };

        entry.set_password(secret).map_err(CredentialError::Keyring)?;
        info!("stored password for {username} in {}", Keychain::current());

        Ok(outcome)
    }
}

/// Secret store that only lives in memory.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RefCell<HashMap<String, String>>,
}

impl MemorySecretStore {
    /// Construct new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct new store holding a single secret.
    pub fn with_secret(username: impl Into<String>, secret: impl Into<String>) -> Self {
        let store = Self::default();
        store.secrets.borrow_mut().insert(username.into(), secret.into());
        store
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, username: &str) -> Result<Option<String>> {
        Ok(self.secrets.borrow().get(username).cloned())
    }

    fn set(&self, username: &str, secret: &str, overwrite: bool) -> Result<StoreOutcome> {
        let mut secrets = self.secrets.borrow_mut();
        let outcome = match secrets.get(username) {
            Some(_) if !overwrite => return Ok(StoreOutcome::Kept),
            Some(_) => StoreOutcome::Replaced,
            None => StoreOutcome::Stored,
        };
        secrets.insert(username.into(), secret.into());

        Ok(outcome)
    }
}

// INVARIANT: Only a missing entry means "no secret", every other keychain
// failure is reported.
fn found(lookup: keyring::Result<String>) -> Result<Option<String>> {
    match lookup {
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(error) => Err(CredentialError::Keyring(error)),
    }
}

/// Credential storage error types.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Platform keychain cannot be accessed.
    #[error("failed to access platform keychain")]
    Keyring(#[source] keyring::Error),
}

/// Friendly result alias :3
pub type Result<T, E = CredentialError> = std::result::Result<T, E>;
