//! Token acquisition and the per-process token cache.
//!
//! Tokens are cached per `(tenant, sorted scopes, client id)` key for the
//! remainder of the process. Each key has its own lock, so concurrent
//! requesters for the same key never trigger more than one interactive
//! authentication flow: the first runs it, the rest block and reuse the
//! result.

use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{HoistError, HoistResult};

/// A bearer token for one audience.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Expired or expiring within the next minute.
    pub fn is_expired(&self) -> bool {
        match self.expires_on {
            Some(expires_on) => expires_on <= Utc::now() + ChronoDuration::seconds(60),
            None => false,
        }
    }
}

/// Acquires tokens for a tenant and scope set. Implementations may be
/// interactive; callers go through [`TokenCache`] so the flow runs at most
/// once per key.
pub trait TokenProvider: Send + Sync {
    fn acquire(&self, tenant: &str, scopes: &[String]) -> HoistResult<AccessToken>;
}

/// Cache key: tenant, sorted deduplicated scopes, client id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    tenant: String,
    scopes: Vec<String>,
    client_id: String,
}

impl TokenKey {
    pub fn new(tenant: &str, scopes: &[String], client_id: &str) -> Self {
        let mut scopes: Vec<String> = scopes.to_vec();
        scopes.sort();
        scopes.dedup();
        Self {
            tenant: tenant.to_string(),
            scopes,
            client_id: client_id.to_string(),
        }
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }
}

type Slot = Arc<Mutex<Option<AccessToken>>>;

/// Per-process token cache with per-key single-flight acquisition.
#[derive(Default)]
pub struct TokenCache {
    slots: Mutex<HashMap<TokenKey, Slot>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token for `key`, or run `acquire` to fill it.
    ///
    /// The per-key lock is held across the acquisition, so concurrent
    /// callers with the same key wait and then reuse the first result.
    /// Expired entries are re-acquired.
    pub fn get_or_acquire<F>(&self, key: &TokenKey, acquire: F) -> HoistResult<AccessToken>
    where
        F: FnOnce() -> HoistResult<AccessToken>,
    {
        let slot = {
            let mut slots = self.slots.lock().expect("token cache lock poisoned");
            slots.entry(key.clone()).or_default().clone()
        };

        let mut guard = slot.lock().expect("token slot lock poisoned");
        if let Some(token) = guard.as_ref() {
            if !token.is_expired() {
                debug!(tenant = %key.tenant, "token cache hit");
                return Ok(token.clone());
            }
            debug!(tenant = %key.tenant, "cached token expired, re-acquiring");
        }
        let token = acquire()?;
        *guard = Some(token.clone());
        Ok(token)
    }
}

/// Token provider backed by the Azure CLI.
///
/// Silent acquisition shells out to `az account get-access-token`; when no
/// account is signed in, it falls back to `az login --use-device-code`
/// with inherited stdio so the operator sees the device-code prompt in
/// real time.
#[derive(Debug, Default)]
pub struct AzCliTokenProvider;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
}

impl AzCliTokenProvider {
    fn get_access_token(&self, tenant: &str, scopes: &[String]) -> HoistResult<AccessToken> {
        let mut cmd = Command::new("az");
        cmd.args(["account", "get-access-token", "--tenant", tenant]);
        for scope in scopes {
            cmd.args(["--scope", scope]);
        }
        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HoistError::authentication("Azure CLI (az) was not found on PATH").with_remediation(
                    [
                        "Install the Azure CLI: https://aka.ms/install-azure-cli",
                        "Re-run the command after installation",
                    ],
                )
            } else {
                HoistError::authentication("Failed to invoke the Azure CLI")
                    .with_source(anyhow::Error::new(e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HoistError::authentication("Token acquisition failed")
                .with_reason(stderr.trim().to_string())
                .with_remediation([
                    "Sign in with `az login` against the configured tenant",
                    "Verify the tenant id in your configuration",
                ]));
        }

        let response: AzTokenResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| {
                HoistError::authentication("Unexpected token response from the Azure CLI")
                    .with_reason(e.to_string())
            })?;

        let expires_on = response
            .expires_on
            .as_deref()
            .and_then(parse_az_timestamp);

        Ok(AccessToken {
            token: response.access_token,
            expires_on,
        })
    }

    fn interactive_login(&self, tenant: &str) -> HoistResult<()> {
        info!(tenant, "starting interactive Azure CLI login");
        // Inherited stdio: the operator must see the device-code prompt.
        let status = Command::new("az")
            .args(["login", "--tenant", tenant, "--use-device-code"])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| {
                HoistError::authentication("Failed to start interactive login")
                    .with_source(anyhow::Error::new(e))
            })?;
        if !status.success() {
            return Err(
                HoistError::authentication("Interactive login did not complete").with_remediation(
                    [
                        "Run `az login --use-device-code` manually and retry",
                        "Check that your account has access to the tenant",
                    ],
                ),
            );
        }
        Ok(())
    }
}

impl TokenProvider for AzCliTokenProvider {
    fn acquire(&self, tenant: &str, scopes: &[String]) -> HoistResult<AccessToken> {
        match self.get_access_token(tenant, scopes) {
            Ok(token) => Ok(token),
            Err(first) => {
                // Only a failed silent acquisition warrants the interactive
                // fallback; a missing binary does not.
                if first.reason.is_none() {
                    return Err(first);
                }
                self.interactive_login(tenant)?;
                self.get_access_token(tenant, scopes)
            }
        }
    }
}

fn parse_az_timestamp(value: &str) -> Option<DateTime<Utc>> {
    // `az` emits a local timestamp like "2026-08-04 12:34:56.000000".
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn token(value: &str) -> AccessToken {
        AccessToken {
            token: value.to_string(),
            expires_on: Some(Utc::now() + ChronoDuration::hours(1)),
        }
    }

    #[test]
    fn key_sorts_and_dedupes_scopes() {
        let a = TokenKey::new(
            "tenant",
            &["b".to_string(), "a".to_string(), "b".to_string()],
            "client",
        );
        let b = TokenKey::new("tenant", &["a".to_string(), "b".to_string()], "client");
        assert_eq!(a, b);
        assert_eq!(a.scopes(), ["a", "b"]);
    }

    #[test]
    fn same_key_acquires_once() {
        let cache = TokenCache::new();
        let key = TokenKey::new("tenant", &["scope".to_string()], "client");
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let got = cache
                .get_or_acquire(&key, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(token("tok"))
                })
                .unwrap();
            assert_eq!(got.token, "tok");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_scopes_acquire_separately() {
        let cache = TokenCache::new();
        let calls = AtomicU32::new(0);
        let key_a = TokenKey::new("tenant", &["a".to_string()], "client");
        let key_b = TokenKey::new("tenant", &["b".to_string()], "client");

        for key in [&key_a, &key_b] {
            cache
                .get_or_acquire(key, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(token("tok"))
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn expired_token_is_reacquired() {
        let cache = TokenCache::new();
        let key = TokenKey::new("tenant", &["scope".to_string()], "client");
        let calls = AtomicU32::new(0);

        cache
            .get_or_acquire(&key, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(AccessToken {
                    token: "old".to_string(),
                    expires_on: Some(Utc::now() - ChronoDuration::minutes(5)),
                })
            })
            .unwrap();
        let fresh = cache
            .get_or_acquire(&key, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(token("new"))
            })
            .unwrap();
        assert_eq!(fresh.token, "new");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_requesters_share_one_flight() {
        let cache = Arc::new(TokenCache::new());
        let key = TokenKey::new("tenant", &["scope".to_string()], "client");
        let calls = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_acquire(&key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            // Simulate a slow interactive flow.
                            std::thread::sleep(std::time::Duration::from_millis(30));
                            Ok(token("shared"))
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().token, "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn az_timestamp_formats_parse() {
        assert!(parse_az_timestamp("2026-08-04 12:34:56.000000").is_some());
        assert!(parse_az_timestamp("2026-08-04T12:34:56+00:00").is_some());
        assert!(parse_az_timestamp("garbage").is_none());
    }
}
