//! Establishes the single store client shared by a benchmark run.

use std::sync::Arc;

use anyhow::{Context, Result};
use kvbench_client::{AuthToken, Authenticator, Connect, StoreClient};

use crate::config::Config;

/// Connects to the configured store and authenticates if a username is configured.
///
/// Both steps finish before this returns, so the token is attached to every request of the run.
/// A failure in either step fails before any benchmark task exists.
pub async fn connect<S>(config: &Config) -> Result<Arc<S>>
where
    S: StoreClient + Authenticator + Connect,
{
    let store = S::connect(&config.client_options())
        .await
        .with_context(|| format!("failed to connect to store at `{}`", config.endpoint))?;
    tracing::info!(endpoint = %config.endpoint, binding = store.name(), "connected");

    let store = match login(config, &store).await? {
        Some(token) => store.with_token(token),
        None => store,
    };
    Ok(Arc::new(store))
}

/// Obtains a token for the configured user, or `None` if no username is configured.
///
/// A missing password is sent as an empty one.
pub async fn login<A>(config: &Config, store: &A) -> Result<Option<AuthToken>>
where
    A: Authenticator + ?Sized,
{
    if config.username.is_empty() {
        return Ok(None);
    }

    let password = config.password().unwrap_or_default();
    let token = store
        .authenticate(&config.username, password)
        .await
        .with_context(|| format!("failed to authenticate as `{}`", config.username))?;
    tracing::info!(username = %config.username, "authenticated");

    Ok(Some(token))
}

#[cfg(test)]
mod tests {
    use kvbench_test::memory::MemoryStore;
    use secrecy::SecretBox;

    use crate::config::ConfigSecret;

    use super::*;

    fn config(username: &str, password: Option<&str>) -> Config {
        Config {
            username: username.to_owned(),
            password: password.map(|p| SecretBox::new(Box::new(ConfigSecret::from(p)))),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn skips_login_without_username() {
        let store = MemoryStore::new().credentials("root", "secret");

        let token = login(&config("", None), &store).await.unwrap();
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn logs_in_with_configured_credentials() {
        let store = MemoryStore::new().credentials("root", "secret");

        let token = login(&config("root", Some("secret")), &store)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.as_str(), "memory.root");
    }

    #[tokio::test]
    async fn rejected_login_names_the_user() {
        let store = MemoryStore::new().credentials("root", "secret");

        let error = login(&config("root", Some("wrong")), &store)
            .await
            .unwrap_err();
        assert!(format!("{error:#}").contains("failed to authenticate as `root`"));
    }

    #[tokio::test]
    async fn empty_password_is_sent_for_passwordless_user() {
        let store = MemoryStore::new().credentials("guest", "");

        let token = login(&config("guest", Some("")), &store).await.unwrap();
        assert_eq!(token.unwrap().as_str(), "memory.guest");

        let token = login(&config("guest", None), &store).await.unwrap();
        assert!(token.is_some());
    }
}
