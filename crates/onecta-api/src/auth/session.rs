// Credential record lifecycle shared by both auth flows.
//
// Owns the in-memory record, lazily loads it from the token file, keeps
// `expires_at` normalized, deduplicates refreshes, persists every new
// record, and announces changes on the auth event channel. The flows only
// supply the network request that turns a refresh token into a record.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use secrecy::SecretString;
use tokio::sync::{OnceCell, broadcast};
use tracing::{debug, info, warn};

use super::flight::{RefreshFailure, RefreshFlight};
use super::store::TokenStore;
use super::tokens::TokenSet;
use super::{AuthEvent, AuthMode};
use crate::error::Error;

const EVENT_CHANNEL_SIZE: usize = 64;

/// Network half of a refresh: refresh token in, fresh record out.
pub(crate) type RefreshRequest = BoxFuture<'static, Result<TokenSet, Error>>;

enum Usable {
    Valid(SecretString),
    NeedsRefresh,
    Missing,
}

pub(crate) struct TokenSession {
    mode: AuthMode,
    store: TokenStore,
    loaded: OnceCell<()>,
    tokens: RwLock<Option<TokenSet>>,
    flight: RefreshFlight,
    events: broadcast::Sender<AuthEvent>,
}

impl TokenSession {
    pub(crate) fn new(mode: AuthMode, store: TokenStore) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Arc::new(Self {
            mode,
            store,
            loaded: OnceCell::new(),
            tokens: RwLock::new(None),
            flight: RefreshFlight::default(),
            events,
        })
    }

    pub(crate) fn mode(&self) -> AuthMode {
        self.mode
    }

    pub(crate) fn store(&self) -> &TokenStore {
        &self.store
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                if let Some(tokens) = self.store.load().await {
                    let mut guard = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
                    if guard.is_none() {
                        *guard = Some(tokens);
                    }
                }
            })
            .await;
    }

    fn snapshot(&self) -> Option<TokenSet> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Inspect the current record, normalizing (and persisting) a missing
    /// `expires_at` on the way.
    async fn usable(&self) -> Usable {
        self.ensure_loaded().await;
        let now = Utc::now();

        let (tokens, normalized) = {
            let mut guard = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
            let Some(tokens) = guard.as_mut() else {
                return Usable::Missing;
            };
            let normalized = tokens.normalize(now);
            (tokens.clone(), normalized)
        };

        if normalized {
            debug!(mode = %self.mode, "derived expires_at for stored record");
            self.persist(&tokens).await;
        }

        if tokens.is_valid_at(now) {
            Usable::Valid(tokens.access_token)
        } else if tokens.has_refresh_token() {
            Usable::NeedsRefresh
        } else {
            Usable::Missing
        }
    }

    /// Current access token, refreshing through `request` when the record
    /// sits inside the refresh buffer.
    pub(crate) async fn access_token<F>(self: &Arc<Self>, request: F) -> Result<SecretString, Error>
    where
        F: FnOnce(SecretString) -> RefreshRequest + Send + 'static,
    {
        match self.usable().await {
            Usable::Valid(token) => Ok(token),
            Usable::NeedsRefresh => {
                debug!(mode = %self.mode, "access token inside refresh buffer");
                let tokens = self.refresh_with(request).await?;
                Ok(tokens.access_token)
            }
            Usable::Missing => Err(Error::AuthRequired),
        }
    }

    /// Run a deduplicated refresh. Every concurrent caller shares one
    /// network request and observes the same outcome.
    pub(crate) async fn refresh_with<F>(self: &Arc<Self>, request: F) -> Result<TokenSet, Error>
    where
        F: FnOnce(SecretString) -> RefreshRequest + Send + 'static,
    {
        self.ensure_loaded().await;

        let session = Arc::clone(self);
        let result = self
            .flight
            .run(move || {
                async move {
                    let refresh_token = session
                        .snapshot()
                        .and_then(|t| t.refresh_token)
                        .ok_or_else(|| RefreshFailure::new("no refresh token available"));

                    let outcome = match refresh_token {
                        Ok(rt) => request(rt).await.map_err(RefreshFailure::from),
                        Err(failure) => Err(failure),
                    };

                    match outcome {
                        Ok(tokens) => {
                            info!(mode = %session.mode, "access token refreshed");
                            Ok(session.install(tokens).await)
                        }
                        Err(failure) => {
                            warn!(
                                mode = %session.mode,
                                invalid_grant = failure.invalid_grant,
                                error = %failure.message,
                                "token refresh failed"
                            );
                            let _ = session.events.send(AuthEvent::RefreshFailed {
                                mode: session.mode,
                                message: failure.message.clone(),
                                invalid_grant: failure.invalid_grant,
                            });
                            Err(failure)
                        }
                    }
                }
                .boxed()
            })
            .await;

        result.map_err(Error::from)
    }

    /// Adopt a freshly issued record: normalize, keep the previous refresh
    /// token if the new record has none, persist, and announce.
    ///
    /// A failed write is logged; the record stays usable in memory.
    pub(crate) async fn install(&self, mut tokens: TokenSet) -> TokenSet {
        self.ensure_loaded().await;
        tokens.normalize(Utc::now());

        {
            let mut guard = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
            if !tokens.has_refresh_token() {
                tokens.refresh_token = guard.as_ref().and_then(|prev| prev.refresh_token.clone());
            }
            *guard = Some(tokens.clone());
        }

        self.persist(&tokens).await;
        let _ = self.events.send(AuthEvent::TokenChanged {
            mode: self.mode,
            expires_at: tokens.expires_at,
        });
        tokens
    }

    async fn persist(&self, tokens: &TokenSet) {
        if let Err(e) = self.store.save(tokens).await {
            warn!(mode = %self.mode, error = %e, "failed to persist credentials");
        }
    }

    pub(crate) async fn is_authenticated(&self) -> bool {
        self.ensure_loaded().await;
        self.snapshot()
            .is_some_and(|t| t.is_valid_at(Utc::now()) || t.has_refresh_token())
    }

    pub(crate) async fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.ensure_loaded().await;
        self.snapshot().and_then(|t| t.expires_at)
    }

    /// Current refresh token, if any.
    pub(crate) async fn refresh_token_value(&self) -> Option<SecretString> {
        self.ensure_loaded().await;
        self.snapshot().and_then(|t| t.refresh_token)
    }

    /// Drop the in-memory record and delete the token file.
    pub(crate) async fn clear(&self) -> Result<(), Error> {
        self.ensure_loaded().await;
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.store.delete().await?;
        info!(mode = %self.mode, "credentials cleared");
        let _ = self
            .events
            .send(AuthEvent::CredentialsCleared { mode: self.mode });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::*;

    fn session(dir: &TempDir) -> Arc<TokenSession> {
        TokenSession::new(AuthMode::Portal, TokenStore::new(dir.path().join("tokens.json")))
    }

    fn never_called(_: SecretString) -> RefreshRequest {
        async {
            Err(Error::Validation {
                message: "refresh should not run".into(),
            })
        }
        .boxed()
    }

    #[tokio::test]
    async fn missing_record_requires_auth() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        assert!(matches!(
            session.access_token(never_called).await,
            Err(Error::AuthRequired)
        ));
        assert!(!session.is_authenticated().await);
    }

    #[tokio::test]
    async fn stored_record_gets_expires_at_persisted() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        store
            .save(&TokenSet::bearer("stored", Some(3600)))
            .await
            .unwrap();

        let before = Utc::now();
        let session = TokenSession::new(AuthMode::App, store.clone());
        let token = session.access_token(never_called).await.unwrap();
        assert_eq!(token.expose_secret(), "stored");

        let on_disk = store.load().await.unwrap();
        let expires_at = on_disk.expires_at.unwrap();
        assert!(expires_at >= before + chrono::Duration::seconds(3600));
        assert!(expires_at <= Utc::now() + chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn expired_record_is_refreshed_and_keeps_refresh_token() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let mut events = session.subscribe();

        let mut stale = TokenSet::bearer("old", Some(5)).with_refresh_token("r1");
        stale.normalize(Utc::now());
        session.install(stale).await;
        let _ = events.recv().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let token = session
            .access_token(move |rt| {
                counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(rt.expose_secret(), "r1");
                async { Ok::<_, Error>(TokenSet::bearer("new", Some(3600))) }.boxed()
            })
            .await
            .unwrap();

        assert_eq!(token.expose_secret(), "new");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            session
                .refresh_token_value()
                .await
                .map(|t| t.expose_secret().to_owned()),
            Some("r1".to_owned())
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            AuthEvent::TokenChanged {
                mode: AuthMode::Portal,
                expires_at: Some(_)
            }
        ));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails_and_broadcasts() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        session.install(TokenSet::bearer("a", None)).await;
        let mut events = session.subscribe();

        let err = session.refresh_with(never_called).await.unwrap_err();
        assert!(matches!(
            err,
            Error::RefreshFailed {
                invalid_grant: false,
                ..
            }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            AuthEvent::RefreshFailed { .. }
        ));
    }

    #[tokio::test]
    async fn clear_removes_file_and_record() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        session
            .install(TokenSet::bearer("a", Some(3600)).with_refresh_token("r"))
            .await;
        assert!(session.is_authenticated().await);
        assert!(session.store().path().exists());

        session.clear().await.unwrap();
        assert!(!session.is_authenticated().await);
        assert!(!session.store().path().exists());
        assert!(session.token_expiration().await.is_none());
    }
}
