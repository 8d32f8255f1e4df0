//! Per-invocation wiring: config, local state, backend and session.

use std::sync::Arc;

use chrono::{Local, Utc};

use crate::backend::{AuthService, BackendSettings, DataStore, RestBackend};
use crate::config::Config;
use crate::daily::DailyTargetCache;
use crate::dashboard::{Dashboard, DashboardOptions, Viewer};
use crate::error::{Error, Result};
use crate::local::LocalStore;
use crate::output::OutputOptions;
use crate::seen::SeenTracker;
use crate::session::{resolve_role, Session, SessionKeeper};

pub(crate) struct Context {
    pub output: OutputOptions,
    pub config: Config,
    pub local: LocalStore,
    backend_url: Option<String>,
    backend_key: Option<String>,
}

impl Context {
    pub fn new(
        output: OutputOptions,
        config: Config,
        local: LocalStore,
        backend_url: Option<String>,
        backend_key: Option<String>,
    ) -> Self {
        Self {
            output,
            config,
            local,
            backend_url,
            backend_key,
        }
    }

    /// An unauthenticated client; fails with `MissingEnv` before anything else.
    pub fn backend(&self) -> Result<RestBackend> {
        let settings = BackendSettings::resolve(
            self.backend_url.clone(),
            self.backend_key.clone(),
            &self.config.backend,
        )?;
        RestBackend::new(&settings)
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.config.backend.redirect_url.as_deref()
    }

    /// The stored session, refreshed first when it has expired.
    pub async fn session(&self, backend: &RestBackend) -> Result<Session> {
        let session = Session::load(&self.local)?.ok_or(Error::NotSignedIn)?;
        if !session.is_expired(Utc::now()) {
            return Ok(session);
        }
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            return Err(Error::NotSignedIn);
        };
        tracing::debug!("session expired, refreshing");
        let refreshed = backend.refresh_session(refresh_token).await?;
        refreshed.save(&self.local)?;
        Ok(refreshed)
    }

    /// A signed-in dashboard with persisted local state, already refreshed.
    pub async fn dashboard(&self) -> Result<Dashboard<RestBackend>> {
        let (dashboard, _) = self.signed_in().await?;
        Ok(dashboard)
    }

    /// Like [`Context::dashboard`], plus a keeper for commands that outlive
    /// one access token.
    pub async fn signed_in(&self) -> Result<(Dashboard<RestBackend>, SessionKeeper)> {
        let anonymous = self.backend()?;
        let session = self.session(&anonymous).await?;
        let backend = Arc::new(anonymous.with_session(Some(&session)));

        let lookup = backend.lookup_role(&session.user.id).await;
        let role = resolve_role(lookup, session.email(), &self.config.roles);
        tracing::debug!(role = %role, "role resolved");
        let keeper = SessionKeeper::new(session.clone()).persist_to(self.local.clone());

        let today = Local::now().date_naive();
        let mut dashboard = Dashboard::new(
            backend,
            Viewer::new(session.user, role),
            DashboardOptions::from(&self.config.dashboard),
        )
        .with_local_state(
            SeenTracker::load(self.local.clone())?,
            DailyTargetCache::load(self.local.clone(), today)?,
        );
        dashboard.try_refresh().await?;
        Ok((dashboard, keeper))
    }
}
