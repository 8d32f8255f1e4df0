use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{AuthService, DataStore};
use crate::config::RolesConfig;
use crate::error::{Error, Result};
use crate::local::LocalStore;

pub const SESSION_KEY: &str = "session";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session as returned by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }

    pub fn load(store: &LocalStore) -> Result<Option<Session>> {
        store.read::<Option<Session>>(SESSION_KEY)
    }

    pub fn save(&self, store: &LocalStore) -> Result<()> {
        store.write(SESSION_KEY, self)
    }

    pub fn clear(store: &LocalStore) -> Result<()> {
        store.remove(SESSION_KEY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "member" | "user" => Ok(Role::Member),
            other => Err(Error::InvalidArgument(format!("unknown role '{other}'"))),
        }
    }
}

/// Resolve the effective role from a role-table lookup.
///
/// Unknown role strings and failed lookups fall back to the configured
/// admin email list; everyone else is a member.
pub fn resolve_role(
    lookup: Result<Option<String>>,
    email: Option<&str>,
    roles: &RolesConfig,
) -> Role {
    match lookup {
        Ok(Some(raw)) => match raw.parse::<Role>() {
            Ok(role) => return role,
            Err(err) => tracing::warn!(error = %err, "unrecognised role value"),
        },
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "role lookup failed"),
    }
    if email.is_some_and(|email| roles.is_fallback_admin(email)) {
        Role::Admin
    } else {
        Role::Member
    }
}

/// Renew this long before the access token runs out.
pub const RENEWAL_MARGIN_SECS: i64 = 60;

/// Keeps the session of a long-running command alive.
///
/// A renewed session is persisted (when a store is attached) and swapped
/// into the data store, so clones of the store pick it up too.
#[derive(Debug, Clone)]
pub struct SessionKeeper {
    session: Session,
    local: Option<LocalStore>,
}

impl SessionKeeper {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            local: None,
        }
    }

    pub fn persist_to(mut self, local: LocalStore) -> Self {
        self.local = Some(local);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The access token expires within the renewal margin.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.session
            .expires_at
            .is_some_and(|at| at - Duration::seconds(RENEWAL_MARGIN_SECS) <= now)
    }

    pub async fn renew<B>(&mut self, backend: &B) -> Result<()>
    where
        B: AuthService + DataStore + ?Sized,
    {
        let refresh_token = self
            .session
            .refresh_token
            .as_deref()
            .ok_or(Error::NotSignedIn)?;
        let renewed = backend.refresh_session(refresh_token).await?;
        if let Some(local) = &self.local {
            renewed.save(local)?;
        }
        backend.use_session(&renewed);
        tracing::info!(expires_at = ?renewed.expires_at, "session renewed");
        self.session = renewed;
        Ok(())
    }
}

/// Fail unless the role allows admin-only operations.
pub fn require_admin(role: Role, operation: &'static str) -> Result<()> {
    if role.is_admin() {
        Ok(())
    } else {
        Err(Error::PermissionDenied(operation))
    }
}

/// Fail unless the role submits work, which admins never do.
pub fn require_member(role: Role, operation: &'static str) -> Result<()> {
    if role.is_admin() {
        Err(Error::PermissionDenied(operation))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> RolesConfig {
        RolesConfig {
            fallback_admins: vec!["Boss@Example.com".to_string()],
        }
    }

    #[test]
    fn table_role_wins() {
        let role = resolve_role(Ok(Some("admin".into())), Some("x@y.z"), &roles());
        assert_eq!(role, Role::Admin);
        let role = resolve_role(Ok(Some("member".into())), Some("boss@example.com"), &roles());
        assert_eq!(role, Role::Member);
    }

    #[test]
    fn fallback_list_applies_when_lookup_is_empty_or_fails() {
        assert_eq!(
            resolve_role(Ok(None), Some("boss@example.com"), &roles()),
            Role::Admin
        );
        assert_eq!(
            resolve_role(
                Err(Error::OperationFailed("down".into())),
                Some("other@example.com"),
                &roles()
            ),
            Role::Member
        );
        assert_eq!(resolve_role(Ok(None), None, &roles()), Role::Member);
    }

    #[test]
    fn members_cannot_run_admin_operations() {
        assert!(matches!(
            require_admin(Role::Member, "delete"),
            Err(Error::PermissionDenied("delete"))
        ));
        assert!(require_admin(Role::Admin, "delete").is_ok());
    }

    #[test]
    fn admins_cannot_submit() {
        assert!(matches!(
            require_member(Role::Admin, "apply"),
            Err(Error::PermissionDenied("apply"))
        ));
        assert!(require_member(Role::Member, "apply").is_ok());
    }

    #[test]
    fn session_expiry() {
        let now = Utc::now();
        let session = Session {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: Some(now - chrono::Duration::seconds(1)),
            user: User {
                id: "u1".into(),
                email: None,
            },
        };
        assert!(session.is_expired(now));
    }

    #[tokio::test]
    async fn keeper_renews_ahead_of_expiry_and_swaps_the_token() {
        use crate::backend::MemoryBackend;

        let backend = MemoryBackend::new().require_session();
        backend.add_account("ann@example.com", "pw", "u1");
        let session = backend
            .sign_in_password("ann@example.com", "pw")
            .await
            .unwrap();
        let mut keeper = SessionKeeper::new(session.clone());

        let expires_at = session.expires_at.unwrap();
        assert!(!keeper.is_due(expires_at - Duration::minutes(5)));
        assert!(keeper.is_due(expires_at - Duration::seconds(30)));

        backend.expire_access_tokens();
        backend.use_session(&session);
        assert!(backend.fetch_tasks().await.unwrap_err().is_unauthorized());

        keeper.renew(&backend).await.unwrap();
        assert_ne!(keeper.session().access_token, session.access_token);
        assert!(backend.fetch_tasks().await.is_ok());

        // Refresh tokens rotate.
        let stale = SessionKeeper::new(session).renew(&backend).await;
        assert!(stale.is_err());
    }
}
