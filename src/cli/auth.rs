//! Sign-in, sign-up and account commands.

use serde::Serialize;

use super::Context;
use crate::backend::{AuthService, DataStore};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::session::{resolve_role, Role, Session, User};

#[derive(Serialize)]
struct SignedIn<'a> {
    user: &'a User,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
struct EmailSent<'a> {
    email: &'a str,
    kind: &'static str,
}

pub async fn run_login(ctx: &Context, email: &str, password: Option<String>) -> Result<()> {
    let Some(password) = password else {
        return run_magic_link(ctx, email).await;
    };
    let backend = ctx.backend()?;
    let session = backend.sign_in_password(email, &password).await?;
    session.save(&ctx.local)?;
    tracing::info!(user = %session.user.id, "signed in");
    report_session(ctx, "login", &session)
}

pub async fn run_signup(ctx: &Context, email: &str, password: &str) -> Result<()> {
    let backend = ctx.backend()?;
    match backend.sign_up(email, password, ctx.redirect_url()).await? {
        Some(session) => {
            session.save(&ctx.local)?;
            report_session(ctx, "signup", &session)
        }
        None => {
            let mut human = HumanOutput::new(format!("Account created for {email}"));
            human.push_next_step("confirm the address from the email, then `joblink login`");
            emit_success(
                ctx.output,
                "signup",
                &EmailSent {
                    email,
                    kind: "confirmation",
                },
                Some(&human),
            )
        }
    }
}

pub async fn run_magic_link(ctx: &Context, email: &str) -> Result<()> {
    let backend = ctx.backend()?;
    backend.send_magic_link(email, ctx.redirect_url()).await?;
    let human = HumanOutput::new(format!("Sign-in link sent to {email}"));
    emit_success(
        ctx.output,
        "magic-link",
        &EmailSent {
            email,
            kind: "magic_link",
        },
        Some(&human),
    )
}

pub fn run_oauth_url(ctx: &Context, provider: &str) -> Result<()> {
    let backend = ctx.backend()?;
    let url = backend.oauth_authorize_url(provider, ctx.redirect_url())?;
    #[derive(Serialize)]
    struct OauthUrl<'a> {
        provider: &'a str,
        url: &'a str,
    }
    let human = HumanOutput::new(url.clone());
    emit_success(
        ctx.output,
        "oauth-url",
        &OauthUrl {
            provider,
            url: &url,
        },
        Some(&human),
    )
}

pub async fn run_logout(ctx: &Context) -> Result<()> {
    if let Some(session) = Session::load(&ctx.local)? {
        let backend = ctx.backend()?;
        // The local session goes away even if the backend call fails.
        if let Err(err) = backend.sign_out(&session).await {
            tracing::warn!(error = %err, "remote sign-out failed");
        }
    }
    Session::clear(&ctx.local)?;
    let human = HumanOutput::new("Signed out");
    emit_success(ctx.output, "logout", &serde_json::json!({}), Some(&human))
}

pub async fn run_forgot_password(ctx: &Context, email: &str) -> Result<()> {
    let backend = ctx.backend()?;
    backend
        .request_password_reset(email, ctx.redirect_url())
        .await?;
    let mut human = HumanOutput::new(format!("Password reset email sent to {email}"));
    human.push_next_step("follow the link, then `joblink set-password --password ...`");
    emit_success(
        ctx.output,
        "forgot-password",
        &EmailSent {
            email,
            kind: "password_reset",
        },
        Some(&human),
    )
}

pub async fn run_set_password(ctx: &Context, password: &str) -> Result<()> {
    let backend = ctx.backend()?;
    let session = ctx.session(&backend).await?;
    let user = backend.update_password(&session, password).await?;
    let human = HumanOutput::new("Password updated");
    emit_success(ctx.output, "set-password", &user, Some(&human))
}

pub async fn run_whoami(ctx: &Context) -> Result<()> {
    let anonymous = ctx.backend()?;
    let session = ctx.session(&anonymous).await?;
    let backend = anonymous.with_session(Some(&session));
    let user = backend.current_user(&session).await?;
    let role = resolve_role(
        backend.lookup_role(&user.id).await,
        user.email.as_deref(),
        &ctx.config.roles,
    );

    #[derive(Serialize)]
    struct Whoami<'a> {
        user: &'a User,
        role: Role,
    }
    let mut human = HumanOutput::new(user.email.clone().unwrap_or_else(|| user.id.clone()));
    human.push_summary("id", user.id.clone());
    human.push_summary("role", role.as_str());
    emit_success(ctx.output, "whoami", &Whoami { user: &user, role }, Some(&human))
}

fn report_session(ctx: &Context, command: &str, session: &Session) -> Result<()> {
    let label = session.email().unwrap_or(&session.user.id);
    let mut human = HumanOutput::new(format!("Signed in as {label}"));
    human.push_next_step("joblink tasks");
    emit_success(
        ctx.output,
        command,
        &SignedIn {
            user: &session.user,
            expires_at: session.expires_at,
        },
        Some(&human),
    )
}
