//! Authentication command handlers.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

use onecta_api::{AppAuth, AuthProvider, PortalAuth, TokenSet};
use onecta_core::{AuthHandle, AuthMode, AuthSettings, Controller, RateLimitStatus};

use crate::cli::{AuthUrlArgs, ExchangeArgs, GlobalOpts, LoginArgs};
use crate::error::CliError;
use crate::output;

fn portal<'a>(controller: &'a Controller, operation: &str) -> Result<&'a PortalAuth, CliError> {
    controller
        .auth()
        .as_portal()
        .ok_or_else(|| CliError::Unsupported {
            operation: operation.into(),
            required: AuthMode::Portal.to_string(),
        })
}

fn app<'a>(controller: &'a Controller, operation: &str) -> Result<&'a AppAuth, CliError> {
    controller
        .auth()
        .as_app()
        .ok_or_else(|| CliError::Unsupported {
            operation: operation.into(),
            required: AuthMode::App.to_string(),
        })
}

#[derive(Serialize)]
struct LoginReport {
    mode: AuthMode,
    expires_at: Option<DateTime<Utc>>,
}

fn print_login(tokens: &TokenSet, mode: AuthMode, global: &GlobalOpts) -> Result<(), CliError> {
    let report = LoginReport {
        mode,
        expires_at: tokens.expires_at,
    };
    let out = output::render_single(global.output, &report, |r| match r.expires_at {
        Some(at) => format!("Logged in ({}), token valid until {at}", r.mode),
        None => format!("Logged in ({})", r.mode),
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Portal flow ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct AuthUrlReport {
    url: String,
    state: String,
}

pub fn auth_url(
    controller: &Controller,
    args: &AuthUrlArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let request = portal(controller, "auth-url")?.build_auth_url(args.state.as_deref());
    let report = AuthUrlReport {
        url: request.url.to_string(),
        state: request.state,
    };
    let out = output::render_single(global.output, &report, |r| r.url.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn exchange(
    controller: &Controller,
    args: &ExchangeArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let tokens = portal(controller, "exchange")?
        .exchange_code(&args.code)
        .await?;
    print_login(&tokens, AuthMode::Portal, global)
}

// ── App flow ─────────────────────────────────────────────────────────

pub async fn login(
    controller: &Controller,
    args: LoginArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let auth = app(controller, "login")?;

    let (profile_email, profile_password) = match controller.config().auth {
        AuthSettings::App {
            ref email,
            ref password,
            ..
        } => (email.clone(), password.clone()),
        AuthSettings::Portal(_) => (None, None),
    };

    let email = args
        .email
        .or(profile_email)
        .ok_or_else(|| CliError::Validation {
            field: "email".into(),
            reason: "pass --email or set `email` in the profile".into(),
        })?;

    let password = match profile_password {
        Some(password) => password,
        None => SecretString::from(rpassword::prompt_password(format!(
            "Password for {email}: "
        ))?),
    };

    let tokens = auth.authenticate(&email, &password).await?;
    print_login(&tokens, AuthMode::App, global)
}

// ── Shared ───────────────────────────────────────────────────────────

pub async fn logout(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    match controller.auth() {
        AuthHandle::Portal(auth) => auth.revoke().await?,
        AuthHandle::App(_) => controller.provider().clear_credentials().await?,
    }
    output::print_output("Logged out", global.quiet);
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    mode: AuthMode,
    authenticated: bool,
    expires_at: Option<DateTime<Utc>>,
    token_file: String,
    rate_limit: RateLimitStatus,
}

fn quota(remaining: Option<u32>, limit: Option<u32>) -> String {
    match (remaining, limit) {
        (Some(r), Some(l)) => format!("{r}/{l}"),
        (Some(r), None) => r.to_string(),
        _ => "unknown".into(),
    }
}

pub async fn status(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    let authenticated = controller.is_authenticated().await;

    // A cheap listing populates the rate-limit headers.
    if authenticated {
        if let Err(e) = controller.devices().await {
            tracing::warn!(error = %e, "could not query the API");
        }
    }

    let report = StatusReport {
        mode: controller.auth().mode(),
        authenticated,
        expires_at: controller.token_expiration().await,
        token_file: controller.config().token_path.display().to_string(),
        rate_limit: controller.rate_limit_status(),
    };

    let out = output::render_single(global.output, &report, |r| {
        let expires = r
            .expires_at
            .map_or_else(|| "unknown".to_owned(), |at| at.to_rfc3339());
        format!(
            "Mode:          {}\n\
             Authenticated: {}\n\
             Expires:       {expires}\n\
             Token file:    {}\n\
             Quota/minute:  {}\n\
             Quota/day:     {}",
            r.mode,
            if r.authenticated { "yes" } else { "no" },
            r.token_file,
            quota(r.rate_limit.remaining_minute, r.rate_limit.limit_minute),
            quota(r.rate_limit.remaining_day, r.rate_limit.limit_day),
        )
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
