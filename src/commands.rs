//! CLI commands
//!
//! Each command works against one [`Bookworm`] context and prints a short
//! human-readable result.

use std::path::Path;

use anyhow::{Context, Result};

use crate::api::{AvatarUpload, UserProfile};
use crate::auth::RouteGuardDecision;
use crate::security::redact;
use crate::Bookworm;

/// Signs in with e-mail and password
pub async fn login(app: &Bookworm, email: &str, password: &str) -> Result<()> {
    app.login(email, password)
        .await
        .with_context(|| format!("login as {} failed", redact::email(email)))?;
    println!("Signed in as {}", display_name(app.session().profile().as_ref()));
    Ok(())
}

/// Creates an account; does not sign in
pub async fn register(app: &Bookworm, email: &str, username: &str, password: &str) -> Result<()> {
    app.api()
        .register(email, username, password)
        .await
        .context("registration failed")?;
    println!("Account created for {}. Sign in to continue.", username);
    Ok(())
}

/// Fetches and prints the current profile
pub async fn me(app: &Bookworm) -> Result<()> {
    let profile = app
        .session()
        .fetch_user_data(app.api())
        .await
        .context("could not load profile")?;

    match profile {
        Some(profile) => print_profile(&profile),
        None => println!("Not signed in"),
    }
    Ok(())
}

/// Prints the locally known session state without touching the network
pub fn status(app: &Bookworm) -> Result<()> {
    let session = app.session();
    if !session.is_logged_in() {
        println!("Not signed in");
        return Ok(());
    }
    println!("Signed in ({})", session.store().name());
    println!("  user:     {}", display_name(session.profile().as_ref()));
    println!("  initials: {}", session.user_initials());
    println!("  admin:    {}", session.is_admin());
    Ok(())
}

pub fn logout(app: &Bookworm) -> Result<()> {
    app.logout();
    println!("Signed out");
    Ok(())
}

/// Uploads a new avatar image
pub async fn avatar(app: &Bookworm, file: &Path) -> Result<()> {
    let upload = AvatarUpload::from_path(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let profile = app
        .session()
        .update_avatar(app.api(), upload)
        .await
        .context("avatar upload failed")?;
    println!(
        "Avatar updated: {}",
        profile.avatar_url.as_deref().unwrap_or("(none)")
    );
    Ok(())
}

pub async fn delete_account(app: &Bookworm) -> Result<()> {
    app.session()
        .delete_account(app.api())
        .await
        .context("account deletion failed")?;
    println!("Account deleted");
    Ok(())
}

/// Runs the navigation guard for a path and prints the decision
pub async fn navigate(app: &Bookworm, path: &str) -> Result<()> {
    let (decision, location) = app.navigate(path).await;
    match decision {
        RouteGuardDecision::Allow => println!("allow {}", location),
        RouteGuardDecision::DenyToLogin { .. } => println!("deny -> {}", location),
        RouteGuardDecision::RedirectHome => println!("redirect -> {}", location),
    }
    Ok(())
}

fn display_name(profile: Option<&UserProfile>) -> String {
    match profile {
        Some(p) if !p.username.is_empty() => p.username.clone(),
        Some(p) => redact::email(&p.email),
        None => "(profile not loaded)".to_string(),
    }
}

fn print_profile(profile: &UserProfile) {
    println!("{} <{}>", profile.username, profile.email);
    println!("  initials: {}", profile.initials());
    println!("  premium:  {}", profile.is_premium);
    if let Some(until) = profile.premium_expiration_date {
        println!("  until:    {}", until.format("%Y-%m-%d"));
    }
    if let Some(stats) = &profile.stats {
        println!(
            "  books:    {} read, {} reading, {} planned, {} dropped",
            stats.read_count, stats.reading_count, stats.planning_count, stats.dropped_count
        );
    }
    if profile.is_admin() {
        println!("  role:     admin");
    }
}
