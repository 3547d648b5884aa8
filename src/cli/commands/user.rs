//! User account command handlers

use crate::config::Config;
use crate::db::Store;

pub async fn cmd_user_add(
    config: &Config,
    username: &str,
    password: &str,
    name: Option<&str>,
    roles: &[String],
) -> anyhow::Result<()> {
    let username = username.trim();
    if username.is_empty() {
        anyhow::bail!("Username is required");
    }
    if password.len() < config.auth.min_password_length {
        anyhow::bail!(
            "Password must be at least {} characters",
            config.auth.min_password_length
        );
    }

    let store = Store::new(&config.general.database_path).await?;
    let repo = store.user_repo();
    if repo.exists(username).await? {
        anyhow::bail!("User '{username}' already exists");
    }

    let roles: Vec<String> = roles
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    let user = repo.create(username, password, name, &roles).await?;

    println!("✓ Created user {} ({})", user.username, user.id);
    if !user.roles.is_empty() {
        println!("  Roles: {}", user.roles.join(", "));
    }

    Ok(())
}

pub async fn cmd_user_list(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let users = store.user_repo().list().await?;

    if users.is_empty() {
        println!("No users yet.");
        println!();
        println!("Add one with: netgpt user add <username> <password> --roles admin");
        return Ok(());
    }

    println!("Users ({} total)", users.len());
    println!("{:-<70}", "");

    for user in users {
        let roles = if user.roles.is_empty() {
            "-".to_string()
        } else {
            user.roles.join(",")
        };
        println!("• {} [{}]", user.display_name(), roles);
        println!("  ID: {} | Username: {} | Created: {}", user.id, user.username, user.created_at);
    }

    Ok(())
}
