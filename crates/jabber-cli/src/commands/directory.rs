use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

use jabber_core::{Config, Directory};

use crate::cli::DirectoryCommands;

/// Execute a directory subcommand against the file at `path`
pub async fn execute(subcommand: DirectoryCommands, path: &Path, config: &Config) -> Result<()> {
    let directory = Directory::new(path);
    directory
        .load()
        .await
        .with_context(|| format!("failed to load address book {}", path.display()))?;

    match subcommand {
        DirectoryCommands::List => list(&directory).await,
        DirectoryCommands::Add { alias, jid } => add(&directory, &alias, &jid).await,
        DirectoryCommands::Remove { alias } => remove(&directory, &alias).await,
        DirectoryCommands::Query { term } => query(&directory, &term, config).await,
    }
}

async fn list(directory: &Directory) -> Result<()> {
    let entries = directory.list_all().await;
    if entries.is_empty() {
        println!("Address book is empty.");
        println!("Use 'jabber-mcp directory add <alias> <jid>' to add a contact.");
        return Ok(());
    }

    println!("{} contacts:", entries.len());
    for (alias, address) in &entries {
        println!("  {} -> {}", alias, address);
    }
    Ok(())
}

async fn add(directory: &Directory, alias: &str, jid: &str) -> Result<()> {
    info!("Adding alias {}", alias);
    let changed = directory.save_alias(alias, jid).await?;
    if !changed {
        println!("Alias '{}' already points to {}.", alias, jid);
        return Ok(());
    }
    directory.save().await?;
    println!("Saved {} -> {}", alias, jid);
    Ok(())
}

async fn remove(directory: &Directory, alias: &str) -> Result<()> {
    info!("Removing alias {}", alias);
    if !directory.remove_alias(alias).await {
        bail!("Alias '{}' not found.", alias);
    }
    directory.save().await?;
    println!("Removed '{}'.", alias);
    Ok(())
}

async fn query(directory: &Directory, term: &str, config: &Config) -> Result<()> {
    let matches = directory.search(term, &config.directory).await;

    if matches.is_empty() {
        println!("No matches for '{}'.", term);
        return Ok(());
    }
    for m in &matches {
        println!("  {}", m);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_add_and_remove_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.json");
        let config = Config::default();

        execute(
            DirectoryCommands::Add {
                alias: "alice".into(),
                jid: "Alice@X.com".into(),
            },
            &path,
            &config,
        )
        .await
        .unwrap();

        let reloaded = Directory::new(&path);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get_exact("alice").await.as_deref(), Some("alice@x.com"));

        execute(DirectoryCommands::Remove { alias: "alice".into() }, &path, &config)
            .await
            .unwrap();
        let reloaded = Directory::new(&path);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_missing_fails() {
        let dir = TempDir::new().unwrap();
        let result = execute(
            DirectoryCommands::Remove { alias: "ghost".into() },
            &dir.path().join("book.json"),
            &Config::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_alias() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.json");
        let result = execute(
            DirectoryCommands::Add {
                alias: "no spaces".into(),
                jid: "a@x.com".into(),
            },
            &path,
            &Config::default(),
        )
        .await;
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_list_and_query_read_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.json");
        let config = Config::default();
        execute(DirectoryCommands::List, &path, &config).await.unwrap();
        execute(DirectoryCommands::Query { term: "x".into() }, &path, &config)
            .await
            .unwrap();
        assert!(!path.exists());
    }
}
