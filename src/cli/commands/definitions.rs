//! Definition command handlers

use std::path::Path;

use crate::config::Config;
use crate::db::Store;
use crate::declarative::{seed_definitions, seed_sources};

const LIST_PAGE_SIZE: u64 = 100;

pub async fn cmd_definitions_seed(config: &Config, root: &str) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let sources = seed_sources(
        &config.declarative.agent_samples_dir,
        &config.declarative.workflow_samples_dir,
    );

    let stats = seed_definitions(&store.definition_repo(), Path::new(root), &sources).await;

    println!(
        "✓ Seeding finished: {} created, {} unchanged, {} failed",
        stats.created, stats.skipped, stats.failed
    );
    Ok(())
}

pub async fn cmd_definitions_list(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let repo = store.definition_repo();
    let (mut definitions, total) = repo.list_latest(1, LIST_PAGE_SIZE).await?;

    let mut page = 1;
    while (definitions.len() as u64) < total {
        page += 1;
        let (more, _) = repo.list_latest(page, LIST_PAGE_SIZE).await?;
        if more.is_empty() {
            break;
        }
        definitions.extend(more);
    }

    if definitions.is_empty() {
        println!("No definitions stored.");
        println!();
        println!("Import the samples with: netgpt definitions seed");
        return Ok(());
    }

    println!("Definitions ({total} total)");
    println!("{:-<70}", "");

    for def in definitions {
        println!("• {} v{} [{}]", def.name, def.version, def.kind);
        println!(
            "  ID: {} | By: {} | Created: {}",
            def.id, def.created_by, def.created_at
        );
    }

    Ok(())
}
