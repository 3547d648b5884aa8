use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::db::repositories::definition::{DefinitionRepository, content_hash};
use crate::db::NewDefinition;

pub const SEED_AUTHOR: &str = "seed";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedStats {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// `(directory, kind)` pairs scanned under the seed root.
#[must_use]
pub fn seed_sources<'a>(agent_dir: &'a str, workflow_dir: &'a str) -> [(&'a str, &'static str); 2] {
    [(agent_dir, "Prompt"), (workflow_dir, "Workflow")]
}

fn yaml_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"))
        })
        .collect();
    files.sort();
    files
}

async fn seed_file(
    repo: &DefinitionRepository,
    path: &Path,
    kind: &str,
) -> anyhow::Result<bool> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("Seed file name is not valid UTF-8")?
        .to_string();

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let hash = content_hash(&content);

    if let Some(latest) = repo.latest_by_name(&name).await?
        && latest.content_hash.as_deref() == Some(hash.as_str())
    {
        return Ok(false);
    }

    repo.create(NewDefinition {
        name,
        kind: kind.to_string(),
        version: 0,
        content_yaml: content,
        created_by: SEED_AUTHOR.to_string(),
        content_hash: Some(hash),
    })
    .await
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    Ok(true)
}

/// Imports sample definitions found directly inside each source directory.
/// Unchanged files are skipped; failures are logged and counted.
pub async fn seed_definitions(
    repo: &DefinitionRepository,
    root: &Path,
    sources: &[(&str, &str)],
) -> SeedStats {
    let mut stats = SeedStats::default();

    for (dir, kind) in sources {
        let dir = root.join(dir);
        if !dir.is_dir() {
            continue;
        }

        for path in yaml_files(&dir) {
            match seed_file(repo, &path, kind).await {
                Ok(true) => {
                    info!(file = %path.display(), kind, "Seeded definition");
                    stats.created += 1;
                }
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Failed to seed definition");
                    stats.failed += 1;
                }
            }
        }
    }

    stats
}
