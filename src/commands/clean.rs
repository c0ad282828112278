use std::path::Path;

use folio::config::{Config, base_path_from_config};

use crate::CleanArgs;

pub async fn run(args: &CleanArgs) -> Result<(), anyhow::Error> {
    let config_path = Config::path_from_arg(args.config_file.as_deref())?;
    let config = Config::load_from_file(&config_path)?;

    // Get the base path for resolving relative paths
    let base_path = base_path_from_config(&config_path);

    // Delete the rendered pages, then the artifact cache
    remove(&base_path.join(&config.project.output), args.dry_run).await?;
    remove(&base_path.join(&config.cache.dir), args.dry_run).await?;

    Ok(())
}

async fn remove(path: &Path, dry_run: bool) -> Result<(), anyhow::Error> {
    if !path.exists() {
        return Ok(());
    }

    if dry_run {
        println!("Would delete {}", path.display());
    } else {
        tokio::fs::remove_dir_all(path).await?;
        println!("Deleted {}", path.display());
    }

    Ok(())
}
