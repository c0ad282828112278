use folio::config::{CONFIG_FILE, Config};
use folio::util::title_case;

use crate::InitArgs;

const SAMPLE_PAGE: &str = "---
title: Welcome
---

# Welcome

This volume was created by `folio init`. Add Markdown files next to this
one and link between them with relative links, like [this page](index.md).
";

pub async fn run(args: &InitArgs) -> Result<(), anyhow::Error> {
    let path = if args.path.is_relative() {
        std::env::current_dir()?.join(&args.path)
    } else {
        args.path.clone()
    };

    if !path.exists() {
        if args.create {
            tokio::fs::create_dir_all(&path).await?;
            println!("Created directory {path}", path = path.display());
        } else {
            return Err(anyhow::anyhow!(
                "Directory does not exist: {path}",
                path = path.display()
            ));
        }
    }

    let config_file = path.join(CONFIG_FILE);
    if config_file.exists() {
        return Err(anyhow::anyhow!(
            "Config file already exists: {config_file}",
            config_file = config_file.display()
        ));
    }

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(title_case)
        .unwrap_or_else(|| "My Docs".to_string());
    let default_config = Config::starter(name);

    println!("Initializing project in {}", path.display());

    let config_text = serde_yaml::to_string(&default_config)?;
    tokio::fs::write(&config_file, config_text).await?;
    println!(
        "Created config file {config_file}",
        config_file = config_file.display()
    );

    for volume in &default_config.volumes {
        let volume_dir = path.join(&volume.path);
        tokio::fs::create_dir_all(&volume_dir).await?;
        let page = volume_dir.join("index.md");
        if !page.exists() {
            tokio::fs::write(&page, SAMPLE_PAGE).await?;
            println!("Created page {page}", page = page.display());
        }
    }

    Ok(())
}
