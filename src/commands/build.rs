use folio::config::{Config, base_path_from_config};
use folio::docs::DocsRunner;
use folio::engine::{BuildReport, Cache, Waiter};

use crate::BuildArgs;

pub async fn run(args: &BuildArgs) -> Result<(), anyhow::Error> {
    let config_path = Config::path_from_arg(args.config_file.as_deref())?;
    let config = Config::load_from_file(&config_path)?;

    // Relative paths in the config are relative to the config file
    let base_path = base_path_from_config(&config_path);

    let (runner, project) = DocsRunner::load(&config, &base_path)?;
    let output_dir = runner.output_dir().to_path_buf();

    let cache = if args.no_cache || !config.cache.enabled {
        Cache::disabled()
    } else {
        Cache::open(base_path.join(&config.cache.dir)).await?
    };

    tracing::info!(
        volumes = project.collections().len(),
        pages = project.page_count(),
        target = %args.target,
        "building project"
    );

    let waiter = Waiter::new(runner, project, cache);
    if let Err(error) = waiter.ensure_project(args.target).await {
        tracing::debug!(%error, "build incomplete");
    }

    let report = BuildReport::collect(&waiter, args.target);
    println!("{report}");

    if !report.is_success() {
        return Err(anyhow::anyhow!(
            "build failed: {} of {} page(s) did not reach {}",
            report.page_count() - report.completed.len(),
            report.page_count(),
            args.target
        ));
    }

    println!(
        "Built {} page(s) to {}",
        report.completed.len(),
        output_dir.display()
    );

    Ok(())
}
