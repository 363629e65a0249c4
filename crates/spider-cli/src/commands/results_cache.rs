//! `spider create-results-cache-indices`

use anyhow::Result;
use tracing::info;

use crate::cli::ResultsCacheArgs;

pub async fn run(args: ResultsCacheArgs) -> Result<()> {
    create(&args).await
}

#[cfg(feature = "results-cache")]
async fn create(args: &ResultsCacheArgs) -> Result<()> {
    use spider_core::bootstrap::ensure_indexes;

    let cache = crate::backends::mongo::MongoResultsCache::connect(&args.uri).await?;
    let created = ensure_indexes(&cache, &args.stream_collection).await?;
    info!(
        collection = %args.stream_collection,
        created = created.len(),
        "results cache indexes in place"
    );
    for name in created {
        println!("{name}");
    }
    Ok(())
}

#[cfg(not(feature = "results-cache"))]
async fn create(args: &ResultsCacheArgs) -> Result<()> {
    info!(collection = %args.stream_collection, "results cache support not compiled in");
    anyhow::bail!("built without the `results-cache` feature")
}
