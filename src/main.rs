use std::{path::Path, sync::Arc};

use anyhow::Context;
use chapter_reader::{
    ReaderResult,
    config::Config,
    content_client::HttpSource,
    reader::{ProgressTracker, ReaderLibrary, TieredRepository},
    reader_api::ReaderApi,
    storage::{DiskCache, SeaOrmProgressStore},
};
use migration::MigratorTrait;
use poem::{
    EndpointExt, Route, Server,
    listener::TcpListener,
    middleware::{Cors, Tracing as PoemTracing},
};
use poem_openapi::OpenApiService;
use sea_orm::Database;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder, prelude::*};

#[tokio::main]
async fn main() -> ReaderResult<()> {
    // Respect RUST_LOG if set, default to info for our crate and warn for deps.
    let default_filter = format!(
        "{}=info,poem=info,reqwest=warn,h2=warn,sqlx=warn",
        env!("CARGO_PKG_NAME")
    );
    let env_filter = std::env::var("RUST_LOG").unwrap_or(default_filter);
    SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_level(true)
        .pretty()
        .finish()
        .with(ErrorLayer::default())
        .init();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chapter reader");

    if Path::new(".env.local").exists() {
        dotenvy::from_filename(".env.local")?;
    } else if Path::new(".env").exists() {
        dotenvy::from_filename(".env")?;
    };
    let config = Config::load()?;
    config.validate()?;

    let db_conn = Database::connect(&config.db_connection_string)
        .await
        .with_context(|| "Failed to connect to database")?;
    migration::Migrator::up(&db_conn, None)
        .await
        .with_context(|| "Failed to run database migrations")?;

    let source = HttpSource::new(&config.content_base_url)?.with_api_key(&config.content_api_key);
    let has_api_key = !config.content_api_key.is_empty();
    tracing::info!(content_base = %config.content_base_url, has_api_key, "configured content source");

    let disk = DiskCache::new(&config.cache_dir);
    tracing::info!(cache_dir = %disk.root().display(), strategy = ?config.fetch_strategy, "using disk cache");
    let repository = TieredRepository::new(Arc::new(source), disk, config.chapter_list_max_age());
    let progress = ProgressTracker::new(Arc::new(SeaOrmProgressStore::new(Arc::new(db_conn))));
    let library = ReaderLibrary::new(
        Arc::new(repository),
        Arc::new(progress),
        config.session_cache_capacity,
    )
    .with_strategy(config.fetch_strategy);

    run_poem(Arc::new(library), &config.bind_addr).await
}

pub async fn run_poem(library: Arc<ReaderLibrary>, bind_addr: &str) -> ReaderResult<()> {
    let version = env!("CARGO_PKG_VERSION");
    let api = ReaderApi { library };
    let api_service = OpenApiService::new(api, "Chapter Reader API", version)
        .server(format!("http://{}", bind_addr));
    let ui = api_service.rapidoc();
    let spec = api_service.spec();
    let route = Route::new()
        .nest("/", api_service)
        .nest("/ui", ui)
        .nest("/spec", poem::endpoint::make_sync(move |_| spec.clone()))
        .with(Cors::new())
        .with(PoemTracing);

    tracing::info!(%bind_addr, "starting HTTP server");
    Server::new(TcpListener::bind(bind_addr)).run(route).await?;
    Ok(())
}
