use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgcache::domain::{CompletionSink, DecodeBudget, LoadRequest, TargetId};
use imgcache::infrastructure::{
    CliArgs, CompletionQueue, ConfigStorage, ImageDispatcher, ImageLoader, LoaderConfig,
    PoolSize, ThreadAffinity,
};

fn init_logging(config: &LoaderConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

/// Forwards deliveries back to the waiting task.
struct ChannelSink {
    tx: mpsc::UnboundedSender<Option<Arc<image::DynamicImage>>>,
}

impl CompletionSink for ChannelSink {
    fn deliver(&self, target: TargetId, image: Option<Arc<image::DynamicImage>>) {
        info!(target_id = %target, present = image.is_some(), "Load delivered");
        let _ = self.tx.send(image);
    }
}

async fn run(config: LoaderConfig, args: CliArgs, pool: PoolSize) -> Result<()> {
    let affinity = Arc::new(ThreadAffinity::new());
    let loader = Arc::new(ImageLoader::from_config(&config, affinity.clone()).await?);

    if loader.keys_degraded() {
        warn!("Running with weak cache keys");
    }
    if args.clear {
        loader.clear_all().await;
    }

    if args.async_mode {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = CompletionQueue::start(Arc::new(ChannelSink { tx }), &affinity)?;
        let dispatcher = ImageDispatcher::new(loader.clone(), queue.poster(), pool);

        let request =
            LoadRequest::new(args.uri.clone(), TargetId(1)).with_bounds(args.width, args.height);
        let dispatch = dispatcher.load_async(request);

        match rx.recv().await.flatten() {
            Some(image) => println!(
                "{}: {}x{} ({dispatch:?})",
                args.uri,
                image.width(),
                image.height()
            ),
            None => println!("{}: no image ({dispatch:?})", args.uri),
        }
    } else {
        let budget = DecodeBudget::new(args.width, args.height);
        match loader.load(&args.uri, budget).await? {
            Some(loaded) => println!(
                "{}: {}x{} from {} [{}]",
                args.uri,
                loaded.image.width(),
                loaded.image.height(),
                loaded.source,
                loaded.key
            ),
            None => println!("{}: no image", args.uri),
        }
    }

    println!("memory: {}", loader.memory_stats());
    let disk = loader.disk_stats();
    println!(
        "disk: {} hits, {} misses, {} commits, {} aborts",
        disk.hits, disk.misses, disk.commits, disk.aborts
    );
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let storage = ConfigStorage::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(&args);

    init_logging(&config)?;
    info!(version = imgcache::VERSION, "Starting imgcache");

    if args.save_config {
        storage.save_config(&config, args.config.as_deref())?;
    }

    let pool = config.pool.resolve();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(pool.core)
        .max_blocking_threads(pool.max)
        .thread_name("image-worker")
        .enable_all()
        .build()?;

    runtime.block_on(run(config, args, pool))
}
