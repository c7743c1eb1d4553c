//! Slice Streamer - exercise the async slicer against a synthetic volume.
//!
//! The `scrub` command emulates a user dragging the z slider back and forth
//! over a slow data source and reports what the slicer did with the flood of
//! requests.

use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slice_streamer::{
    ArrayData, ArraySource, CacheStats, Cli, Command, DataSource, OutputFormat, ScrubConfig,
    SliceEngine, SliceEvent, SliceIndex, SlicerStats, SourceKind, Throttled,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Scrub(config) => run_scrub(config).await,
    }
}

// =============================================================================
// Scrub Command
// =============================================================================

#[derive(Debug, Serialize)]
struct Summary {
    shape: Vec<usize>,
    levels: usize,
    steps: usize,
    elapsed_ms: u128,
    ready_events: usize,
    cache_hit_events: usize,
    failed_events: usize,
    final_version: Option<u64>,
    final_slice_matches: bool,
    slicer: SlicerStats,
    cache: CacheStats,
}

async fn run_scrub(config: ScrubConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let slicer_config = match config.slicer_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shape = vec![config.depth, config.size, config.size];
    let source = match build_source(&config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to build volume: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!("  Volume: {:?} u16, {} level(s)", shape, config.levels);
    info!("  Latency: {}ms per slice", config.latency_ms);
    info!("  Workers: {}", slicer_config.workers);
    info!("  Cache: {:?}", slicer_config.cache);

    let mut engine = match SliceEngine::new(slicer_config) {
        Ok(e) => e,
        Err(e) => {
            error!("Failed to create engine: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut events = engine.subscribe();

    let started = Instant::now();
    if let Err(e) = engine.add_layer(source.clone()).await {
        error!("Failed to add layer: {}", e);
        return ExitCode::FAILURE;
    }

    let interval = Duration::from_millis(config.interval_ms);
    let mut steps = 0;
    let mut final_z = 0;
    for _ in 0..config.passes {
        let forward = 0..config.depth;
        let backward = (0..config.depth).rev();
        for z in forward.chain(backward) {
            if let Err(e) = engine.set_point(0, z).await {
                error!("Failed to move slider: {}", e);
                return ExitCode::FAILURE;
            }
            engine.poll_ready().await;
            steps += 1;
            final_z = z;
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }
    }
    engine.run_until_idle().await;
    let elapsed = started.elapsed();

    let mut ready_events = 0;
    let mut cache_hit_events = 0;
    let mut failed_events = 0;
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        match event {
            SliceEvent::Ready(response) => {
                ready_events += 1;
                if response.cache_hit {
                    cache_hit_events += 1;
                }
                last = Some(response);
            }
            SliceEvent::Failed(_) => failed_events += 1,
        }
    }

    let expected = source
        .slice(&SliceIndex::new(0, vec![final_z], vec![1, 2]))
        .await
        .ok();
    let final_slice_matches = matches!((&last, &expected), (Some(r), Some(e)) if &r.data == e);

    let summary = Summary {
        shape,
        levels: config.levels,
        steps,
        elapsed_ms: elapsed.as_millis(),
        ready_events,
        cache_hit_events,
        failed_events,
        final_version: last.as_ref().map(|r| r.version),
        final_slice_matches,
        slicer: engine.stats(),
        cache: engine.cache_stats().await,
    };

    match config.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize summary: {}", e);
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Text => print_summary(&summary),
    }

    if summary.final_slice_matches {
        ExitCode::SUCCESS
    } else {
        error!("Final slice does not match z={}", final_z);
        ExitCode::FAILURE
    }
}

/// Synthetic (z, y, x) volume behind the configured latency.
fn build_source(config: &ScrubConfig) -> Result<Arc<dyn DataSource>, String> {
    let size = config.size;
    let base = ArrayData::from_fn(vec![config.depth, size, size], |idx| {
        ((idx[0] * 257 + idx[1] * 3 + idx[2]) % 65_536) as u16
    });
    let pyramid = ArraySource::pyramid(SourceKind::Image, base, config.levels).map_err(|e| e.to_string())?;
    Ok(Arc::new(Throttled::new(
        pyramid,
        Duration::from_millis(config.latency_ms),
    )))
}

fn print_summary(summary: &Summary) {
    let stats = &summary.slicer;
    println!("Slice Streamer Scrub");
    println!("════════════════════");
    println!();
    println!("Volume:        {:?}, {} level(s)", summary.shape, summary.levels);
    println!("Slider steps:  {}", summary.steps);
    println!("Elapsed:       {} ms", summary.elapsed_ms);
    println!();
    println!("Requests:      {}", stats.requests);
    println!("  coalesced:   {}", stats.coalesced);
    println!("  cache hits:  {}", stats.cache_hits);
    println!("  dispatched:  {}", stats.dispatched);
    println!("Completions:");
    println!("  accepted:    {}", stats.accepted);
    println!("  stale:       {}", stats.stale_discarded);
    println!("  skipped:     {}", stats.skipped);
    println!("  failed:      {}", stats.failures);
    println!("Cancel hooks:  {}", stats.cancel_hooks);
    println!();
    println!(
        "Events:        {} ready ({} from cache), {} failed",
        summary.ready_events, summary.cache_hit_events, summary.failed_events
    );
    println!(
        "Cache:         {} entries, {} bytes, {} evictions",
        summary.cache.entries, summary.cache.bytes, summary.cache.evictions
    );
    match summary.final_version {
        Some(version) if summary.final_slice_matches => {
            println!("Final slice:   version {} ✓", version)
        }
        Some(version) => println!("Final slice:   version {} ✗ mismatch", version),
        None => println!("Final slice:   none ✗"),
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "slice_streamer=debug"
    } else {
        "slice_streamer=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
