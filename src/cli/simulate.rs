//! `zeptocache simulate` — burst traffic against a synthetic slow upstream.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::info;

use zeptocache::{
    fingerprint_with, spawn_reloader, spawn_sweeper, CacheConfig, CacheError, CacheOrchestrator,
    ConfigWatcher, DisposerRegistry, OrchestratorStats, Priority,
};

use super::config::load_config;
use super::SimulateArgs;

const PROMPTS: &[&str] = &[
    "Ce este un qubit?",
    "Explică superpoziția cuantică",
    "Cum funcționează algoritmul lui Grover?",
    "Ce este entanglement-ul?",
    "Care este diferența dintre un bit și un qubit?",
];

const SESSION_TAG: &str = "session:simulate";

/// Outcome of one wave.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct WaveReport {
    pub ok: usize,
    pub failed: usize,
}

/// Prompt used for request `index` when spreading over `keys` prompts.
pub(crate) fn prompt_for(index: usize, keys: usize) -> (usize, String) {
    let slot = index % keys.max(1);
    let base = PROMPTS[slot % PROMPTS.len()];
    // Beyond the canned list, suffix the slot so keys stay distinct.
    let text = if slot < PROMPTS.len() {
        base.to_string()
    } else {
        format!("{base} #{slot}")
    };
    (slot, text)
}

/// Fire `args.requests` concurrent requests and wait for all of them.
pub(crate) async fn run_wave(
    cache: &CacheOrchestrator<String>,
    args: &SimulateArgs,
    upstream_calls: &Arc<AtomicUsize>,
) -> WaveReport {
    let latency = Duration::from_millis(args.latency_ms);
    let requests = (0..args.requests).map(|i| {
        let (slot, text) = prompt_for(i, args.keys);
        let key = fingerprint_with(&text, [("lang", "ro")]);
        let calls = Arc::clone(upstream_calls);
        let fail = args.fail_every > 0 && (slot + 1) % args.fail_every == 0;
        let priority = if slot == 0 {
            Priority::High
        } else {
            Priority::Medium
        };
        async move {
            cache
                .request(
                    &key,
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(latency).await;
                        if fail {
                            Err(CacheError::Upstream(format!("provider rejected '{text}'")))
                        } else {
                            Ok(format!("Răspuns simulat pentru: {text}"))
                        }
                    },
                    cache.default_ttl(),
                    ["faq", SESSION_TAG],
                    priority,
                )
                .await
        }
    });

    let mut report = WaveReport::default();
    for result in join_all(requests).await {
        match result {
            Ok(_) => report.ok += 1,
            Err(_) => report.failed += 1,
        }
    }
    report
}

fn print_stats(stats: &OrchestratorStats, upstream_calls: usize) {
    println!();
    println!("{:<22} {:>10}", "Metric", "Value");
    println!("{}", "-".repeat(33));
    println!("{:<22} {:>10}", "entries", stats.store.entries);
    println!("{:<22} {:>10}", "hits", stats.store.hits);
    println!("{:<22} {:>10}", "misses", stats.store.misses);
    println!("{:<22} {:>9.1}%", "hit rate", stats.hit_rate() * 100.0);
    println!("{:<22} {:>10}", "upstream calls", upstream_calls);
    println!("{:<22} {:>10}", "coalesced", stats.dedup.coalesced);
    println!("{:<22} {:>10}", "upstream failures", stats.dedup.upstream_failures);
    println!("{:<22} {:>10}", "evicted", stats.store.evicted);
    println!("{:<22} {:>10}", "expired", stats.store.expired);
    println!("{:<22} {:>10}", "invalidated", stats.store.invalidated);
}

/// Handle `zeptocache simulate`.
pub(crate) async fn cmd_simulate(config_path: Option<PathBuf>, args: SimulateArgs) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    let cache: CacheOrchestrator<String> = CacheOrchestrator::from_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(cache.clone(), config.sweep_interval(), shutdown_rx.clone());
    let reloader = spawn_reloader(
        cache.clone(),
        ConfigWatcher::new(
            config_path.unwrap_or_else(CacheConfig::path),
            Duration::from_secs(1),
        ),
        shutdown_rx,
    );

    let registry = DisposerRegistry::new();
    let session = registry.new_handle();
    {
        let cache = cache.clone();
        registry.register(session, move || {
            let removed = cache.invalidate_tag(SESSION_TAG);
            info!(removed, "Simulated session disposed");
        });
    }

    let upstream_calls = Arc::new(AtomicUsize::new(0));
    for wave in 1..=args.waves {
        let started = Instant::now();
        let report = run_wave(&cache, &args, &upstream_calls).await;
        println!(
            "wave {wave}: {} ok, {} failed in {}ms",
            report.ok,
            report.failed,
            started.elapsed().as_millis()
        );
    }

    let stats = cache.stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats, upstream_calls.load(Ordering::SeqCst));
    }

    registry.dispose(session);
    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    let _ = reloader.await;
    Ok(())
}
