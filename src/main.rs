use anyhow::Result;
use ratings_roster::config::Config;
use ratings_roster::realtime::{FeedEvent, LiveFeed};
use ratings_roster::{RosterService, render, store};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn next_event(feed: &mut Option<LiveFeed>) -> Option<FeedEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let tz = render::local_timezone();

    let mut roster = RosterService::new(store::create_store(&config), config.limit);

    let mut updates = roster.watch();
    let printer = tokio::spawn(async move {
        println!("{}", render::render(&updates.borrow_and_update(), tz));
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            println!("{}", render::render(&snapshot, tz));
        }
    });

    let mut feed = None;
    if roster.is_configured() {
        // Subscribe first: pushes that land during the bulk load wait in the
        // queue and are merged on top of it.
        if let Some(credentials) = config.credentials()
            && config.realtime_enabled
        {
            match LiveFeed::connect(&credentials, &config).await {
                Ok(live) => feed = Some(live),
                Err(e) => roster.on_feed_closed(&e.to_string()),
            }
        }

        // Failures are already surfaced through the snapshot.
        let _ = roster.load_initial().await;
    } else {
        warn!("Running without a feedback store");
    }

    loop {
        tokio::select! {
            event = next_event(&mut feed) => match event {
                Some(event) => {
                    let closed = matches!(event, FeedEvent::Closed(_));
                    roster.apply_feed_event(event);
                    if closed && let Some(live) = feed.take() {
                        live.close().await;
                    }
                }
                None => {
                    roster.on_feed_closed("event queue closed");
                    feed = None;
                }
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    info!("Shutdown signal received, closing live feed...");

    if let Some(live) = feed.take() {
        live.close().await;
    }

    drop(roster);
    if let Err(e) = printer.await {
        warn!("Snapshot printer failed: {}", e);
    }
    info!("Shutdown complete");

    Ok(())
}
