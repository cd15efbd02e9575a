//! # Routing Probe
//!
//! Purpose: Check that every requested logical database is reachable through
//! the router, exercising configuration, index resolution, pooling and
//! release end to end.
//!
//! Usage: `dbr-probe [config.json] [db ...]`
//!
//! With no databases given, database 0 is probed. Set `RUST_LOG=debug` to
//! see pool creation and release events.

use std::env;
use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use dbr_client::{Commands, Dispatcher, RouteError, RouterConfig};
use dbr_common::{CallContext, IndexDescriptor};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1).peekable();
    let config = if args.peek().is_some_and(|arg| arg.ends_with(".json")) {
        let path = args.next().unwrap_or_default();
        let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
        RouterConfig::from_json_str(&text).with_context(|| format!("parsing {}", path))?
    } else {
        RouterConfig::default()
    };

    let databases: Vec<i64> = args
        .map(|arg| arg.parse::<i64>().with_context(|| format!("invalid database index: {}", arg)))
        .collect::<Result<_>>()?;
    let databases = if databases.is_empty() { vec![0] } else { databases };

    let dispatcher = Dispatcher::from_config(&config).context("building dispatcher")?;
    let descriptor = IndexDescriptor::param("db");

    let mut failures = 0usize;
    for db in databases {
        let call = CallContext::new().with_operation(descriptor.clone()).arg("db", db);
        let started = Instant::now();
        let outcome = dispatcher.execute(&call, |conn| {
            let index = conn.index();
            let reply = conn.ping().map_err(RouteError::from)?;
            Ok::<_, RouteError>((index, reply))
        });

        match outcome {
            Ok((index, reply)) => println!(
                "db {:>3} -> index {:>2}: {} ({:?})",
                db,
                index,
                String::from_utf8_lossy(&reply),
                started.elapsed()
            ),
            Err(err) => {
                failures += 1;
                println!("db {:>3}: {}", db, err);
            }
        }
    }

    for index in dispatcher.registry().indices() {
        if let Ok(pool) = dispatcher.registry().get_or_create(index) {
            tracing::info!(index = index.get(), status = ?pool.status(), stats = ?pool.stats(), "pool");
        }
    }

    if failures > 0 {
        anyhow::bail!("{} database(s) unreachable", failures);
    }
    Ok(())
}
