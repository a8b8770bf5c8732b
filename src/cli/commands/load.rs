//! Load command - drive the cache until a pack or item settles

use crate::cli::args::LoadArgs;
use crate::config::Config;
use crate::driver::TickDriver;
use crate::error::{DepotError, DepotResult};
use crate::loader::{FileLoader, PackLoader, Priority, RemoteLoader};
use crate::manifest::PackManifest;
use crate::registry::Registry;
use crate::telemetry::LogObserver;
use console::style;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

/// Execute the load command
pub fn execute(args: LoadArgs, config: &Config, runtime: &Runtime) -> DepotResult<()> {
    let manifest_path = args
        .manifest
        .clone()
        .unwrap_or_else(|| config.source.root.join("manifest.json"));
    let manifest = runtime.block_on(PackManifest::from_file(&manifest_path))?;

    let loader: Arc<dyn PackLoader> = if config.source.is_remote() {
        Arc::new(RemoteLoader::new(config.retry.clone()))
    } else {
        Arc::new(FileLoader::new())
    };
    debug!(strategy = loader.strategy_name(), "loader selected");

    let mut registry = Registry::new(
        manifest,
        loader,
        Arc::new(LogObserver),
        config.clone(),
        runtime.handle().clone(),
    );

    let priority = Priority::from(args.priority);
    match args.item.as_deref() {
        Some(item) => {
            let payload = if args.sync {
                registry.load_item_sync(&args.pack, item, priority)?
            } else {
                if !pump_to_completion(&mut registry, |reg, done| {
                    reg.load_item(&args.pack, item, priority, done)
                })? {
                    return Err(DepotError::ItemLoadFailed {
                        pack: args.pack.clone(),
                        item: item.to_string(),
                        reason: "item materialization failed".to_string(),
                    });
                }
                registry
                    .item_payload(&args.pack, item)
                    .ok_or_else(|| DepotError::Internal("settled item has no payload".to_string()))?
            };
            println!(
                "{} {} from {} ({} bytes)",
                style("Loaded").green().bold(),
                item,
                args.pack,
                payload.len()
            );
            if let Some(out) = &args.out {
                std::fs::write(out, &payload)
                    .map_err(|e| DepotError::io(format!("writing {}", out.display()), e))?;
                println!("Wrote {}", out.display());
            }
            registry.release_item(&args.pack, item);
        }
        None => {
            let loaded = if args.sync {
                registry.load_pack_sync(&args.pack, priority)?
            } else {
                pump_to_completion(&mut registry, |reg, done| {
                    reg.load_pack(&args.pack, priority, done)
                })?
            };
            if !loaded {
                return Err(DepotError::PackLoadFailed {
                    pack: args.pack.clone(),
                    reason: "pack image load failed".to_string(),
                });
            }
            let size = registry
                .pack_handle(&args.pack)
                .map(|handle| handle.len())
                .unwrap_or(0);
            println!(
                "{} {} ({} bytes)",
                style("Loaded").green().bold(),
                args.pack,
                size
            );
            registry.release_pack(&args.pack);
        }
    }

    registry.shutdown();
    Ok(())
}

/// Issue a request and run the pump/tick loop until its callback fires
fn pump_to_completion(
    registry: &mut Registry,
    request: impl FnOnce(&mut Registry, Box<dyn FnOnce(bool) + Send>) -> DepotResult<()>,
) -> DepotResult<bool> {
    let settled = Arc::new(Mutex::new(None::<bool>));
    let flag = Arc::clone(&settled);
    request(
        registry,
        Box::new(move |ok| {
            *flag.lock().unwrap_or_else(|e| e.into_inner()) = Some(ok);
        }),
    )?;

    let mut driver = TickDriver::new();
    loop {
        registry.pump();
        registry.tick(driver.delta());
        if let Some(ok) = *settled.lock().unwrap_or_else(|e| e.into_inner()) {
            return Ok(ok);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
