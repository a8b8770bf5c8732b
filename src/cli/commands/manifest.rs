//! Manifest command - parse, validate, and inspect a pack manifest

use crate::cli::args::ManifestArgs;
use crate::error::DepotResult;
use crate::manifest::PackManifest;
use console::style;
use tokio::runtime::Runtime;

/// Execute the manifest command
pub fn execute(args: ManifestArgs, runtime: &Runtime) -> DepotResult<()> {
    let manifest = runtime.block_on(PackManifest::from_file(&args.path))?;
    println!(
        "{} {} ({} packs)",
        style("Valid").green().bold(),
        args.path.display(),
        manifest.len()
    );

    match args.pack.as_deref() {
        Some(pack) => {
            let closure = manifest.dependency_closure(pack)?;
            if closure.is_empty() {
                println!("{pack} has no dependencies");
            } else {
                println!("{pack} depends on: {}", closure.join(", "));
            }
        }
        None => {
            for id in manifest.ids() {
                let desc = manifest.descriptor(id)?;
                println!("{}  {}", style(id).bold(), desc.path);
                if !desc.dependencies.is_empty() {
                    println!("  deps:  {}", desc.dependencies.join(", "));
                }
                if !desc.items.is_empty() {
                    println!("  items: {}", desc.items.join(", "));
                }
            }
        }
    }

    Ok(())
}
