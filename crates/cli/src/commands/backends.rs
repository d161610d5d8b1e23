//! `taskloom backends`: List configured backends.

use taskloom_core::backend::Backend;
use taskloom_providers::registry::default_base_url;
use super::{Engine, GlobalOpts};

pub async fn run(opts: &GlobalOpts) -> Result<(), Box<dyn std::error::Error>> {
    let config = opts.load_config()?;
    let engine = Engine::build(config)?;

    println!("Backends");
    println!("========");
    println!();

    let names = engine.registry.list();
    if names.is_empty() {
        println!("  (none registered)");
    }
    for name in names {
        let Some(entry) = engine.registry.entry(name) else {
            continue;
        };
        let marker = if name == engine.config.default_backend { "*" } else { " " };
        let credential = if entry.has_credential { "ready" } else { "no credential" };
        println!(
            "{marker} {name:<14} {:<10} {:<32} {credential}",
            entry.kind.as_str(),
            entry.backend.default_model(),
        );
    }

    println!();
    println!("  * default backend");
    println!("  Credentials come from [backends.<name>].api_key or <NAME>_API_KEY.");

    let missing: Vec<String> = engine
        .config
        .referenced_backends()
        .into_iter()
        .filter(|n| engine.registry.get(n).is_none())
        .collect();
    for name in missing {
        let hint = if default_base_url(&name).is_none() { "add api_url" } else { "check config" };
        println!("  ! '{name}' is referenced but not registered ({hint})");
    }

    Ok(())
}
