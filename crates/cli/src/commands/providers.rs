//! `replyd providers`: Show the fallback order requests walk through.

use replyd_config::AppConfig;

pub fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = replyd_providers::build_from_config(config)?;

    println!("Fallback order ({} provider/model pairs):", registry.pair_count());
    for summary in registry.describe() {
        println!("  {summary}");
    }

    let skipped: Vec<_> = config
        .providers
        .iter()
        .filter(|p| registry.get(&p.name).is_none())
        .map(|p| format!("{} (set {})", p.name, p.key_env_var()))
        .collect();
    if !skipped.is_empty() {
        println!();
        println!("Skipped (missing API key or api_url): {}", skipped.join(", "));
    }

    Ok(())
}
