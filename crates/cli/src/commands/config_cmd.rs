//! `replyd config`: Print the effective configuration.

use replyd_config::AppConfig;

pub fn show(config: &AppConfig) {
    println!("{config:#?}");
    println!();
    println!("History file: {}", config.history_path().display());
    for provider in &config.providers {
        let key = if provider.api_key.is_some() { "set" } else { "missing" };
        println!("{} key ({}): {key}", provider.name, provider.key_env_var());
    }
}
