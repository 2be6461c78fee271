//! `replyd serve`: Start the HTTP gateway.

use replyd_config::AppConfig;

pub async fn run(mut config: AppConfig, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let dispatcher = replyd_dispatch::build_from_config(&config).await?;

    println!("🤖 {} gateway", config.bot_name);
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   History:   {}", config.history_path().display());
    for summary in dispatcher.registry().describe() {
        println!("   Provider:  {summary}");
    }

    replyd_gateway::serve(std::sync::Arc::new(dispatcher), &config).await?;

    Ok(())
}
