//! `replyd history` / `replyd sweep`: Operator access to stored history.

use replyd_config::AppConfig;

use super::open_store;

pub async fn show(config: &AppConfig, id: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config).await;
    let turns = store.get_history(id).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&turns)?);
        return Ok(());
    }

    if turns.is_empty() {
        println!("No history for {id}");
        return Ok(());
    }

    println!("{id} ({} turns)", turns.len());
    for turn in &turns {
        println!(
            "  [{}] {:>9}: {}",
            turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
            turn.role.as_str(),
            turn.content
        );
    }
    Ok(())
}

pub async fn clear(config: &AppConfig, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config).await;
    if store.clear(id).await {
        println!("Cleared history for {id}");
    } else {
        println!("No history for {id}");
    }
    warn_on_persistence(&store);
    Ok(())
}

pub async fn list(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config).await;
    let ids = store.conversation_ids().await;
    println!("{} conversations in {}", ids.len(), config.history_path().display());
    for id in ids {
        println!("  {id}");
    }
    Ok(())
}

pub async fn sweep(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config).await;
    if store.ttl().is_none() {
        println!("memory.ttl_secs is not set, nothing expires");
        return Ok(());
    }

    let report = store.sweep_expired().await;
    println!(
        "Removed {} turns, {} conversations emptied",
        report.turns_removed, report.conversations_removed
    );
    warn_on_persistence(&store);
    Ok(())
}

fn warn_on_persistence(store: &replyd_memory::ConversationStore) {
    if let Some(err) = store.last_persistence_error() {
        eprintln!("Warning: history persistence failed: {err}");
    }
}
