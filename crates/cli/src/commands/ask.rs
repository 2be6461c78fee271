//! `replyd ask` / `replyd chat`: Generate replies from the terminal.
//!
//! Both go through the same dispatcher as the gateway, so cooldown,
//! throttling, fallback and history behave exactly as they do in service.

use replyd_config::AppConfig;
use replyd_dispatch::{DispatchOutcome, OutcomeKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub async fn once(config: &AppConfig, conversation: &str, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = replyd_dispatch::build_from_config(config).await?;
    let outcome = dispatcher.dispatch(conversation, text).await;
    report(&outcome);
    println!("{}", outcome.reply);
    Ok(())
}

pub async fn interactive(config: &AppConfig, conversation: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = replyd_dispatch::build_from_config(config).await?;

    println!();
    println!("  {}: interactive mode", config.bot_name);
    println!("  Conversation: {conversation}");
    for summary in dispatcher.registry().describe() {
        println!("  Provider:     {summary}");
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"  You > ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        let outcome = dispatcher.dispatch(conversation, line).await;
        report(&outcome);
        for reply_line in outcome.reply.lines() {
            println!("  {} > {reply_line}", config.bot_name);
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Attempt trail on stderr so stdout carries only the reply.
fn report(outcome: &DispatchOutcome) {
    if outcome.kind != OutcomeKind::Replied {
        eprintln!("  [{}]", outcome_label(outcome.kind));
    }
    for attempt in &outcome.attempts {
        match &attempt.failure {
            Some(kind) => eprintln!("  ✗ {}/{}: {kind}", attempt.provider, attempt.model),
            None => eprintln!("  ✓ {}/{}", attempt.provider, attempt.model),
        }
    }
}

fn outcome_label(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Replied => "replied",
        OutcomeKind::Cooldown => "cooldown",
        OutcomeKind::EmptyInput => "empty input",
        OutcomeKind::Overloaded => "all providers busy",
        OutcomeKind::Unavailable => "no provider could answer",
    }
}
