//! `crabdesk chat` — interactive support session.

use crabdesk_config::AppConfig;
use crabdesk_pipeline::TurnOutcome;
use crabdesk_providers::ResponseFormatter;
use std::io::{BufRead, Write};

pub async fn run(user: &str, thread: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let pipeline = super::build_pipeline(&config).await?;

    let snapshot = pipeline.start_session(user, thread).await?;

    println!();
    println!("  Crabdesk Support — interactive session");
    println!("  Session:  {}", snapshot.session_id);
    println!("  History:  {} previous interaction(s)", snapshot.history_count);
    if snapshot.requires_hitl {
        println!("  Note:     this thread is awaiting human review");
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Commands: 'history', 'clear', 'exit'");
    println!();

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let input = line?.trim().to_string();

        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "exit" | "quit" => break,
            "history" => {
                let history = pipeline.get_user_history(user, 5).await?;
                if history.is_empty() {
                    println!("  (no history yet)");
                } else {
                    for (idx, entry) in history.iter().enumerate() {
                        println!("  {}. {}", idx + 1, entry.query);
                        println!("     -> {}", ResponseFormatter::truncate(&entry.resolution, 100));
                    }
                }
                println!();
                continue;
            }
            "clear" => {
                match pipeline.clear_session(user, thread).await {
                    Ok(()) => println!("  Session buffer cleared."),
                    Err(e) => println!("  [Error] {e}"),
                }
                println!();
                continue;
            }
            _ => {}
        }

        match pipeline.process_message(user, thread, &input).await {
            Ok(TurnOutcome::Reply { reply, degraded_persistence, .. }) => {
                println!();
                for line in ResponseFormatter::with_timestamp(&reply).lines() {
                    println!("  Agent > {line}");
                }
                if degraded_persistence {
                    println!();
                    println!("  [Warning] This interaction could not be saved to history.");
                }
                println!();
            }
            Ok(TurnOutcome::PendingReview { notice, .. }) => {
                println!();
                for line in notice.lines() {
                    println!("  Agent > {line}");
                }
                println!();
                println!("  [!] Escalated for human review. A reviewer can decide with:");
                println!("      crabdesk review --user {user} --thread {thread} --approve");
                println!();
            }
            Ok(TurnOutcome::Fallback { reply, error_code, .. }) => {
                println!();
                println!("  Agent > {reply}");
                println!("  [Error code: {error_code}]");
                println!();
            }
            Err(e) => {
                println!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Thank you for using Crabdesk Support. Goodbye!");
    Ok(())
}
