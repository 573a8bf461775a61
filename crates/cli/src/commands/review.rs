//! `crabdesk review` — the reviewer surface: list pending escalations,
//! record decisions.

use crabdesk_config::AppConfig;
use crabdesk_pipeline::TurnOutcome;

pub async fn run(
    user: Option<String>,
    thread: Option<String>,
    approve: bool,
    reject: bool,
    feedback: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let pipeline = super::build_pipeline(&config).await?;

    if !approve && !reject {
        return list_pending(&pipeline).await;
    }

    let (Some(user), Some(thread)) = (user, thread) else {
        return Err("a decision needs both --user and --thread".into());
    };

    let outcome = pipeline
        .approve_hitl(&user, &thread, approve, feedback.as_deref().unwrap_or(""))
        .await?;

    if outcome.approved {
        println!("  Approved: {}", outcome.session_id);
    } else {
        println!("  Rejected: {}", outcome.session_id);
    }
    println!("  User notice: {}", outcome.message);
    if let Some(reprocessed) = outcome.reprocessed {
        match *reprocessed {
            TurnOutcome::Reply { reply, .. } => {
                println!("  Automated retry replied:");
                for line in reply.lines() {
                    println!("    {line}");
                }
            }
            other => println!("  Automated retry outcome: {other:?}"),
        }
    }
    if outcome.degraded_persistence {
        println!("  [Warning] The resolution could not be saved to history.");
    }

    Ok(())
}

async fn list_pending(
    pipeline: &crabdesk_pipeline::SupportPipeline,
) -> Result<(), Box<dyn std::error::Error>> {
    let pending = pipeline.list_pending_reviews().await;

    if pending.is_empty() {
        println!("  No escalations awaiting review.");
        return Ok(());
    }

    println!("  {} escalation(s) awaiting review:", pending.len());
    println!();
    for (idx, item) in pending.iter().enumerate() {
        println!("  {}. session {}", idx + 1, item.key.session_id());
        println!("     Query:    \"{}\"", item.query);
        println!("     Intent:   {}", item.intent);
        println!("     Proposed: {}", item.proposed_action);
        println!("     Received: {}", item.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!();
    }
    println!("  Decide with:");
    println!("    crabdesk review --user <id> --thread <id> --approve [-f \"feedback\"]");
    println!("    crabdesk review --user <id> --thread <id> --reject  [-f \"reason\"]");

    Ok(())
}
