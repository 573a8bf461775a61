//! `crabdesk history` — show or search a user's durable history.

use crabdesk_config::AppConfig;
use crabdesk_providers::ResponseFormatter;

pub async fn run(
    user: &str,
    limit: usize,
    search: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let pipeline = super::build_pipeline(&config).await?;

    let entries = match &search {
        Some(keyword) => pipeline.search_history(user, keyword).await?,
        None => pipeline.get_user_history(user, limit).await?,
    };

    if entries.is_empty() {
        match search {
            Some(keyword) => println!("  No interactions matching \"{keyword}\" for {user}."),
            None => println!("  No history for {user}."),
        }
        return Ok(());
    }

    for (idx, entry) in entries.iter().enumerate() {
        println!("  {}. [{}] {}", idx + 1, entry.timestamp.format("%Y-%m-%d %H:%M"), entry.query);
        for line in ResponseFormatter::truncate(&entry.resolution, 200).lines() {
            println!("     {line}");
        }
        if entry.metadata.get("reviewed").is_some() {
            println!("     (human reviewed)");
        }
        println!();
    }

    Ok(())
}
