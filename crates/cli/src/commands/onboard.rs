//! `crabdesk onboard` — initialize configuration and storage.

use crabdesk_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("  Config already exists: {}", config_path.display());
    } else {
        std::fs::create_dir_all(&config_dir)?;
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Wrote default config: {}", config_path.display());
    }

    let config = AppConfig::load()?;
    let storage_dir = config.store.storage_dir();
    std::fs::create_dir_all(&storage_dir)?;
    println!("  Storage directory:    {}", storage_dir.display());
    println!();
    println!("  Start a session with:");
    println!("    crabdesk chat --user <your-id>");

    Ok(())
}
