//! `picoclaw onboard` — initialize the workspace and a default config.

use anyhow::Result;

use crate::config;

pub async fn cmd_onboard(workspace: Option<String>) -> Result<()> {
    let workspace = workspace.unwrap_or_else(|| "~/.picoclaw".to_string());
    let path = config::onboard(&workspace)?;

    println!("Workspace initialized at {}", workspace);
    println!("Config written to {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Add a provider entry to model_list in the config");
    println!("  2. Start the gateway: picoclaw gateway");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_onboard_creates_workspace() {
        let dir = tempdir().unwrap();
        let ws = dir.path().join("claw").to_string_lossy().to_string();
        cmd_onboard(Some(ws.clone())).await.unwrap();
        assert!(std::path::Path::new(&ws).join("config.json").exists());
    }
}
