//! Config command handlers

use std::path::Path;

use anyhow::Result;

use meka_client::ClientConfig;

use crate::output::{Output, OutputFormat};

/// Show the effective configuration
pub fn show(config: &ClientConfig, config_path: &Path, output: &Output) -> Result<()> {
    output.print_config(config, config_path);
    Ok(())
}

/// Print the config file location
pub fn path(config_path: &Path, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "path": config_path,
                    "exists": config_path.exists(),
                })
            );
        }
        _ => println!("{}", config_path.display()),
    }
    Ok(())
}
