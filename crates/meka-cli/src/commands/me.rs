//! Current user command handler

use anyhow::{bail, Context, Result};

use meka_client::{ApiClient, Authenticator, ClientConfig};

use crate::output::Output;

/// Print the profile of the configured credentials
pub async fn show(config: &ClientConfig, output: &Output) -> Result<()> {
    let mut api = ApiClient::from_config(config);

    if !api.is_authenticated() {
        let (Some(key), Some(secret)) = (&config.api_key, &config.api_secret) else {
            bail!("No credentials configured. Set MEKA_API_KEY and MEKA_API_SECRET, or MEKA_JWT.");
        };
        api.authenticate_with_api_key(key, secret)
            .await
            .context("Failed to authenticate with API key")?;
    }

    let profile = api.me().await.context("Failed to fetch user profile")?;
    output.print_profile(profile.as_ref());
    Ok(())
}
