use anyhow::Result;
use termgate_common::TermgateConfig;
use tracing::*;

pub(crate) async fn command(_cli: &crate::Cli) -> Result<()> {
    let config = TermgateConfig::from_env()?;
    info!(listen=%config.listen_address(), algorithm=%config.algorithm, "Configuration is valid");
    Ok(())
}
