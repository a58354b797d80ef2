use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::{
    browser,
    config::current_username,
    constants::{self, SECRET_REGISTRY_FILE_NAME},
    secret::{KeyRegistry, KeychainBackend, SecretStore},
};

#[derive(Debug, Clone, Args)]
pub struct ClearCommand {
    #[arg(
        short = 'f',
        long,
        help = "Also remove stale browser lock files left by an improperly terminated run",
        long_help = "Also remove stale browser lock files left by an improperly terminated run.\n\n\
If the key registry and the OS secret store are out of sync, search the secret store for \
entries prefixed with aws-cli-auth- and delete them manually."
    )]
    pub force: bool,
}

impl ClearCommand {
    pub fn execute(self) -> Result<()> {
        let data_dir = constants::data_dir().context("Failed to determine data directory")?;

        if self.force {
            let profile_dir =
                constants::chrome_user_data_dir().context("Failed to determine browser profile")?;
            let removed = browser::force_cleanup(&profile_dir);
            info!("Removed {} stale browser lock file(s)", removed.len());
            eprintln!(
                "If a browser process is still hanging, stop it and delete {} manually",
                data_dir.display()
            );
        }

        let registry = KeyRegistry::new(data_dir.join(SECRET_REGISTRY_FILE_NAME));
        let backend = KeychainBackend::new(current_username(), registry);

        // every entry is attempted; leftovers are reported but not fatal
        if let Err(e) = SecretStore::new(backend, "").clear_all() {
            eprintln!("Warning: {e}");
        }

        Ok(())
    }
}
