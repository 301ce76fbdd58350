//! `sshgrid create credential`

use std::path::Path;

use anyhow::{Context as _, Result};
use sshgrid_core::{Secret, SSH_PRIVATE_KEY_KEY, SSH_USERNAME_KEY};
use sshgrid_ops::Context;

pub fn create(ctx: &Context, user: &str, private_key: &Path) -> Result<()> {
    let key = std::fs::read_to_string(private_key)
        .with_context(|| format!("unable to read {}", private_key.display()))?;
    let name = &ctx.defaults.ssh_credential_secret;
    let secret = Secret::new(ctx.namespace(), name)
        .with(SSH_USERNAME_KEY, user)
        .with(SSH_PRIVATE_KEY_KEY, key);
    ctx.store
        .create(&secret)
        .with_context(|| format!("unable to create SSH credential {name:?}"))?;
    println!("✓ Created SSH credential {name} for user {user}");
    Ok(())
}
