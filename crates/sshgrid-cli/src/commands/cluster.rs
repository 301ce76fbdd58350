//! `sshgrid create cluster`

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use sshgrid_core::{Cluster, ClusterProviderSpec, Secret, TLS_CERT_KEY, TLS_KEY_KEY};
use sshgrid_ops::Context;

pub struct CreateClusterArgs {
    pub name: Option<String>,
    pub etcd_ca_cert: PathBuf,
    pub etcd_ca_key: PathBuf,
    pub vip: Option<String>,
    pub api_server_port: u16,
}

pub fn create(ctx: &Context, args: CreateClusterArgs) -> Result<()> {
    let ns = ctx.namespace();
    let name = args.name.unwrap_or_else(|| ctx.defaults.cluster_name.clone());
    if name != ctx.defaults.cluster_name {
        bail!(
            "cluster name {name:?} does not match [defaults].cluster_name {:?}; machines would not find it",
            ctx.defaults.cluster_name
        );
    }

    let cert = std::fs::read_to_string(&args.etcd_ca_cert)
        .with_context(|| format!("unable to read {}", args.etcd_ca_cert.display()))?;
    let key = std::fs::read_to_string(&args.etcd_ca_key)
        .with_context(|| format!("unable to read {}", args.etcd_ca_key.display()))?;

    let secret_name = format!("{name}-etcd-ca");
    let spec = ClusterProviderSpec {
        etcd_ca_secret: secret_name.clone(),
        vip_address: args.vip,
        api_server_port: args.api_server_port,
    };
    let cluster = Cluster::new(ns, &name, &spec)?;

    ctx.store
        .create(&Secret::new(ns, &secret_name).with(TLS_CERT_KEY, cert).with(TLS_KEY_KEY, key))
        .context("unable to store etcd CA")?;
    ctx.store.create(&cluster).context("unable to create cluster")?;

    println!("✓ Created cluster {name}");
    println!("  etcd CA secret: {secret_name}");
    if let Some(vip) = &spec.vip_address {
        println!("  API server: {vip}:{}", spec.api_server_port);
    }
    Ok(())
}
