//! `sshgrid create|delete|get machine`

use std::path::PathBuf;

use anyhow::{anyhow, Context as _, Result};
use sshgrid_core::config::parse_duration;
use sshgrid_core::SshConfig;
use sshgrid_ops::{
    Context, CreateMachineRequest, DeleteMachineRequest, DrainOptions, MachineLifecycle,
    MachineView,
};

use super::print_report;
use crate::OutputFormat;

pub fn create(
    ctx: &Context,
    ip: &str,
    port: Option<u16>,
    role: &str,
    public_keys: &[PathBuf],
    iface: &str,
) -> Result<()> {
    let req = CreateMachineRequest {
        role: role.to_string(),
        ssh: SshConfig {
            host: ip.to_string(),
            port: port.unwrap_or(ctx.defaults.ssh_port),
            public_keys: read_public_keys(public_keys)?,
            credential_secret: ctx.defaults.ssh_credential_secret.clone(),
        },
        vip_network_interface: iface.to_string(),
    };
    let report = MachineLifecycle::new(ctx).create(req)?;
    println!("✓ Created machine {ip}");
    print_report(&report);
    Ok(())
}

pub fn delete(
    ctx: &Context,
    ip: &str,
    drain_timeout: Option<&str>,
    drain_grace_period: Option<i64>,
) -> Result<()> {
    let drain = drain_options(DrainOptions::from_defaults(&ctx.defaults)?, drain_timeout, drain_grace_period)?;
    let report = MachineLifecycle::new(ctx).delete(DeleteMachineRequest {
        name: ip.to_string(),
        drain,
    })?;
    println!("✓ Deleted machine {ip}");
    print_report(&report);
    Ok(())
}

pub fn get(ctx: &Context, ip: Option<&str>, output: Option<OutputFormat>) -> Result<()> {
    let views = MachineLifecycle::new(ctx).get(ip)?;
    match output {
        Some(OutputFormat::Json) => println!("{}", serde_json::to_string_pretty(&views)?),
        Some(OutputFormat::Yaml) => print!("{}", serde_yaml::to_string(&views)?),
        None => print!("{}", format_table(&views)),
    }
    Ok(())
}

fn read_public_keys(files: &[PathBuf]) -> Result<Vec<String>> {
    files
        .iter()
        .map(|path| {
            std::fs::read_to_string(path)
                .map(|key| key.trim().to_string())
                .with_context(|| format!("unable to read public key {}", path.display()))
        })
        .collect()
}

fn drain_options(
    mut drain: DrainOptions,
    timeout: Option<&str>,
    grace_period: Option<i64>,
) -> Result<DrainOptions> {
    if let Some(t) = timeout {
        drain.timeout = parse_duration(t).ok_or_else(|| anyhow!("invalid drain timeout {t:?}"))?;
    }
    if let Some(g) = grace_period {
        drain.grace_period_secs = g;
    }
    Ok(drain)
}

fn format_table(views: &[MachineView]) -> String {
    let headers = ["NAME", "ROLES", "HOST", "PHASE", "ETCD MEMBER"];
    let rows: Vec<[String; 5]> = views
        .iter()
        .map(|v| {
            let roles: Vec<String> = v.roles.iter().map(|r| r.to_string()).collect();
            let host = match (&v.host, v.port) {
                (Some(h), Some(p)) => format!("{h}:{p}"),
                (Some(h), None) => h.clone(),
                _ => "-".to_string(),
            };
            let member = v
                .etcd_member
                .as_ref()
                .map(|m| format!("{:x}", m.id))
                .unwrap_or_else(|| "-".to_string());
            [
                v.name.clone(),
                roles.join(","),
                host,
                format!("{:?}", v.phase),
                member,
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_line = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };
    push_line(&headers);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_line(&cells);
    }
    out
}
