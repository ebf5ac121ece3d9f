//! Cluster summary output.

use std::io::Write;

use anyhow::Result;
use provision::{Cluster, NodeInfo};

/// Write the cluster summary: provisioner, name, network and a node table.
///
/// # Errors
/// Returns an error if writing fails.
pub fn show_cluster(cluster: &Cluster, out: &mut dyn Write) -> Result<()> {
    let info = &cluster.info;
    let join = |items: Vec<String>| items.join(",");

    let summary = [
        ("PROVISIONER", cluster.provisioner.clone()),
        ("NAME", info.cluster_name.clone()),
        ("NETWORK NAME", info.network.name.clone()),
        (
            "NETWORK CIDR",
            join(info.network.cidrs.iter().map(ToString::to_string).collect()),
        ),
        (
            "NETWORK GATEWAY",
            join(
                info.network
                    .gateway_addrs
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            ),
        ),
        ("NETWORK MTU", info.network.mtu.to_string()),
        (
            "KUBERNETES ENDPOINT",
            info.kubernetes_endpoint.clone().unwrap_or_default(),
        ),
    ];
    let label_width = summary.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in &summary {
        writeln!(out, "{label:<label_width$}   {value}")?;
    }

    writeln!(out)?;
    writeln!(out, "NODES:")?;
    writeln!(out)?;

    let mut rows = vec![["NAME", "TYPE", "IP", "CPU", "RAM", "DISK"].map(String::from)];
    rows.extend(info.nodes.iter().map(node_row));
    write_table(out, &rows)?;

    Ok(())
}

fn node_row(node: &NodeInfo) -> [String; 6] {
    let dash = || "-".to_string();
    [
        node.name.clone(),
        node.machine_type.to_string(),
        node.ips
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
        if node.nano_cpus > 0 {
            format_cpus(node.nano_cpus)
        } else {
            dash()
        },
        u64::try_from(node.memory)
            .ok()
            .filter(|m| *m > 0)
            .map_or_else(dash, human_bytes),
        Some(node.disk_size)
            .filter(|d| *d > 0)
            .map_or_else(dash, human_bytes),
    ]
}

fn write_table<const N: usize>(out: &mut dyn Write, rows: &[[String; N]]) -> Result<()> {
    let mut widths = [0usize; N];
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    for row in rows {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        writeln!(out, "{}", line.join("   ").trim_end())?;
    }
    Ok(())
}

/// CPUs with two decimals, e.g. `2.00`.
#[must_use]
pub fn format_cpus(nano_cpus: i64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let cpus = nano_cpus as f64 / 1e9;
    format!("{cpus:.2}")
}

/// Decimal byte size: `2.1 GB`, `512 MB`, `9 B`.
#[must_use]
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 10 {
        return format!("{bytes} B");
    }

    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    let rounded = (value * 10.0 + 0.5).floor() / 10.0;
    if rounded < 10.0 {
        format!("{rounded:.1} {}", UNITS[unit])
    } else {
        format!("{rounded:.0} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use machinery::MachineType;
    use provision::{ClusterInfo, NetworkInfo};

    use super::*;

    fn cluster() -> Cluster {
        Cluster::new(
            "docker",
            Path::new("/tmp/clusters"),
            ClusterInfo {
                cluster_name: "dev".into(),
                network: NetworkInfo {
                    name: "dev".into(),
                    cidrs: vec!["10.5.0.0/24".parse().unwrap()],
                    gateway_addrs: vec!["10.5.0.1".parse().unwrap()],
                    mtu: 1500,
                },
                nodes: vec![NodeInfo {
                    id: "abc".into(),
                    uuid: None,
                    name: "dev-controlplane-1".into(),
                    machine_type: MachineType::ControlPlane,
                    ips: vec!["10.5.0.2".parse().unwrap()],
                    nano_cpus: 2_000_000_000,
                    memory: 2_147_483_648,
                    disk_size: 0,
                }],
                kubernetes_endpoint: Some("https://127.0.0.1:6443".into()),
            },
        )
    }

    #[test]
    fn test_show_cluster() {
        let mut out = Vec::new();
        show_cluster(&cluster(), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(&format!("{:<19}   docker", "PROVISIONER")));
        assert!(out.contains(&format!("{:<19}   10.5.0.0/24", "NETWORK CIDR")));
        assert!(out.contains("KUBERNETES ENDPOINT   https://127.0.0.1:6443"));

        let header = out
            .lines()
            .find(|l| l.starts_with("NAME") && l.contains("TYPE"))
            .unwrap();
        assert!(header.ends_with("DISK"));

        let row = out.lines().find(|l| l.starts_with("dev-controlplane-1")).unwrap();
        assert!(row.contains("10.5.0.2"));
        assert!(row.contains("2.00"));
        assert!(row.contains("2.1 GB"));
        assert!(row.ends_with('-'));
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(9), "9 B");
        assert_eq!(human_bytes(512_000_000), "512 MB");
        assert_eq!(human_bytes(2_147_483_648), "2.1 GB");
        assert_eq!(human_bytes(6 * 1024 * 1024 * 1024), "6.4 GB");
    }
}
