//! Renders a finished run: per-host findings, then one line per DAG node.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;

use colored::*;
use tracing::error;
use vigil_core::{BannerRecord, DataContext, DataValue, NodeReport, NodeStatus, RunOutcome};
use vigil_protocols::services;

use crate::terminal::{colors, print};
use crate::vprint;

type Detail = (String, ColoredString);

/// Everything the context says about one address.
#[derive(Debug, Default, PartialEq)]
pub struct HostView<'a> {
    pub live: bool,
    pub ports: BTreeSet<u16>,
    pub banners: BTreeMap<u16, &'a BannerRecord>,
}

/// Folds every address-shaped value in the context into per-host views, whatever
/// key it was published under.
pub fn collect_hosts(context: &DataContext) -> BTreeMap<IpAddr, HostView<'_>> {
    let mut hosts: BTreeMap<IpAddr, HostView<'_>> = BTreeMap::new();

    for key in context.keys() {
        let Some(aggregated) = context.get(key) else {
            continue;
        };
        for value in aggregated.values() {
            match value {
                DataValue::Addresses(addrs) => {
                    for addr in addrs {
                        hosts.entry(*addr).or_default().live = true;
                    }
                }
                DataValue::OpenPorts(open) => {
                    let host = hosts.entry(open.target).or_default();
                    host.ports.extend(open.ports.iter().copied());
                }
                DataValue::Banner(record) if !record.is_empty() => {
                    let host = hosts.entry(record.target).or_default();
                    host.ports.insert(record.port);
                    host.banners.insert(record.port, record);
                }
                _ => {}
            }
        }
    }

    hosts
}

pub fn render(outcome: &RunOutcome, elapsed: Duration) {
    if let Some(err) = outcome.error.as_ref().filter(|err| err.is_fatal()) {
        print::header("run aborted");
        error!("{err}");
        return;
    }

    let hosts = collect_hosts(&outcome.context);
    if hosts.is_empty() {
        print::header("nothing found");
        print::no_results();
    } else {
        print::header("results");
        print_hosts(&hosts);
    }

    vprint!();
    print::header("modules");
    print_nodes(&outcome.nodes);
    print_summary(&hosts, outcome, elapsed);
}

/// Machine-readable form of the outcome, written to stdout.
pub fn render_json(outcome: &RunOutcome) -> anyhow::Result<()> {
    let document = serde_json::json!({
        "context": outcome.context,
        "nodes": outcome.nodes,
        "error": outcome.error.as_ref().map(|err| err.to_string()),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn print_hosts(hosts: &BTreeMap<IpAddr, HostView<'_>>) {
    for (idx, (addr, host)) in hosts.iter().enumerate() {
        print::tree_head(idx, &addr_string(addr));
        print::as_tree_one_level(&host_details(host));
        if idx + 1 != hosts.len() {
            vprint!();
        }
    }
}

fn host_details(host: &HostView<'_>) -> Vec<Detail> {
    let mut details: Vec<Detail> = Vec::new();

    let state = if host.live {
        "up".green()
    } else {
        "no echo reply".color(colors::SEPARATOR)
    };
    details.push(("State".to_string(), state));

    if host.ports.is_empty() {
        details.push(("Ports".to_string(), "none open".color(colors::SEPARATOR)));
    }

    for port in &host.ports {
        let key = format!("{port}/tcp");
        details.push((key, port_detail(*port, host.banners.get(port).copied())));
    }

    details
}

fn port_detail(port: u16, record: Option<&BannerRecord>) -> ColoredString {
    let service = record
        .and_then(|record| record.protocol.as_deref())
        .or_else(|| services::service_name(port))
        .unwrap_or("unknown");

    let mut text = service.to_string();
    if let Some(banner) = record.and_then(|record| record.banner.as_deref()) {
        text.push_str(&format!(" {banner}"));
    }
    if let Some(tls) = record.and_then(|record| record.tls.as_ref()) {
        let version = tls.version.as_deref().unwrap_or("TLS");
        text.push_str(&format!(" [{version}"));
        if let Some(cn) = &tls.common_name {
            text.push_str(&format!(" cn={cn}"));
        }
        if !tls.subject_alt_names.is_empty() {
            text.push_str(&format!(" san={}", tls.subject_alt_names.join(",")));
        }
        text.push(']');
    }

    text.color(colors::PORT)
}

fn print_nodes(nodes: &[NodeReport]) {
    let width = nodes
        .iter()
        .map(|node| node.instance_id.len())
        .max()
        .unwrap_or(0);

    for node in nodes {
        let status = match &node.status {
            NodeStatus::Succeeded => format!("ok ({} outputs)", node.outputs).green(),
            NodeStatus::Failed(reason) => format!("failed: {reason}").color(colors::FAILURE),
            NodeStatus::Crashed(reason) => format!("crashed: {reason}").color(colors::FAILURE),
            NodeStatus::Skipped(reason) => format!("skipped: {reason}").yellow(),
            NodeStatus::Cancelled => "cancelled".yellow(),
            NodeStatus::NotStarted => "not started".color(colors::SEPARATOR),
        };
        print::aligned_line(&node.instance_id, width, status);
        for warning in &node.warnings {
            print::print(&format!("    {}", warning.as_str().yellow()));
        }
    }
}

fn print_summary(hosts: &BTreeMap<IpAddr, HostView<'_>>, outcome: &RunOutcome, elapsed: Duration) {
    let open: usize = hosts.values().map(|host| host.ports.len()).sum();
    let hosts_text = format!("{} hosts", hosts.len()).bold().green();
    let ports_text = format!("{open} open ports").bold().green();
    let time_text = format!("{:.2}s", elapsed.as_secs_f64()).bold().yellow();

    let verdict = match &outcome.error {
        None => "Run complete".color(colors::TEXT_DEFAULT),
        Some(err) if err.is_cancelled() => "Run cancelled".yellow(),
        Some(_) => "Run finished with failures".color(colors::FAILURE),
    };

    print::fat_separator();
    print::centerln(&format!("{verdict}: {hosts_text}, {ports_text} in {time_text}"));
}

fn addr_string(addr: &IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => v4.to_string().color(colors::IPV4_ADDR).to_string(),
        IpAddr::V6(v6) => v6.to_string().color(colors::IPV6_ADDR).to_string(),
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
