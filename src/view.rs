// view.rs - Line rendering for packets and lifecycle events
use crate::config::{Column, Config};
use crate::network::packet::IpPacket;
use crate::network::types::IpVersion;
use crate::process::{LifecycleMode, ProcessEvent};
use std::path::Path;

/// Render one attributed packet according to the configured columns.
/// IPv4 joins address and port with ':', IPv6 with '.' so the port does
/// not blend into the address groups.
pub fn format_packet(packet: &IpPacket, path: &str, config: &Config) -> String {
    let sep = match packet.version() {
        IpVersion::V6 => '.',
        _ => ':',
    };

    let mut parts: Vec<String> = Vec::new();
    let mut previous: Option<Column> = None;
    for &col in &config.columns {
        match col {
            Column::Path => parts.push(format!(
                "{:<20.20}",
                display_path(path, config.verbose)
            )),
            Column::Proto => parts.push(packet.transport().to_string()),
            Column::Source => parts.push(format!(
                "{}{}{}",
                packet.source_addr(),
                sep,
                packet.source_port()
            )),
            Column::Dest => {
                if previous == Some(Column::Source) {
                    parts.push(">".to_string());
                }
                parts.push(format!(
                    "{}{}{}",
                    packet.dest_addr(),
                    sep,
                    packet.dest_port()
                ));
            }
        }
        previous = Some(col);
    }
    parts.join(" ")
}

/// Render one lifecycle event.
pub fn format_event(event: &ProcessEvent, config: &Config) -> String {
    let path = display_path(&event.path, config.verbose);
    match event.mode {
        LifecycleMode::Exiting => {
            if path.is_empty() {
                format!("pid: {} exited (status {})", event.pid, event.exit_status)
            } else {
                format!(
                    "pid: {} exited (status {}) - {}",
                    event.pid, event.exit_status, path
                )
            }
        }
        _ => {
            let mut line = format!("pid: {} ppid: {} - {}", event.pid, event.ppid, path);
            // argv[0] repeats the executable; only the arguments add
            // information.
            for arg in event.arguments.iter().skip(1) {
                line.push(' ');
                line.push_str(arg);
            }
            line
        }
    }
}

fn display_path(path: &str, verbose: bool) -> String {
    if verbose {
        return path.to_string();
    }
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
