// filter.rs - Packet and lifecycle-event selection
use crate::config::Config;
use crate::network::packet::IpPacket;
use crate::process::port_finder::{selection_matches, PortFinder};
use crate::process::{PidLookup, ProcessEvent};

/// Whether a parsed packet should be displayed: IP version must be
/// selected, and when processes were named, the source port must belong
/// to one of them.
pub fn matches_packet(
    config: &Config,
    finder: &mut PortFinder,
    lookup: &dyn PidLookup,
    packet: &IpPacket,
) -> bool {
    if !config.ip_version.accepts(packet.version()) {
        return false;
    }
    if config.processes.is_empty() {
        return true;
    }
    finder
        .ports_matching(&config.processes, lookup)
        .contains(&packet.source_port())
}

/// Whether a lifecycle event should be displayed, against both the
/// process and the parent selections.
pub fn matches_event(config: &Config, lookup: &dyn PidLookup, event: &ProcessEvent) -> bool {
    if !config.processes.is_empty()
        && !selection_matches(&config.processes, event.pid, &event.path, &event.path)
    {
        return false;
    }
    if !config.parents.is_empty() {
        let parent_path = lookup.path_of(event.ppid);
        if !selection_matches(&config.parents, event.ppid, &parent_path, &parent_path) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectedProcesses;
    use crate::process::LifecycleMode;
    use std::collections::HashMap;

    struct FixedLookup(HashMap<i32, String>);

    impl PidLookup for FixedLookup {
        fn parent_of(&self, _pid: i32) -> i32 {
            0
        }
        fn path_of(&self, pid: i32) -> String {
            self.0.get(&pid).cloned().unwrap_or_default()
        }
    }

    fn event(pid: i32, ppid: i32, path: &str) -> ProcessEvent {
        ProcessEvent {
            event_type: 23,
            pid,
            ppid,
            uid: 0,
            exit_status: 0,
            path: path.to_string(),
            arguments: vec![],
            mode: LifecycleMode::Starting,
        }
    }

    #[test]
    fn test_event_passes_without_selection() {
        let config = Config::default();
        let lookup = FixedLookup(HashMap::new());
        assert!(matches_event(&config, &lookup, &event(5, 1, "/bin/ls")));
    }

    #[test]
    fn test_event_process_selection() {
        let mut config = Config::default();
        config.processes = ["ls"]
            .iter()
            .map(|s| s.to_string())
            .collect::<SelectedProcesses>();
        let lookup = FixedLookup(HashMap::new());

        assert!(matches_event(&config, &lookup, &event(5, 1, "/bin/ls")));
        assert!(!matches_event(&config, &lookup, &event(5, 1, "/bin/cat")));
    }

    #[test]
    fn test_event_pid_selection() {
        let mut config = Config::default();
        config.processes = ["42"]
            .iter()
            .map(|s| s.to_string())
            .collect::<SelectedProcesses>();
        let lookup = FixedLookup(HashMap::new());

        assert!(matches_event(&config, &lookup, &event(42, 1, "/bin/cat")));
        assert!(!matches_event(&config, &lookup, &event(41, 1, "/bin/cat")));
    }

    #[test]
    fn test_event_parent_selection() {
        let mut config = Config::default();
        config.parents = ["launchd"]
            .iter()
            .map(|s| s.to_string())
            .collect::<SelectedProcesses>();
        let lookup = FixedLookup(HashMap::from([(1, "/sbin/launchd".to_string())]));

        assert!(matches_event(&config, &lookup, &event(5, 1, "/bin/ls")));
        assert!(!matches_event(&config, &lookup, &event(5, 77, "/bin/ls")));
    }
}
