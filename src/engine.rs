// engine.rs - Subcommand drivers wiring loops, filters, and rendering
use crate::config::Config;
use crate::filter;
use crate::network::capture::{validate_interface, CaptureSession};
use crate::network::packet::IpPacket;
use crate::process::port_finder::selection_matches;
use crate::process::{AuditPipe, Correlator, PidLookup, PortFinder, SystemPidLookup};
use crate::view;
use anyhow::Result;
use std::thread;

pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Engine { config }
    }

    /// Capture loop: parse each frame, attribute the source port to its
    /// owning process, print matching packets. Runs until terminated.
    pub fn run_traffic(&self) -> Result<()> {
        validate_interface(&self.config.interface)?;
        let session = CaptureSession::open(&self.config.interface)?;
        let lookup = SystemPidLookup;
        let mut finder = PortFinder::new(self.config.ip_version);

        log::info!("observing traffic on {}", session.interface());
        session.receive(|frame| {
            let packet = match IpPacket::parse(frame) {
                Ok(packet) => packet,
                Err(err) => {
                    log::debug!("dropping frame: {}", err);
                    return;
                }
            };
            if !packet.has_transport() {
                return;
            }
            if !filter::matches_packet(&self.config, &mut finder, &lookup, &packet) {
                return;
            }
            let path = finder
                .path_for_port(packet.source_port(), &lookup)
                .unwrap_or_default();
            println!("{}", view::format_packet(&packet, &path, &self.config));
        })?;
        Ok(())
    }

    /// Audit loop: correlate records into start/exit events and print
    /// the ones matching the process/parent selections. Runs until
    /// terminated.
    pub fn run_procs(&self) -> Result<()> {
        let pipe = AuditPipe::open()?;
        let lookup = SystemPidLookup;
        let mut correlator = Correlator::new(SystemPidLookup);

        log::info!("observing process lifecycle events");
        correlator.run(&pipe, |event| {
            if !filter::matches_event(&self.config, &lookup, event) {
                return;
            }
            println!("{}", view::format_event(event, &self.config));
        })?;
        Ok(())
    }

    /// One-shot listing of current sockets and their owners.
    pub fn run_connections(&self) -> Result<()> {
        let lookup = SystemPidLookup;
        for entry in PortFinder::connections(self.config.ip_version)? {
            if !self.config.ip_version.accepts(entry.ip_version) {
                continue;
            }
            if !self.config.processes.is_empty() {
                let path = lookup.path_of(entry.pid);
                if !selection_matches(&self.config.processes, entry.pid, &entry.command, &path) {
                    continue;
                }
            }
            let remote = entry
                .remote
                .map(|addr| format!(" -> {}", addr))
                .unwrap_or_default();
            let state = entry
                .state
                .map(|state| format!(" ({})", state))
                .unwrap_or_default();
            println!(
                "{:<16} {:>6} {} {}{}{}",
                entry.command, entry.pid, entry.transport, entry.local, remote, state
            );
        }
        Ok(())
    }

    /// Both observers at once, on two threads sharing no state.
    pub fn run_watch(&self) -> Result<()> {
        let config = self.config.clone();
        thread::spawn(move || {
            let engine = Engine::new(config);
            if let Err(err) = engine.run_procs() {
                log::error!("lifecycle observer stopped: {:#}", err);
                eprintln!("Error: lifecycle observer stopped: {:#}", err);
            }
        });
        self.run_traffic()
    }
}
