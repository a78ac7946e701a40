//! End-to-end flows over synthetic capture buffers and audit records.

use marlowe::network::packet::IpPacket;
use marlowe::network::scan_frames;
use marlowe::process::{Correlator, LifecycleMode, PidLookup};
use std::collections::HashMap;

/// One capture frame record: 20-byte header (header length declared in
/// the record itself) followed by the frame, padded to a 4-byte start.
fn frame_record(frame: &[u8]) -> Vec<u8> {
    let hdrlen: u16 = 20;
    let mut record = vec![0u8; hdrlen as usize];
    record[8..12].copy_from_slice(&(frame.len() as u32).to_ne_bytes());
    record[12..16].copy_from_slice(&(frame.len() as u32).to_ne_bytes());
    record[16..18].copy_from_slice(&hdrlen.to_ne_bytes());
    record.extend_from_slice(frame);
    while record.len() % 4 != 0 {
        record.push(0);
    }
    record
}

/// Ethernet frame wrapping an IPv4 TCP packet; total-length is written
/// in host order, as the capture subsystem delivers it.
fn ether_ipv4_tcp(sport: u16, dport: u16) -> Vec<u8> {
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&24u16.to_ne_bytes());
    ip[9] = 6;
    ip[12..16].copy_from_slice(&[192, 168, 0, 2]);
    ip[16..20].copy_from_slice(&[93, 184, 216, 34]);
    ip.extend_from_slice(&sport.to_be_bytes());
    ip.extend_from_slice(&dport.to_be_bytes());

    let mut frame = vec![0u8; 14];
    frame[12] = 0x08; // ethertype IPv4
    frame.extend_from_slice(&ip);
    frame
}

#[test]
fn capture_buffer_to_parsed_packets() {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&frame_record(&ether_ipv4_tcp(52000, 443)));
    buffer.extend_from_slice(&frame_record(&[0u8; 10])); // undersized frame
    buffer.extend_from_slice(&frame_record(&ether_ipv4_tcp(52001, 80)));

    let mut packets = Vec::new();
    scan_frames(&buffer, &mut |payload: &[u8]| {
        if let Ok(packet) = IpPacket::parse(payload) {
            packets.push(packet);
        }
    });

    assert_eq!(packets.len(), 2);
    assert!(packets[0].has_transport());
    assert_eq!(packets[0].source_port(), 52000);
    assert_eq!(packets[0].dest_port(), 443);
    assert_eq!(packets[0].source_addr().to_string(), "192.168.0.2");
    assert_eq!(packets[1].dest_port(), 80);
}

// --- Audit record builders (wire format, network byte order) ---

fn header32(event_type: u16) -> Vec<u8> {
    let mut t = vec![0x14];
    t.extend_from_slice(&0u32.to_be_bytes());
    t.push(11);
    t.extend_from_slice(&event_type.to_be_bytes());
    t.extend_from_slice(&0u16.to_be_bytes());
    t.extend_from_slice(&[0u8; 8]);
    t
}

fn subject32(pid: u32, euid: u32) -> Vec<u8> {
    let mut t = vec![0x24];
    t.extend_from_slice(&0u32.to_be_bytes()); // auid
    t.extend_from_slice(&euid.to_be_bytes());
    t.extend_from_slice(&[0u8; 12]); // egid, ruid, rgid
    t.extend_from_slice(&pid.to_be_bytes());
    t.extend_from_slice(&[0u8; 12]); // sid, terminal
    t
}

fn arg32(value: u32) -> Vec<u8> {
    let text = b"child PID\0";
    let mut t = vec![0x2d, 0];
    t.extend_from_slice(&value.to_be_bytes());
    t.extend_from_slice(&(text.len() as u16).to_be_bytes());
    t.extend_from_slice(text);
    t
}

fn trailer() -> Vec<u8> {
    let mut t = vec![0x13];
    t.extend_from_slice(&0xb105u16.to_be_bytes());
    t.extend_from_slice(&0u32.to_be_bytes());
    t
}

#[derive(Default)]
struct MapLookup {
    parents: HashMap<i32, i32>,
    paths: HashMap<i32, String>,
}

impl PidLookup for MapLookup {
    fn parent_of(&self, pid: i32) -> i32 {
        self.parents.get(&pid).copied().unwrap_or(0)
    }
    fn path_of(&self, pid: i32) -> String {
        self.paths.get(&pid).cloned().unwrap_or_default()
    }
}

#[test]
fn fork_then_exec_attributes_parent_across_records() {
    const AUE_FORK: u16 = 2;
    const AUE_EXEC: u16 = 7;

    let mut lookup = MapLookup::default();
    lookup.parents.insert(300, 1); // stale generic answer
    lookup.paths.insert(300, "/usr/local/bin/worker".to_string());
    let mut correlator = Correlator::new(lookup);

    let fork: Vec<u8> = [header32(AUE_FORK), subject32(200, 501), arg32(300), trailer()].concat();
    let started = correlator.fold_record(&fork).expect("fork must emit");
    assert_eq!(started.mode, LifecycleMode::Starting);
    assert_eq!((started.pid, started.ppid), (300, 200));
    assert_eq!(started.path, "/usr/local/bin/worker");

    let exec: Vec<u8> = [header32(AUE_EXEC), subject32(300, 501), trailer()].concat();
    let execed = correlator.fold_record(&exec).expect("exec must emit");
    // The stale parent answer (1) is corrected from the fork record.
    assert_eq!((execed.pid, execed.ppid), (300, 200));
}

#[test]
fn non_lifecycle_records_stay_silent() {
    let mut correlator = Correlator::new(MapLookup::default());
    let record: Vec<u8> = [header32(6153), subject32(77, 0), trailer()].concat();
    assert!(correlator.fold_record(&record).is_none());
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[test]
fn system_lookup_resolves_own_process() {
    use marlowe::process::SystemPidLookup;

    let lookup = SystemPidLookup;
    let pid = std::process::id() as i32;
    assert!(lookup.parent_of(pid) > 0);
}
