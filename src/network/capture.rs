// network/capture.rs - Raw capture device probing and the frame read loop
//
// The capture handle is a numbered kernel device: candidates are probed
// in order and the first one that opens is configured with exactly four
// control calls. A configuration failure after a successful open is
// fatal for the whole open() call; only open failures advance to the
// next candidate.
use crate::error::{Error, Result};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// Highest device number probed, exclusive.
const MAX_CAPTURE_DEVICES: usize = 99;
const DEVICE_PATH_PREFIX: &str = "/dev/bpf";

/// Fixed part of the per-frame kernel header: 8-byte timestamp,
/// captured length, on-wire length, header length. The header length
/// field is authoritative; the kernel may pad beyond the fixed part.
const FRAME_HEADER_FIXED: usize = 18;
const FRAME_CAPLEN_OFFSET: usize = 8;
const FRAME_HDRLEN_OFFSET: usize = 16;

/// Frame records are padded so the next one starts word-aligned.
const FRAME_ALIGNMENT: usize = 4;

/// Ethernet header preceding the network-layer bytes in each frame.
const LINK_HEADER_LEN: usize = 14;

// Control request codes for the capture device, as encoded on Darwin
// ('B' group; direction | parameter size | group | number).
const BIOCGBLEN: libc::c_ulong = 0x4004_4266; // _IOR('B', 102, u32)
const BIOCSETIF: libc::c_ulong = 0x8020_426c; // _IOW('B', 108, ifreq)
const BIOCIMMEDIATE: libc::c_ulong = 0x8004_4270; // _IOW('B', 112, u32)
const BIOCPROMISC: libc::c_ulong = 0x2000_4269; // _IO('B', 105)

/// Interface request block passed to the bind control call. Declared
/// locally: the layout (16-byte name + 16-byte request union) is what
/// the device expects and libc does not export it for every target.
#[repr(C)]
struct IfReq {
    ifr_name: [u8; 16],
    ifr_ifru: [u8; 16],
}

/// Exclusive owner of one configured capture descriptor.
///
/// The descriptor is released exactly once when the session drops.
pub struct CaptureSession {
    fd: OwnedFd,
    interface: String,
    buffer_len: usize,
}

impl CaptureSession {
    /// Probe the numbered device space and configure the first
    /// candidate that opens: query buffer size, bind the interface,
    /// enable immediate delivery, enable promiscuous capture.
    pub fn open(interface: &str) -> Result<CaptureSession> {
        let mut name = [0u8; 16];
        if interface.len() >= name.len() {
            return Err(Error::DeviceConfigurationFailed {
                step: "bind interface",
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("interface name '{}' too long", interface),
                ),
            });
        }
        name[..interface.len()].copy_from_slice(interface.as_bytes());

        for number in 0..MAX_CAPTURE_DEVICES {
            let path = format!("{}{}", DEVICE_PATH_PREFIX, number);
            let c_path = match CString::new(path.as_str()) {
                Ok(c_path) => c_path,
                Err(_) => continue,
            };

            let raw = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
            if raw < 0 {
                // Busy or absent candidate: try the next number.
                continue;
            }
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };
            log::debug!("opened capture device {}", path);

            let mut buffer_len: u32 = 0;
            ioctl_ptr(&fd, BIOCGBLEN, &mut buffer_len as *mut u32 as *mut libc::c_void)
                .map_err(|source| Error::DeviceConfigurationFailed {
                    step: "query buffer size",
                    source,
                })?;

            let mut request = IfReq {
                ifr_name: name,
                ifr_ifru: [0u8; 16],
            };
            ioctl_ptr(&fd, BIOCSETIF, &mut request as *mut IfReq as *mut libc::c_void).map_err(
                |source| Error::DeviceConfigurationFailed {
                    step: "bind interface",
                    source,
                },
            )?;

            let mut enable: u32 = 1;
            ioctl_ptr(&fd, BIOCIMMEDIATE, &mut enable as *mut u32 as *mut libc::c_void).map_err(
                |source| Error::DeviceConfigurationFailed {
                    step: "enable immediate delivery",
                    source,
                },
            )?;

            ioctl_ptr(&fd, BIOCPROMISC, std::ptr::null_mut()).map_err(|source| {
                Error::DeviceConfigurationFailed {
                    step: "enable promiscuous capture",
                    source,
                }
            })?;

            log::info!(
                "capture ready on {} via {} (buffer {} bytes)",
                interface,
                path,
                buffer_len
            );
            return Ok(CaptureSession {
                fd,
                interface: interface.to_string(),
                buffer_len: buffer_len as usize,
            });
        }

        Err(Error::DeviceUnavailable {
            tried: MAX_CAPTURE_DEVICES,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Blocking read loop. Each iteration performs one bounded read into
    /// a buffer reused across iterations and scans it for frame records;
    /// the callback receives the bytes after the link-layer header of
    /// each decodable frame, valid only for that invocation. A read
    /// error ends the iteration early and the loop retries. Never
    /// returns; cancellation is external.
    pub fn receive<F>(&self, mut on_frame: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let mut buffer = vec![0u8; self.buffer_len];
        loop {
            let read = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };
            if read < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    log::debug!("capture read failed: {}", err);
                }
                continue;
            }
            scan_frames(&buffer[..read as usize], &mut on_frame);
        }
    }
}

/// Demultiplex one read's worth of frame records. Pure over the byte
/// range: each record declares its header and captured lengths, the
/// next record starts at the word-aligned offset past the current one.
/// Zero-length or overrunning records are skipped without aborting the
/// scan.
pub fn scan_frames<F>(buffer: &[u8], on_frame: &mut F)
where
    F: FnMut(&[u8]),
{
    let mut offset = 0;
    while offset + FRAME_HEADER_FIXED <= buffer.len() {
        let caplen = u32::from_ne_bytes([
            buffer[offset + FRAME_CAPLEN_OFFSET],
            buffer[offset + FRAME_CAPLEN_OFFSET + 1],
            buffer[offset + FRAME_CAPLEN_OFFSET + 2],
            buffer[offset + FRAME_CAPLEN_OFFSET + 3],
        ]) as usize;
        let hdrlen = u16::from_ne_bytes([
            buffer[offset + FRAME_HDRLEN_OFFSET],
            buffer[offset + FRAME_HDRLEN_OFFSET + 1],
        ]) as usize;

        let start = offset + hdrlen;
        let end = start + caplen;
        if caplen > LINK_HEADER_LEN && hdrlen >= FRAME_HEADER_FIXED && end <= buffer.len() {
            on_frame(&buffer[start + LINK_HEADER_LEN..end]);
        } else if caplen != 0 {
            log::debug!(
                "skipping frame at offset {} (hdrlen {}, caplen {}, range {})",
                offset,
                hdrlen,
                caplen,
                buffer.len()
            );
        }

        let advance = word_align(hdrlen + caplen);
        if advance == 0 {
            // A zeroed header would pin the scan in place.
            break;
        }
        offset += advance;
    }
}

fn word_align(len: usize) -> usize {
    (len + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1)
}

/// Check the interface exists before probing capture devices, so the
/// user gets the available names instead of a bind failure.
pub fn validate_interface(name: &str) -> Result<()> {
    let interfaces = pnet_datalink::interfaces();
    if interfaces.iter().any(|iface| iface.name == name) {
        return Ok(());
    }
    let available: Vec<String> = interfaces.into_iter().map(|iface| iface.name).collect();
    Err(Error::InterfaceNotFound {
        name: name.to_string(),
        available: available.join(", "),
    })
}

fn ioctl_ptr(fd: &OwnedFd, request: libc::c_ulong, arg: *mut libc::c_void) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, arg) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One frame record: fixed 18-byte header (padded to 20 so payload
    /// stays aligned the way the kernel emits it) plus the frame bytes.
    fn frame_record(payload: &[u8]) -> Vec<u8> {
        let hdrlen: u16 = 20;
        let mut record = vec![0u8; hdrlen as usize];
        record[FRAME_CAPLEN_OFFSET..FRAME_CAPLEN_OFFSET + 4]
            .copy_from_slice(&(payload.len() as u32).to_ne_bytes());
        record[12..16].copy_from_slice(&(payload.len() as u32).to_ne_bytes());
        record[FRAME_HDRLEN_OFFSET..FRAME_HDRLEN_OFFSET + 2]
            .copy_from_slice(&hdrlen.to_ne_bytes());
        record.extend_from_slice(payload);
        // Pad to the word-aligned start of the next record.
        record.resize(word_align(record.len()), 0);
        record
    }

    /// Ethernet frame with an arbitrary one-byte tag as network payload
    /// so tests can tell frames apart.
    fn ether_frame(tag: u8, payload_len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; LINK_HEADER_LEN];
        frame[12] = 0x08; // ethertype, unread by the scanner
        frame.push(tag);
        frame.resize(LINK_HEADER_LEN + payload_len, 0);
        frame
    }

    #[test]
    fn test_scan_delivers_link_stripped_payloads() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&frame_record(&ether_frame(0xaa, 5)));
        buffer.extend_from_slice(&frame_record(&ether_frame(0xbb, 9)));

        let mut seen = Vec::new();
        scan_frames(&buffer, &mut |payload: &[u8]| {
            seen.push((payload[0], payload.len()));
        });
        assert_eq!(seen, vec![(0xaa, 5), (0xbb, 9)]);
    }

    #[test]
    fn test_scan_skips_zero_length_record() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&frame_record(&ether_frame(0xaa, 4)));
        buffer.extend_from_slice(&frame_record(&[])); // caplen 0
        buffer.extend_from_slice(&frame_record(&ether_frame(0xcc, 4)));

        let mut seen = Vec::new();
        scan_frames(&buffer, &mut |payload: &[u8]| seen.push(payload[0]));
        assert_eq!(seen, vec![0xaa, 0xcc]);
    }

    #[test]
    fn test_scan_skips_overrunning_record() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&frame_record(&ether_frame(0xaa, 4)));
        // Declares more captured bytes than the read returned.
        let mut bad = frame_record(&ether_frame(0xbb, 4));
        let huge = (buffer.len() as u32 + 1000).to_ne_bytes();
        bad[FRAME_CAPLEN_OFFSET..FRAME_CAPLEN_OFFSET + 4].copy_from_slice(&huge);
        buffer.extend_from_slice(&bad);

        let mut seen = Vec::new();
        scan_frames(&buffer, &mut |payload: &[u8]| seen.push(payload[0]));
        assert_eq!(seen, vec![0xaa]);
    }

    #[test]
    fn test_scan_empty_and_garbage_reads_invoke_nothing() {
        let mut calls = 0usize;
        scan_frames(&[], &mut |_: &[u8]| calls += 1);
        assert_eq!(calls, 0);

        // Shorter than one frame header.
        scan_frames(&[0u8; 10], &mut |_: &[u8]| calls += 1);
        assert_eq!(calls, 0);

        // A zeroed buffer must neither spin nor deliver frames.
        scan_frames(&[0u8; 64], &mut |_: &[u8]| calls += 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_records_advance_word_aligned() {
        // 15-byte frame: header 20 + 15 = 35, next record at 36.
        let first = frame_record(&ether_frame(0xaa, 1));
        assert_eq!(first.len() % FRAME_ALIGNMENT, 0);

        let mut buffer = first;
        buffer.extend_from_slice(&frame_record(&ether_frame(0xbb, 2)));
        let mut seen = Vec::new();
        scan_frames(&buffer, &mut |payload: &[u8]| seen.push(payload[0]));
        assert_eq!(seen, vec![0xaa, 0xbb]);
    }

    #[test]
    fn test_word_align() {
        assert_eq!(word_align(0), 0);
        assert_eq!(word_align(1), 4);
        assert_eq!(word_align(4), 4);
        assert_eq!(word_align(35), 36);
    }
}
