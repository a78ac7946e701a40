// process/mod.rs - Process lifecycle observation and attribution
//
// The audit correlator resolves parent pids and executable paths through
// the PidLookup trait so its record folding stays testable with a mock;
// SystemPidLookup is the per-platform implementation.
pub mod audit;
pub mod bsm;
pub mod port_finder;

pub use audit::AuditPipe;
pub use bsm::{Correlator, LifecycleMode, ProcessEvent};
pub use port_finder::PortFinder;

/// OS-level process lookups, independent of audit data.
pub trait PidLookup {
    /// Parent pid of `pid`, or 0 when unknown.
    fn parent_of(&self, pid: i32) -> i32;

    /// Canonical executable path of `pid`, or an empty string when the
    /// process is gone or the lookup is not permitted.
    fn path_of(&self, pid: i32) -> String;
}

/// Kernel-backed lookup for the current host.
pub struct SystemPidLookup;

impl PidLookup for SystemPidLookup {
    fn parent_of(&self, pid: i32) -> i32 {
        #[cfg(target_os = "macos")]
        return macos::parent_of(pid);
        #[cfg(target_os = "linux")]
        return linux::parent_of(pid);
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = pid;
            0
        }
    }

    fn path_of(&self, pid: i32) -> String {
        #[cfg(target_os = "macos")]
        return macos::path_of(pid);
        #[cfg(target_os = "linux")]
        return linux::path_of(pid);
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = pid;
            String::new()
        }
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use std::mem;

    const PROC_PIDPATHINFO_MAXSIZE: usize = 4096;

    pub fn parent_of(pid: i32) -> i32 {
        let mut info: libc::kinfo_proc = unsafe { mem::zeroed() };
        let mut size = mem::size_of::<libc::kinfo_proc>();
        let mut mib = [libc::CTL_KERN, libc::KERN_PROC, libc::KERN_PROC_PID, pid];

        let ret = unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as libc::c_uint,
                &mut info as *mut libc::kinfo_proc as *mut libc::c_void,
                &mut size,
                std::ptr::null_mut(),
                0,
            )
        };
        if ret == 0 && size != 0 {
            info.kp_eproc.e_ppid
        } else {
            0
        }
    }

    pub fn path_of(pid: i32) -> String {
        let mut buffer = vec![0u8; PROC_PIDPATHINFO_MAXSIZE];
        let len = unsafe {
            libc::proc_pidpath(
                pid,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len() as u32,
            )
        };
        if len <= 0 {
            return String::new();
        }
        String::from_utf8_lossy(&buffer[..len as usize]).into_owned()
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs;

    pub fn parent_of(pid: i32) -> i32 {
        let stat = match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat,
            Err(_) => return 0,
        };
        // The comm field is parenthesized and may itself contain spaces;
        // fields resume after the last ')'.
        let rest = match stat.rfind(')') {
            Some(idx) => &stat[idx + 1..],
            None => return 0,
        };
        rest.split_whitespace()
            .nth(1)
            .and_then(|ppid| ppid.parse().ok())
            .unwrap_or(0)
    }

    pub fn path_of(pid: i32) -> String {
        fs::read_link(format!("/proc/{}/exe", pid))
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
