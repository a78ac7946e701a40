// process/audit.rs - Audit trail handle, preselected to lifecycle events
//
// The audit pipe is a read-only device delivering one variable-length
// binary record per read. Opening configures preselection so only the
// process and exec event classes are delivered, then the correlator
// consumes records one blocking read at a time.
use crate::error::{Error, Result};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

const AUDIT_PIPE_PATH: &str = "/dev/auditpipe";

/// Upper bound on one audit record; reads never return more than the
/// kernel's max-audit-data, which sits well below this.
const MAX_RECORD_LEN: usize = 64 * 1024;

// Event classes from the system audit_class table: process (pc) and
// exec (ex). Everything else is preselected away in the kernel.
const CLASS_PROCESS: u32 = 0x0000_0080;
const CLASS_EXEC: u32 = 0x4000_0000;
const SELECTION_CLASSES: u32 = CLASS_PROCESS | CLASS_EXEC;

const PRESELECT_MODE_LOCAL: libc::c_int = 1;

// Control request codes for the audit pipe, as encoded on Darwin
// ('A' group; direction | parameter size | group | number).
const AUDITPIPE_SET_QLIMIT: libc::c_ulong = 0x8004_4103; // _IOW('A', 3, u32)
const AUDITPIPE_GET_QLIMIT_MAX: libc::c_ulong = 0x4004_4105; // _IOR('A', 5, u32)
const AUDITPIPE_SET_PRESELECT_FLAGS: libc::c_ulong = 0x8008_4107; // _IOW('A', 7, mask pair)
const AUDITPIPE_SET_PRESELECT_NAFLAGS: libc::c_ulong = 0x8008_4109; // _IOW('A', 9, mask pair)
const AUDITPIPE_SET_PRESELECT_MODE: libc::c_ulong = 0x8004_410f; // _IOW('A', 15, int)
const AUDITPIPE_FLUSH: libc::c_ulong = 0x2000_4110; // _IO('A', 16)

/// Success/failure class mask pair as the preselection ioctls expect.
#[repr(C)]
struct AuditMask {
    success: u32,
    failure: u32,
}

/// Exclusive owner of the configured audit-trail descriptor.
pub struct AuditPipe {
    fd: OwnedFd,
}

impl AuditPipe {
    /// Open the audit pipe and restrict delivery to process-lifecycle
    /// classes: preselect mode local, queue limit raised to the queried
    /// maximum, class flags and non-attributable class flags set, then
    /// a flush of anything queued before the flags took effect. Flush
    /// failure is non-critical; every other step is fatal.
    pub fn open() -> Result<AuditPipe> {
        let c_path = CString::new(AUDIT_PIPE_PATH)
            .map_err(|_| Error::AuditPipeUnavailable(io::Error::from(io::ErrorKind::InvalidInput)))?;
        let raw = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
        if raw < 0 {
            return Err(Error::AuditPipeUnavailable(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut mode: libc::c_int = PRESELECT_MODE_LOCAL;
        ioctl(&fd, AUDITPIPE_SET_PRESELECT_MODE, &mut mode as *mut libc::c_int as *mut libc::c_void)
            .map_err(|source| Error::AuditConfigurationFailed {
                step: "set preselect mode",
                source,
            })?;

        let mut queue_limit: u32 = 0;
        ioctl(
            &fd,
            AUDITPIPE_GET_QLIMIT_MAX,
            &mut queue_limit as *mut u32 as *mut libc::c_void,
        )
        .map_err(|source| Error::AuditConfigurationFailed {
            step: "query max queue length",
            source,
        })?;

        ioctl(
            &fd,
            AUDITPIPE_SET_QLIMIT,
            &mut queue_limit as *mut u32 as *mut libc::c_void,
        )
        .map_err(|source| Error::AuditConfigurationFailed {
            step: "set queue length",
            source,
        })?;

        let mut mask = AuditMask {
            success: SELECTION_CLASSES,
            failure: SELECTION_CLASSES,
        };
        ioctl(
            &fd,
            AUDITPIPE_SET_PRESELECT_FLAGS,
            &mut mask as *mut AuditMask as *mut libc::c_void,
        )
        .map_err(|source| Error::AuditConfigurationFailed {
            step: "set preselect flags",
            source,
        })?;

        ioctl(
            &fd,
            AUDITPIPE_SET_PRESELECT_NAFLAGS,
            &mut mask as *mut AuditMask as *mut libc::c_void,
        )
        .map_err(|source| Error::AuditConfigurationFailed {
            step: "set preselect non-attributable flags",
            source,
        })?;

        if let Err(err) = ioctl(&fd, AUDITPIPE_FLUSH, std::ptr::null_mut()) {
            log::warn!("could not flush audit pipe: {}", err);
        }

        log::info!(
            "audit pipe ready (queue limit {}, classes 0x{:08x})",
            queue_limit,
            SELECTION_CLASSES
        );
        Ok(AuditPipe { fd })
    }

    /// Read one audit record into a fresh buffer. Blocking; errors are
    /// non-fatal for the caller's loop.
    pub fn read_record(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; MAX_RECORD_LEN];
        let read = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };
        if read < 0 {
            return Err(Error::AuditRecordUnreadable(io::Error::last_os_error()));
        }
        buffer.truncate(read as usize);
        Ok(buffer)
    }
}

fn ioctl(fd: &OwnedFd, request: libc::c_ulong, arg: *mut libc::c_void) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, arg) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
