// process/bsm.rs - Audit record tokenization and lifecycle correlation
//
// One audit record is a sequence of self-describing binary tokens in
// network byte order. Tokens relevant to process lifecycle (header,
// path, subject, argument, exec-args, exit, trailer) are dispatched
// into a per-record ProcessEvent accumulator; recognized-but-irrelevant
// tokens are parsed for their length and skipped; an unparseable token
// abandons the whole record.
use crate::process::PidLookup;
use thiserror::Error;

// Token type ids.
const AUT_TRAILER: u8 = 0x13;
const AUT_HEADER32: u8 = 0x14;
const AUT_HEADER32_EX: u8 = 0x15;
const AUT_DATA: u8 = 0x21;
const AUT_PATH: u8 = 0x23;
const AUT_SUBJECT32: u8 = 0x24;
const AUT_PROCESS32: u8 = 0x26;
const AUT_RETURN32: u8 = 0x27;
const AUT_TEXT: u8 = 0x28;
const AUT_OPAQUE: u8 = 0x29;
const AUT_IN_ADDR: u8 = 0x2a;
const AUT_IPORT: u8 = 0x2c;
const AUT_ARG32: u8 = 0x2d;
const AUT_SEQ: u8 = 0x2f;
const AUT_NEWGROUPS: u8 = 0x3b;
const AUT_EXEC_ARGS: u8 = 0x3c;
const AUT_EXEC_ENV: u8 = 0x3d;
const AUT_ATTR32: u8 = 0x3e;
const AUT_EXIT: u8 = 0x52;
const AUT_ZONENAME: u8 = 0x60;
const AUT_ARG64: u8 = 0x71;
const AUT_RETURN64: u8 = 0x72;
const AUT_ATTR64: u8 = 0x73;
const AUT_HEADER64: u8 = 0x74;
const AUT_SUBJECT64: u8 = 0x75;
const AUT_PROCESS64: u8 = 0x77;
const AUT_HEADER64_EX: u8 = 0x79;
const AUT_SUBJECT32_EX: u8 = 0x7a;
const AUT_PROCESS32_EX: u8 = 0x7b;
const AUT_SUBJECT64_EX: u8 = 0x7c;
const AUT_PROCESS64_EX: u8 = 0x7d;
const AUT_SOCKINET32: u8 = 0x80;
const AUT_SOCKINET128: u8 = 0x81;
const AUT_IDENTITY: u8 = 0xed;

const TRAILER_MAGIC: u16 = 0xb105;

// Audit event numbers for the lifecycle classes we preselect.
pub(crate) const AUE_EXIT: u16 = 1;
pub(crate) const AUE_FORK: u16 = 2;
pub(crate) const AUE_EXEC: u16 = 7;
pub(crate) const AUE_EXECVE: u16 = 23;
pub(crate) const AUE_POSIX_SPAWN: u16 = 43196;

/// Token decode failures. Non-fatal: the record is abandoned silently
/// and the read loop moves on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token truncated at offset {0}")]
    Truncated(usize),
    #[error("unknown token type 0x{id:02x} at offset {offset}")]
    UnknownType { id: u8, offset: usize },
    #[error("bad trailer magic 0x{0:04x}")]
    BadTrailerMagic(u16),
    #[error("bad terminal address type {0}")]
    BadAddressType(u32),
}

/// Lifecycle phase of an accumulated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleMode {
    #[default]
    Unknown,
    Starting,
    Exiting,
}

/// Accumulator for one audit record, mutated token by token and handed
/// to the caller once the trailer finalizes it.
#[derive(Debug, Clone, Default)]
pub struct ProcessEvent {
    pub event_type: u16,
    pub pid: i32,
    pub ppid: i32,
    pub uid: u32,
    pub exit_status: u32,
    pub path: String,
    pub arguments: Vec<String>,
    pub mode: LifecycleMode,
}

/// One decoded token, reduced to what the correlator dispatches on.
#[derive(Debug)]
pub(crate) enum Token {
    Header { event_type: u16 },
    Path(String),
    Subject { pid: i32, euid: u32 },
    Arg { value: u64 },
    ExecArgs(Vec<String>),
    Exit { status: u32 },
    Trailer,
    /// Recognized type with no lifecycle relevance; consumed for length.
    Skipped,
}

/// Byte cursor over one record, network byte order.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], TokenError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(TokenError::Truncated(self.pos))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, TokenError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TokenError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, TokenError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, TokenError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// u16-length-prefixed string; the length covers a trailing NUL.
    fn counted_string(&mut self) -> Result<String, TokenError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        let text = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    /// NUL-terminated string starting at the cursor.
    fn cstring(&mut self) -> Result<String, TokenError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(TokenError::Truncated(self.pos))?;
        let text = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(text)
    }

    /// Terminal-id address: a type word followed by 4 or 16 address
    /// bytes, as used by the extended header/subject/process tokens.
    fn terminal_address(&mut self) -> Result<(), TokenError> {
        let addr_type = self.u32()?;
        match addr_type {
            4 => self.take(4).map(|_| ()),
            16 => self.take(16).map(|_| ()),
            other => Err(TokenError::BadAddressType(other)),
        }
    }
}

/// Decode the next token at the cursor.
pub(crate) fn fetch_token(reader: &mut Reader<'_>) -> Result<Token, TokenError> {
    let offset = reader.pos;
    let id = reader.u8()?;
    match id {
        AUT_HEADER32 => {
            let _len = reader.u32()?;
            let _version = reader.u8()?;
            let event_type = reader.u16()?;
            let _modifier = reader.u16()?;
            reader.take(8)?; // seconds + milliseconds
            Ok(Token::Header { event_type })
        }
        AUT_HEADER32_EX => {
            let _len = reader.u32()?;
            let _version = reader.u8()?;
            let event_type = reader.u16()?;
            let _modifier = reader.u16()?;
            reader.terminal_address()?;
            reader.take(8)?;
            Ok(Token::Header { event_type })
        }
        AUT_HEADER64 => {
            let _len = reader.u32()?;
            let _version = reader.u8()?;
            let event_type = reader.u16()?;
            let _modifier = reader.u16()?;
            reader.take(16)?; // 64-bit seconds + milliseconds
            Ok(Token::Header { event_type })
        }
        AUT_HEADER64_EX => {
            let _len = reader.u32()?;
            let _version = reader.u8()?;
            let event_type = reader.u16()?;
            let _modifier = reader.u16()?;
            reader.terminal_address()?;
            reader.take(16)?;
            Ok(Token::Header { event_type })
        }
        AUT_TRAILER => {
            let magic = reader.u16()?;
            if magic != TRAILER_MAGIC {
                return Err(TokenError::BadTrailerMagic(magic));
            }
            let _len = reader.u32()?;
            Ok(Token::Trailer)
        }
        AUT_PATH => Ok(Token::Path(reader.counted_string()?)),
        AUT_SUBJECT32 | AUT_SUBJECT64 | AUT_SUBJECT32_EX | AUT_SUBJECT64_EX => {
            let _auid = reader.u32()?;
            let euid = reader.u32()?;
            let _egid = reader.u32()?;
            let _ruid = reader.u32()?;
            let _rgid = reader.u32()?;
            let pid = reader.u32()? as i32;
            let _sid = reader.u32()?;
            match id {
                AUT_SUBJECT32 => {
                    reader.take(8)?; // 32-bit port + machine address
                }
                AUT_SUBJECT64 => {
                    reader.take(12)?; // 64-bit port + machine address
                }
                AUT_SUBJECT32_EX => {
                    reader.take(4)?;
                    reader.terminal_address()?;
                }
                _ => {
                    reader.take(8)?;
                    reader.terminal_address()?;
                }
            }
            Ok(Token::Subject { pid, euid })
        }
        AUT_PROCESS32 | AUT_PROCESS64 | AUT_PROCESS32_EX | AUT_PROCESS64_EX => {
            reader.take(28)?; // auid..sid
            match id {
                AUT_PROCESS32 => reader.take(8).map(|_| ())?,
                AUT_PROCESS64 => reader.take(12).map(|_| ())?,
                AUT_PROCESS32_EX => {
                    reader.take(4)?;
                    reader.terminal_address()?;
                }
                _ => {
                    reader.take(8)?;
                    reader.terminal_address()?;
                }
            }
            Ok(Token::Skipped)
        }
        AUT_ARG32 => {
            let _num = reader.u8()?;
            let value = u64::from(reader.u32()?);
            let _text = reader.counted_string()?;
            Ok(Token::Arg { value })
        }
        AUT_ARG64 => {
            let _num = reader.u8()?;
            let value = reader.u64()?;
            let _text = reader.counted_string()?;
            Ok(Token::Arg { value })
        }
        AUT_EXEC_ARGS => {
            let count = reader.u32()?;
            let mut arguments = Vec::new();
            for _ in 0..count {
                arguments.push(reader.cstring()?);
            }
            Ok(Token::ExecArgs(arguments))
        }
        AUT_EXEC_ENV => {
            let count = reader.u32()?;
            for _ in 0..count {
                reader.cstring()?;
            }
            Ok(Token::Skipped)
        }
        AUT_EXIT => {
            let status = reader.u32()?;
            let _retval = reader.u32()?;
            Ok(Token::Exit { status })
        }
        AUT_RETURN32 => {
            let _errno = reader.u8()?;
            let _retval = reader.u32()?;
            Ok(Token::Skipped)
        }
        AUT_RETURN64 => {
            let _errno = reader.u8()?;
            let _retval = reader.u64()?;
            Ok(Token::Skipped)
        }
        AUT_ATTR32 => {
            reader.take(28)?; // mode, uid, gid, fsid, node id (u64), device
            Ok(Token::Skipped)
        }
        AUT_ATTR64 => {
            reader.take(32)?;
            Ok(Token::Skipped)
        }
        AUT_TEXT | AUT_ZONENAME => {
            reader.counted_string()?;
            Ok(Token::Skipped)
        }
        AUT_OPAQUE => {
            let len = reader.u16()? as usize;
            reader.take(len)?;
            Ok(Token::Skipped)
        }
        AUT_IN_ADDR => reader.take(4).map(|_| Token::Skipped),
        AUT_IPORT => reader.take(2).map(|_| Token::Skipped),
        AUT_SEQ => reader.take(4).map(|_| Token::Skipped),
        AUT_DATA => {
            let _print = reader.u8()?;
            let unit_type = reader.u8()?;
            let count = reader.u8()? as usize;
            let unit = match unit_type {
                0 => 1,
                1 => 2,
                2 => 4,
                3 => 8,
                _ => return Err(TokenError::Truncated(offset)),
            };
            reader.take(unit * count)?;
            Ok(Token::Skipped)
        }
        AUT_NEWGROUPS => {
            let count = reader.u16()? as usize;
            reader.take(count * 4)?;
            Ok(Token::Skipped)
        }
        AUT_SOCKINET32 => reader.take(8).map(|_| Token::Skipped),
        AUT_SOCKINET128 => reader.take(20).map(|_| Token::Skipped),
        AUT_IDENTITY => {
            let _signer_type = reader.u32()?;
            reader.counted_string()?; // signing id
            let _signing_id_truncated = reader.u8()?;
            reader.counted_string()?; // team id
            let _team_id_truncated = reader.u8()?;
            let cdhash_len = reader.u16()? as usize;
            reader.take(cdhash_len)?;
            Ok(Token::Skipped)
        }
        _ => Err(TokenError::UnknownType { id, offset }),
    }
}

fn is_lifecycle(event_type: u16) -> bool {
    matches!(
        event_type,
        AUE_EXEC | AUE_EXECVE | AUE_FORK | AUE_POSIX_SPAWN | AUE_EXIT
    )
}

/// Folds token streams into process start/exit events.
///
/// Holds the one piece of cross-record state: a copy of the most recent
/// finalized fork event, used to correct the parent pid of a subsequent
/// exec of the same child when the generic parent lookup raced the fork.
pub struct Correlator<L: PidLookup> {
    lookup: L,
    last_fork: Option<ProcessEvent>,
}

impl<L: PidLookup> Correlator<L> {
    pub fn new(lookup: L) -> Self {
        Correlator {
            lookup,
            last_fork: None,
        }
    }

    /// Process one raw audit record. Returns the finalized event when
    /// the record was a lifecycle record; None when it was abandoned
    /// (token parse failure) or carried a non-lifecycle event type.
    pub fn fold_record(&mut self, record: &[u8]) -> Option<ProcessEvent> {
        let mut reader = Reader::new(record);
        let mut event = ProcessEvent::default();

        while !reader.is_empty() {
            let token = match fetch_token(&mut reader) {
                Ok(token) => token,
                Err(err) => {
                    log::debug!("abandoning audit record: {}", err);
                    return None;
                }
            };
            self.apply(&mut event, token);
        }

        match event.mode {
            LifecycleMode::Unknown => None,
            _ => Some(event),
        }
    }

    fn apply(&mut self, event: &mut ProcessEvent, token: Token) {
        match token {
            Token::Header { event_type } => event.event_type = event_type,
            // Path hint; the trailer re-resolves authoritatively.
            Token::Path(path) => event.path = path,
            Token::Subject { pid, euid } => {
                match event.event_type {
                    AUE_POSIX_SPAWN => {
                        if event.pid == 0 {
                            event.pid = pid;
                            event.ppid = self.lookup.parent_of(pid);
                        } else {
                            // Child pid already arrived via the argument
                            // token; the subject is the spawning parent.
                            event.ppid = pid;
                        }
                    }
                    // Fork records audit the parent as subject; the
                    // child pid arrives via the argument token.
                    AUE_FORK => event.ppid = pid,
                    _ => {
                        event.pid = pid;
                        event.ppid = self.lookup.parent_of(pid);
                    }
                }
                event.uid = euid;
            }
            Token::Arg { value } => {
                if matches!(event.event_type, AUE_POSIX_SPAWN | AUE_FORK) {
                    event.pid = value as i32;
                    if event.event_type == AUE_FORK {
                        // Fork records carry no path token.
                        event.path = self.lookup.path_of(event.pid);
                    }
                }
            }
            Token::ExecArgs(arguments) => event.arguments = arguments,
            Token::Exit { status } => event.exit_status = status,
            Token::Trailer => self.finalize(event),
            Token::Skipped => {}
        }
    }

    fn finalize(&mut self, event: &mut ProcessEvent) {
        if !is_lifecycle(event.event_type) {
            return;
        }

        if event.event_type == AUE_EXIT {
            event.mode = LifecycleMode::Exiting;
            return;
        }

        event.path = self.lookup.path_of(event.pid);
        // An empty lookup or a device-node placeholder means the kernel
        // no longer knows the image; argv[0] is the best remaining hint.
        if (event.path.is_empty() || event.path.starts_with("/dev/"))
            && !event.arguments.is_empty()
        {
            event.path = event.arguments[0].clone();
        }

        if event.event_type == AUE_FORK {
            self.last_fork = Some(event.clone());
        } else if event.ppid != 0 {
            if let Some(fork) = &self.last_fork {
                if fork.pid == event.pid {
                    event.ppid = fork.ppid;
                }
            }
        }

        event.mode = LifecycleMode::Starting;
    }

    /// Blocking read loop over the audit pipe. Unreadable records are
    /// retried on the next pass; abandoned records emit nothing. Never
    /// returns; cancellation is external.
    pub fn run<F>(&mut self, pipe: &crate::process::AuditPipe, mut on_event: F) -> crate::error::Result<()>
    where
        F: FnMut(&ProcessEvent),
    {
        loop {
            match pipe.read_record() {
                Ok(record) => {
                    if let Some(event) = self.fold_record(&record) {
                        on_event(&event);
                    }
                }
                Err(err) => {
                    log::debug!("{}", err);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::process::PidLookup;
    use std::collections::HashMap;

    /// Fixed-answer lookup for correlator tests.
    #[derive(Default)]
    pub struct MockLookup {
        pub parents: HashMap<i32, i32>,
        pub paths: HashMap<i32, String>,
    }

    impl PidLookup for MockLookup {
        fn parent_of(&self, pid: i32) -> i32 {
            self.parents.get(&pid).copied().unwrap_or(0)
        }

        fn path_of(&self, pid: i32) -> String {
            self.paths.get(&pid).cloned().unwrap_or_default()
        }
    }

    pub fn header32(event_type: u16) -> Vec<u8> {
        let mut t = vec![AUT_HEADER32];
        t.extend_from_slice(&0u32.to_be_bytes()); // record length, unread
        t.push(11); // version
        t.extend_from_slice(&event_type.to_be_bytes());
        t.extend_from_slice(&0u16.to_be_bytes()); // modifier
        t.extend_from_slice(&0u32.to_be_bytes()); // seconds
        t.extend_from_slice(&0u32.to_be_bytes()); // milliseconds
        t
    }

    pub fn subject32(pid: i32, euid: u32) -> Vec<u8> {
        let mut t = vec![AUT_SUBJECT32];
        t.extend_from_slice(&0u32.to_be_bytes()); // auid
        t.extend_from_slice(&euid.to_be_bytes());
        for _ in 0..3 {
            t.extend_from_slice(&0u32.to_be_bytes()); // egid, ruid, rgid
        }
        t.extend_from_slice(&(pid as u32).to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes()); // session id
        t.extend_from_slice(&0u32.to_be_bytes()); // terminal port
        t.extend_from_slice(&0u32.to_be_bytes()); // terminal address
        t
    }

    pub fn arg32(value: u32, text: &str) -> Vec<u8> {
        let mut t = vec![AUT_ARG32, 0];
        t.extend_from_slice(&value.to_be_bytes());
        t.extend_from_slice(&((text.len() + 1) as u16).to_be_bytes());
        t.extend_from_slice(text.as_bytes());
        t.push(0);
        t
    }

    pub fn path_token(path: &str) -> Vec<u8> {
        let mut t = vec![AUT_PATH];
        t.extend_from_slice(&((path.len() + 1) as u16).to_be_bytes());
        t.extend_from_slice(path.as_bytes());
        t.push(0);
        t
    }

    pub fn exec_args(args: &[&str]) -> Vec<u8> {
        let mut t = vec![AUT_EXEC_ARGS];
        t.extend_from_slice(&(args.len() as u32).to_be_bytes());
        for arg in args {
            t.extend_from_slice(arg.as_bytes());
            t.push(0);
        }
        t
    }

    pub fn exit_token(status: u32) -> Vec<u8> {
        let mut t = vec![AUT_EXIT];
        t.extend_from_slice(&status.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());
        t
    }

    pub fn return32(errno: u8, retval: u32) -> Vec<u8> {
        let mut t = vec![AUT_RETURN32, errno];
        t.extend_from_slice(&retval.to_be_bytes());
        t
    }

    pub fn trailer() -> Vec<u8> {
        let mut t = vec![AUT_TRAILER];
        t.extend_from_slice(&TRAILER_MAGIC.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());
        t
    }

    pub fn record(tokens: &[Vec<u8>]) -> Vec<u8> {
        tokens.concat()
    }
}
