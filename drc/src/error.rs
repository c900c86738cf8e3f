use crate::region::AccessKind;

/// Status code reported to the host by engine entry points
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    /// Generic error
    Error = -1,
    /// Invalid configuration parameter
    InvalidConfig = -2,
    /// Invalid PC at runtime
    BadPc = -3,
    /// Host allocation failed
    OutOfMemory = -4,
    CompileError = -5,
    RuntimeError = -6,
    Okay = 0,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn of<T>(result: &Result<T, DrcError>) -> Status {
        match result {
            Ok(_) => Status::Okay,
            Err(err) => err.status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrcError {
    #[error("{0}")]
    Generic(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("bad program counter {0:#010x}")]
    BadPc(u32),
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),
    #[error("compile error at {pc:#010x}: {reason}")]
    Compile { pc: u32, reason: String },
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("unmapped {kind} access at {addr:#010x}")]
    Unmapped { kind: AccessKind, addr: u32 },
    #[error("{kind} access at {addr:#010x} crosses the end of its region")]
    Straddle { kind: AccessKind, addr: u32 },
}

impl DrcError {
    pub fn status(&self) -> Status {
        match self {
            DrcError::Generic(_) => Status::Error,
            DrcError::InvalidConfig(_) => Status::InvalidConfig,
            DrcError::BadPc(_) => Status::BadPc,
            DrcError::OutOfMemory(_) => Status::OutOfMemory,
            DrcError::Compile { .. } => Status::CompileError,
            DrcError::Runtime(_) => Status::RuntimeError,
            DrcError::Unmapped { kind: AccessKind::Fetch, .. } => Status::BadPc,
            DrcError::Unmapped { .. } => Status::RuntimeError,
            // An access that runs off the end of a region means the memory map doesn't describe
            // the hardware, which is a configuration problem.
            DrcError::Straddle { .. } => Status::InvalidConfig,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> DrcError {
        DrcError::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_host_interface() {
        assert_eq!(Status::Okay.code(), 0);
        assert_eq!(DrcError::Generic("x".into()).status().code(), -1);
        assert_eq!(DrcError::config("x").status().code(), -2);
        assert_eq!(DrcError::BadPc(0).status().code(), -3);
        assert_eq!(DrcError::OutOfMemory(1).status().code(), -4);
        assert_eq!(DrcError::Compile { pc: 0, reason: "x".into() }.status().code(), -5);
        assert_eq!(DrcError::Runtime("x".into()).status().code(), -6);
        assert_eq!(Status::of(&Ok::<(), DrcError>(())), Status::Okay);
    }

    #[test]
    fn region_faults() {
        let unmapped = DrcError::Unmapped { kind: AccessKind::Read32, addr: 0x1000 };
        assert_eq!(unmapped.status(), Status::RuntimeError);
        assert_eq!(unmapped.to_string(), "unmapped read32 access at 0x00001000");
        let straddle = DrcError::Straddle { kind: AccessKind::Write16, addr: 0xffff };
        assert_eq!(straddle.status(), Status::InvalidConfig);
    }
}
