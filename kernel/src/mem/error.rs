use super::Vpn;
use core::error::Error;
use core::fmt::{self, Display, Formatter};

/// Failure to bring a page's content into a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// The executable segment backing the page could not be read.
    BackingUnavailable,
    /// The page is marked swap-resident but its swap slot could not be read.
    SwapUnavailable,
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::BackingUnavailable => write!(f, "backing segment unavailable"),
            LoadError::SwapUnavailable => write!(f, "swap slot unavailable"),
        }
    }
}

impl Error for LoadError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoremapError {
    /// Every frame is in use and eviction is disabled.
    OutOfFrames,
}

impl Display for CoremapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CoremapError::OutOfFrames => write!(f, "no free frame and eviction is disabled"),
        }
    }
}

impl Error for CoremapError {}

/// Outcome of a fault that cannot be resolved. Each variant terminates the
/// faulting process only; the kernel and other processes carry on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultError {
    /// The address has no page-table entry at all.
    AddressError { vaddr: usize },
    /// A write through a read-only mapping.
    ReadOnly { vaddr: usize },
    /// The page is invalid but the kernel runs without demand loading.
    NotResident { vpn: Vpn },
    /// Demand loading without swap ran out of physical frames.
    OutOfFrames,
    Load { vpn: Vpn, source: LoadError },
}

impl Display for FaultError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FaultError::AddressError { vaddr } => write!(f, "address error at {vaddr:#x}"),
            FaultError::ReadOnly { vaddr } => write!(f, "write to read-only page at {vaddr:#x}"),
            FaultError::NotResident { vpn } => write!(f, "page {vpn} is not resident"),
            FaultError::OutOfFrames => write!(f, "out of physical frames"),
            FaultError::Load { vpn, source } => write!(f, "failed to load page {vpn}: {source}"),
        }
    }
}

impl Error for FaultError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FaultError::Load { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<CoremapError> for FaultError {
    fn from(err: CoremapError) -> Self {
        match err {
            CoremapError::OutOfFrames => FaultError::OutOfFrames,
        }
    }
}
