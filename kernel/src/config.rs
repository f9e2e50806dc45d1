//! Boot-time virtual memory configuration.
//!
//! Everything here is fixed once the kernel starts: frame count, TLB size,
//! replacement policy and paging mode. The kernel command line can override
//! the defaults with `key=value` pairs, e.g.
//! `memory=8K tlb=4 policy=lru paging=swap seed=7 log=trace`.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::error::Error;
use core::fmt::{self, Display, Formatter};
use core::str::FromStr;
use log::LevelFilter;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{digit1, multispace0, multispace1, one_of};
use nom::combinator::{all_consuming, map_res, opt};
use nom::multi::separated_list0;
use nom::sequence::{delimited, pair, separated_pair};
use nom::IResult;
use vmcore_shared::mem::{NUM_PHYS_PAGES, PAGE_SIZE, TLB_SIZE};
use vmcore_shared::sizes::{KB, MB};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplacementPolicyKind {
    #[default]
    Clock,
    Fifo,
    Lru,
    Random,
}

impl ReplacementPolicyKind {
    pub const fn name(self) -> &'static str {
        match self {
            ReplacementPolicyKind::Clock => "clock",
            ReplacementPolicyKind::Fifo => "fifo",
            ReplacementPolicyKind::Lru => "lru",
            ReplacementPolicyKind::Random => "random",
        }
    }
}

impl Display for ReplacementPolicyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReplacementPolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clock" => Ok(ReplacementPolicyKind::Clock),
            "fifo" => Ok(ReplacementPolicyKind::Fifo),
            "lru" => Ok(ReplacementPolicyKind::Lru),
            "random" => Ok(ReplacementPolicyKind::Random),
            _ => Err(ConfigError::InvalidValue {
                key: "policy",
                value: s.to_string(),
            }),
        }
    }
}

/// How user pages reach physical memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PagingMode {
    /// Every page is loaded when the process starts. Faults only refill the
    /// TLB from valid entries.
    Preload,
    /// Pages are loaded on first touch into free frames. Nothing is ever
    /// evicted, so the resident pages of all processes together never exceed
    /// the frame count.
    DemandLoading,
    /// Pages are loaded on first touch and evicted to swap when memory is full.
    #[default]
    Swap,
}

impl PagingMode {
    pub const fn name(self) -> &'static str {
        match self {
            PagingMode::Preload => "preload",
            PagingMode::DemandLoading => "demand",
            PagingMode::Swap => "swap",
        }
    }

    pub const fn demand_loads(self) -> bool {
        !matches!(self, PagingMode::Preload)
    }

    pub const fn evicts(self) -> bool {
        matches!(self, PagingMode::Swap)
    }
}

impl Display for PagingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PagingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preload" => Ok(PagingMode::Preload),
            "demand" => Ok(PagingMode::DemandLoading),
            "swap" => Ok(PagingMode::Swap),
            _ => Err(ConfigError::InvalidValue {
                key: "paging",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The command line is not a list of `key=value` pairs. `offset` is the
    /// byte position where parsing stopped.
    Syntax { offset: usize },
    UnknownKey(String),
    InvalidValue { key: &'static str, value: String },
    NoFrames,
    NoTlbSlots,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Syntax { offset } => write!(f, "malformed option at byte {offset}"),
            ConfigError::UnknownKey(key) => write!(f, "unknown option `{key}`"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for `{key}`")
            }
            ConfigError::NoFrames => write!(f, "physical memory holds no frames"),
            ConfigError::NoTlbSlots => write!(f, "TLB needs at least one slot"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    pub num_frames: usize,
    pub tlb_size: usize,
    pub policy: ReplacementPolicyKind,
    pub paging: PagingMode,
    pub random_seed: u64,
    pub log_level: LevelFilter,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            num_frames: NUM_PHYS_PAGES,
            tlb_size: TLB_SIZE,
            policy: ReplacementPolicyKind::default(),
            paging: PagingMode::default(),
            random_seed: 1,
            log_level: LevelFilter::Warn,
        }
    }
}

impl VmConfig {
    /// Defaults for a machine with `bytes` of physical memory.
    pub fn from_memory_size(bytes: usize) -> Result<Self, ConfigError> {
        let config = Self {
            num_frames: bytes / PAGE_SIZE,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Applies a kernel command line on top of the defaults.
    pub fn parse(cmdline: &str) -> Result<Self, ConfigError> {
        let options = match options(cmdline) {
            Ok((_, options)) => options,
            Err(nom::Err::Error(err) | nom::Err::Failure(err)) => {
                return Err(ConfigError::Syntax {
                    offset: cmdline.len() - err.input.len(),
                })
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(ConfigError::Syntax {
                    offset: cmdline.len(),
                })
            }
        };

        let mut config = Self::default();
        for (key, value) in options {
            config.apply(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "frames" => self.num_frames = number(value).ok_or_else(|| invalid("frames", value))?,
            "memory" => {
                self.num_frames =
                    memory_size(value).ok_or_else(|| invalid("memory", value))? / PAGE_SIZE;
            }
            "tlb" => self.tlb_size = number(value).ok_or_else(|| invalid("tlb", value))?,
            "seed" => self.random_seed = number(value).ok_or_else(|| invalid("seed", value))?,
            "policy" => self.policy = value.parse()?,
            "paging" => self.paging = value.parse()?,
            "log" => self.log_level = value.parse().map_err(|_| invalid("log", value))?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_frames == 0 {
            return Err(ConfigError::NoFrames);
        }
        if self.tlb_size == 0 {
            return Err(ConfigError::NoTlbSlots);
        }
        Ok(())
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

fn key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn value(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

fn options(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    all_consuming(delimited(
        multispace0,
        separated_list0(multispace1, separated_pair(key, tag("="), value)),
        multispace0,
    ))(input)
}

fn number<T: FromStr>(input: &str) -> Option<T> {
    let parsed: IResult<&str, T> = all_consuming(map_res(digit1, str::parse))(input);
    parsed.ok().map(|(_, n)| n)
}

/// A byte count with an optional `K` or `M` suffix.
fn memory_size(input: &str) -> Option<usize> {
    let parsed: IResult<&str, (usize, Option<char>)> =
        all_consuming(pair(map_res(digit1, str::parse), opt(one_of("KM"))))(input);
    let (_, (count, unit)) = parsed.ok()?;
    let scale = match unit {
        Some('K') => KB,
        Some('M') => MB,
        _ => 1,
    };
    count.checked_mul(scale)
}
