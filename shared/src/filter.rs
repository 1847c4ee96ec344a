//! Filter program and evaluator
//!
//! The filter map holds a little-endian program: a `u32` matcher count
//! followed by 12-byte matchers `{arg: u8, op: u8, pad: u16, value: i64}`.
//! Every matcher must hold for the record to be accepted. When a matcher
//! needs an argument the record does not carry yet, evaluation stops with
//! `Continue` and the fetch stage materializes it before re-entering.

use crate::config::{ArgType, EventConfig, MAX_ARGS};
use crate::record::{MsgGenericLsm, NO_PENDING_ARG};

pub const FILTER_SIZE: usize = 4096;

/// Matchers evaluated per program; keeps the evaluator loop bounded.
pub const MAX_MATCHERS: usize = 16;

const HEADER_SIZE: usize = 4;
const MATCHER_SIZE: usize = 12;

/// Result of one evaluation hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Another argument must be fetched before deciding.
    Continue,
    Accept,
    Reject,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "snake_case"))]
pub enum MatchOp {
    Equal = 0,
    NotEqual = 1,
    Less = 2,
    Greater = 3,
    /// Any of the value's bits set in the argument.
    Mask = 4,
}

impl MatchOp {
    pub const fn from_u8(v: u8) -> Option<MatchOp> {
        match v {
            0 => Some(MatchOp::Equal),
            1 => Some(MatchOp::NotEqual),
            2 => Some(MatchOp::Less),
            3 => Some(MatchOp::Greater),
            4 => Some(MatchOp::Mask),
            _ => None,
        }
    }

    pub const fn holds(self, arg: i64, value: i64) -> bool {
        match self {
            MatchOp::Equal => arg == value,
            MatchOp::NotEqual => arg != value,
            MatchOp::Less => arg < value,
            MatchOp::Greater => arg > value,
            MatchOp::Mask => arg & value != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct Matcher {
    pub arg: u8,
    pub op: MatchOp,
    pub value: i64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FilterMapValue {
    pub buf: [u8; FILTER_SIZE],
}

impl Default for FilterMapValue {
    /// An empty program, which accepts everything.
    fn default() -> Self {
        Self {
            buf: [0; FILTER_SIZE],
        }
    }
}

impl core::fmt::Debug for FilterMapValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilterMapValue")
            .field("matchers", &self.matcher_count())
            .finish()
    }
}

impl FilterMapValue {
    /// Number of matchers, or `None` if the header exceeds `MAX_MATCHERS`.
    pub fn matcher_count(&self) -> Option<usize> {
        let count = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if count > MAX_MATCHERS {
            None
        } else {
            Some(count)
        }
    }

    pub fn matcher(&self, index: usize) -> Option<Matcher> {
        if index >= MAX_MATCHERS {
            return None;
        }
        let off = HEADER_SIZE + index * MATCHER_SIZE;
        let raw = self.buf.get(off..off + MATCHER_SIZE)?;
        let mut value = [0u8; 8];
        value.copy_from_slice(&raw[4..12]);
        Some(Matcher {
            arg: raw[0],
            op: MatchOp::from_u8(raw[1])?,
            value: i64::from_le_bytes(value),
        })
    }

    fn write_matcher(&mut self, index: usize, matcher: &Matcher) {
        let off = HEADER_SIZE + index * MATCHER_SIZE;
        self.buf[off] = matcher.arg;
        self.buf[off + 1] = matcher.op as u8;
        self.buf[off + 2..off + 4].copy_from_slice(&[0, 0]);
        self.buf[off + 4..off + 12].copy_from_slice(&matcher.value.to_le_bytes());
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for FilterMapValue {}

/// Evaluate `filter` against `msg`, resuming at the stored cursor.
///
/// A malformed program (oversized header, unknown op, argument outside the
/// configured schema) rejects.
pub fn evaluate(msg: &mut MsgGenericLsm, filter: &FilterMapValue, config: &EventConfig) -> FilterOutcome {
    let count = match filter.matcher_count() {
        Some(c) => c,
        None => return FilterOutcome::Reject,
    };

    let mut i = msg.filter.cursor as usize;
    for _ in 0..MAX_MATCHERS {
        if i >= count {
            break;
        }
        let m = match filter.matcher(i) {
            Some(m) => m,
            None => return FilterOutcome::Reject,
        };
        let idx = m.arg as usize;
        if idx >= MAX_ARGS || config.arg_type(idx) == ArgType::None {
            return FilterOutcome::Reject;
        }
        let arg = match msg.arg(idx) {
            Some(v) => v,
            None => {
                msg.filter.cursor = i as u16;
                msg.filter.pending = m.arg;
                return FilterOutcome::Continue;
            }
        };
        if !m.op.holds(arg, m.value) {
            return FilterOutcome::Reject;
        }
        i += 1;
    }

    msg.filter.cursor = i as u16;
    msg.filter.pending = NO_PENDING_ARG;
    if i >= count {
        FilterOutcome::Accept
    } else {
        FilterOutcome::Reject
    }
}

/// Rejected filter programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum FilterError {
    #[cfg_attr(
        feature = "std",
        error("{count} matchers exceed the limit of {}", MAX_MATCHERS)
    )]
    TooManyMatchers { count: usize },

    #[cfg_attr(feature = "std", error("matcher references argument {arg}, outside the record"))]
    ArgOutOfRange { arg: u8 },

    #[cfg_attr(feature = "std", error("matcher references argument {arg}, which has no type"))]
    UndeclaredArg { arg: u8 },
}

/// Serialize matchers into a filter map value, checked against the
/// argument schema the kernel side will use.
pub fn encode(matchers: &[Matcher], config: &EventConfig) -> Result<FilterMapValue, FilterError> {
    if matchers.len() > MAX_MATCHERS {
        return Err(FilterError::TooManyMatchers {
            count: matchers.len(),
        });
    }

    let mut value = FilterMapValue::default();
    for (i, m) in matchers.iter().enumerate() {
        if m.arg as usize >= MAX_ARGS {
            return Err(FilterError::ArgOutOfRange { arg: m.arg });
        }
        if config.arg_type(m.arg as usize) == ArgType::None {
            return Err(FilterError::UndeclaredArg { arg: m.arg });
        }
        value.write_matcher(i, m);
    }
    value.buf[..HEADER_SIZE].copy_from_slice(&(matchers.len() as u32).to_le_bytes());

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> EventConfig {
        let mut config = EventConfig::new(7);
        config.set_arg_type(0, ArgType::Int);
        config.set_arg_type(1, ArgType::Ulong);
        config
    }

    #[test]
    fn test_empty_filter_accepts() {
        let mut msg = MsgGenericLsm::default();
        let outcome = evaluate(&mut msg, &FilterMapValue::default(), &schema());
        assert_eq!(outcome, FilterOutcome::Accept);
    }

    #[test]
    fn test_continue_until_args_fetched() {
        let config = schema();
        let filter = encode(
            &[
                Matcher { arg: 1, op: MatchOp::Greater, value: 10 },
                Matcher { arg: 0, op: MatchOp::Equal, value: -2 },
            ],
            &config,
        )
        .unwrap();
        let mut msg = MsgGenericLsm::default();

        assert_eq!(evaluate(&mut msg, &filter, &config), FilterOutcome::Continue);
        assert_eq!(msg.pending_arg(), Some(1));
        msg.store_arg(1, 11);

        assert_eq!(evaluate(&mut msg, &filter, &config), FilterOutcome::Continue);
        assert_eq!(msg.pending_arg(), Some(0));
        assert_eq!(msg.filter.cursor, 1);
        msg.store_arg(0, -2);

        assert_eq!(evaluate(&mut msg, &filter, &config), FilterOutcome::Accept);
        assert_eq!(msg.pending_arg(), None);
    }

    #[test]
    fn test_mismatch_rejects() {
        let config = schema();
        let filter = encode(&[Matcher { arg: 0, op: MatchOp::Mask, value: 0x4 }], &config).unwrap();
        let mut msg = MsgGenericLsm::default();
        msg.store_arg(0, 0x3);
        assert_eq!(evaluate(&mut msg, &filter, &config), FilterOutcome::Reject);
    }

    #[test]
    fn test_malformed_programs_reject() {
        let config = schema();
        let mut msg = MsgGenericLsm::default();

        let mut oversized = FilterMapValue::default();
        oversized.buf[0] = (MAX_MATCHERS + 1) as u8;
        assert_eq!(evaluate(&mut msg, &oversized, &config), FilterOutcome::Reject);

        let mut bad_op = encode(&[Matcher { arg: 0, op: MatchOp::Equal, value: 1 }], &config).unwrap();
        bad_op.buf[HEADER_SIZE + 1] = 0x7f;
        assert_eq!(evaluate(&mut msg, &bad_op, &config), FilterOutcome::Reject);

        // Schema narrowed after the program was written
        let filter = encode(&[Matcher { arg: 1, op: MatchOp::Equal, value: 1 }], &config).unwrap();
        assert_eq!(
            evaluate(&mut msg, &filter, &EventConfig::new(7)),
            FilterOutcome::Reject
        );
    }

    #[test]
    fn test_encode_validation() {
        let config = schema();
        assert_eq!(
            encode(&[Matcher { arg: 2, op: MatchOp::Equal, value: 0 }], &config).unwrap_err(),
            FilterError::UndeclaredArg { arg: 2 }
        );
        assert_eq!(
            encode(&[Matcher { arg: 9, op: MatchOp::Equal, value: 0 }], &config).unwrap_err(),
            FilterError::ArgOutOfRange { arg: 9 }
        );
        let many = [Matcher { arg: 0, op: MatchOp::Equal, value: 0 }; MAX_MATCHERS + 1];
        assert_eq!(
            encode(&many, &config).unwrap_err(),
            FilterError::TooManyMatchers { count: MAX_MATCHERS + 1 }
        );
    }

    #[test]
    fn test_matcher_layout() {
        let config = schema();
        let filter = encode(&[Matcher { arg: 1, op: MatchOp::Less, value: -3 }], &config).unwrap();
        assert_eq!(&filter.buf[..4], &[1, 0, 0, 0]);
        assert_eq!(filter.buf[4], 1);
        assert_eq!(filter.buf[5], MatchOp::Less as u8);
        assert_eq!(&filter.buf[8..16], &(-3i64).to_le_bytes());
        assert_eq!(
            filter.matcher(0),
            Some(Matcher { arg: 1, op: MatchOp::Less, value: -3 })
        );
    }
}
