//! Configuration map value
//!
//! One `EventConfig` lives in `CONFIG_MAP` for the whole load lifetime of the
//! pipeline. The kernel side only reads it; the agent writes it once before
//! attaching the entry program.

/// Argument slots carried by the in-flight record.
pub const MAX_ARGS: usize = 5;

/// Largest errno a hook may return (`MAX_ERRNO`).
pub const MAX_ERRNO: i32 = 4095;

pub const EPERM: i32 = 1;

/// Skip the OUTPUT stage after actions run.
pub const ACTION_NOPOST: u32 = 1 << 0;
/// Force the hook verdict to `EventConfig::override_error`.
pub const ACTION_OVERRIDE: u32 = 1 << 1;

/// How a raw hook argument is widened into the record.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum ArgType {
    #[default]
    None = 0,
    Int = 1,
    Uint = 2,
    Long = 3,
    Ulong = 4,
    Pointer = 5,
}

impl ArgType {
    pub const fn from_u8(v: u8) -> ArgType {
        match v {
            1 => ArgType::Int,
            2 => ArgType::Uint,
            3 => ArgType::Long,
            4 => ArgType::Ulong,
            5 => ArgType::Pointer,
            _ => ArgType::None,
        }
    }

    /// Widen a raw register-sized value. 32-bit signed values are
    /// sign-extended, unsigned ones zero-extended.
    pub const fn decode(self, raw: u64) -> i64 {
        match self {
            ArgType::None => 0,
            ArgType::Int => raw as u32 as i32 as i64,
            ArgType::Uint => raw as u32 as i64,
            ArgType::Long | ArgType::Ulong | ArgType::Pointer => raw as i64,
        }
    }
}

/// Argument access convention of the interception point.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFamily {
    /// BTF-typed trampoline arguments (LSM, fentry).
    Lsm = 0,
    /// Register-based arguments read from `pt_regs`.
    Kprobe = 1,
}

/// Verdict used when a stage cannot hand off control.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum FailPolicy {
    /// Let the operation proceed.
    #[default]
    Allow = 0,
    /// Deny with `EventConfig::fail_error`.
    Deny = 1,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventConfig {
    pub func_id: u32,
    pub fail_policy: u8,
    pub _pad: [u8; 3],
    pub arg_types: [u8; MAX_ARGS],
    pub _pad2: [u8; 3],
    pub action_flags: u32,
    pub override_error: i32,
    pub fail_error: i32,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EventConfig {
    pub const fn new(func_id: u32) -> Self {
        Self {
            func_id,
            fail_policy: FailPolicy::Allow as u8,
            _pad: [0; 3],
            arg_types: [ArgType::None as u8; MAX_ARGS],
            _pad2: [0; 3],
            action_flags: 0,
            override_error: 0,
            fail_error: -EPERM,
        }
    }

    pub fn arg_type(&self, index: usize) -> ArgType {
        match self.arg_types.get(index) {
            Some(&t) => ArgType::from_u8(t),
            None => ArgType::None,
        }
    }

    pub fn set_arg_type(&mut self, index: usize, ty: ArgType) {
        if let Some(slot) = self.arg_types.get_mut(index) {
            *slot = ty as u8;
        }
    }

    pub fn fail_policy(&self) -> FailPolicy {
        match self.fail_policy {
            1 => FailPolicy::Deny,
            _ => FailPolicy::Allow,
        }
    }

    /// Whether the OUTPUT stage runs after actions.
    pub fn posts(&self) -> bool {
        self.action_flags & ACTION_NOPOST == 0
    }

    pub fn overrides(&self) -> bool {
        self.action_flags & ACTION_OVERRIDE != 0
    }

    /// Verdict returned when a control transfer is withheld.
    pub fn fail_verdict(&self) -> i32 {
        match self.fail_policy() {
            FailPolicy::Allow => 0,
            FailPolicy::Deny if (-MAX_ERRNO..0).contains(&self.fail_error) => self.fail_error,
            FailPolicy::Deny => -EPERM,
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for EventConfig {}
