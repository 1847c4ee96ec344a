//! Configuration for the generic LSM agent
//!
//! A TOML file names the hook, the argument schema, the selectors and the
//! actions. Any top-level key can be overridden from the environment with
//! the `LSMGATE_` prefix (`LSMGATE_DURATION=10s`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lsmgate_shared::config::{ACTION_NOPOST, ACTION_OVERRIDE, EPERM, MAX_ERRNO};
use lsmgate_shared::filter::{self, FilterMapValue, Matcher};
use lsmgate_shared::{ArgType, EventConfig, FailPolicy, MAX_ARGS};
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "LSMGATE";

/// One declared hook argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    /// Position in the hook's argument list
    pub index: u8,

    #[serde(rename = "type")]
    pub ty: ArgType,
}

/// What happens to a record the selectors accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Emit the record to userspace
    #[serde(default = "default_post")]
    pub post: bool,

    /// Force the hook to return this negative errno
    #[serde(default)]
    pub override_error: Option<i32>,
}

impl Default for ActionSpec {
    fn default() -> Self {
        Self {
            post: true,
            override_error: None,
        }
    }
}

fn default_post() -> bool {
    true
}

fn default_fail_error() -> i32 {
    -EPERM
}

fn default_duration() -> String {
    "30s".to_string()
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LSM hook name without the `bpf_lsm_` prefix (e.g. "file_open")
    pub hook: String,

    /// Identifier stamped on every record
    #[serde(default)]
    pub func_id: u32,

    /// Argument schema
    #[serde(default)]
    pub args: Vec<ArgSpec>,

    /// Matchers that must all hold for a record to be accepted
    #[serde(default)]
    pub selectors: Vec<Matcher>,

    #[serde(default)]
    pub actions: ActionSpec,

    /// Verdict policy when a stage cannot hand off control
    #[serde(default)]
    pub fail_policy: FailPolicy,

    /// Errno returned under the deny policy
    #[serde(default = "default_fail_error")]
    pub fail_error: i32,

    /// Kernel BTF file (default: discovered)
    #[serde(default)]
    pub btf: Option<PathBuf>,

    /// Compiled kernel object (default: the agent-ebpf build output)
    #[serde(default)]
    pub object: Option<PathBuf>,

    /// How long to stay attached (e.g. "30s", "5m")
    #[serde(default = "default_duration")]
    pub duration: String,

    /// Optional JSON output path
    #[serde(default)]
    pub json_output: Option<String>,
}

impl Config {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml));
        Self::build(builder).with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Parse TOML text, then apply environment overrides.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml));
        Self::build(builder).context("Failed to parse config")
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Parsed attach duration
    pub fn duration(&self) -> Result<Duration> {
        lsmgate_shared::utils::parse_duration(&self.duration)
            .with_context(|| format!("Invalid duration: {}", self.duration))
    }

    /// Configuration record written to `CONFIG_MAP`.
    pub fn event_config(&self) -> EventConfig {
        let mut config = EventConfig::new(self.func_id);
        for arg in &self.args {
            config.set_arg_type(arg.index as usize, arg.ty);
        }

        if !self.actions.post {
            config.action_flags |= ACTION_NOPOST;
        }
        if let Some(error) = self.actions.override_error {
            config.action_flags |= ACTION_OVERRIDE;
            config.override_error = error;
        }

        config.fail_policy = self.fail_policy as u8;
        config.fail_error = self.fail_error;
        config
    }

    /// Filter program written to `FILTER_MAP`.
    pub fn filter(&self) -> Result<FilterMapValue> {
        filter::encode(&self.selectors, &self.event_config()).context("Invalid selectors")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.hook.is_empty() {
            bail!("Hook name must not be empty");
        }
        if !self
            .hook
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!("Invalid hook name: {}", self.hook);
        }

        if self.args.len() > MAX_ARGS {
            bail!("At most {} arguments can be declared", MAX_ARGS);
        }
        let mut seen = HashSet::new();
        for arg in &self.args {
            if arg.index as usize >= MAX_ARGS {
                bail!("Argument index {} out of range (max {})", arg.index, MAX_ARGS - 1);
            }
            if arg.ty == ArgType::None {
                bail!("Argument {} declared without a type", arg.index);
            }
            if !seen.insert(arg.index) {
                bail!("Argument {} declared twice", arg.index);
            }
        }

        if let Some(error) = self.actions.override_error {
            if !is_errno(error) {
                bail!("Override error must be a negative errno, got {}", error);
            }
        }
        if self.fail_policy == FailPolicy::Deny && !is_errno(self.fail_error) {
            bail!("Fail error must be a negative errno, got {}", self.fail_error);
        }

        self.filter()?;

        if self.duration()?.is_zero() {
            bail!("Duration must be greater than 0");
        }

        Ok(())
    }
}

fn is_errno(v: i32) -> bool {
    (-MAX_ERRNO..0).contains(&v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsmgate_shared::filter::MatchOp;

    const FILE_OPEN: &str = r#"
        hook = "file_open"
        func_id = 3
        duration = "10s"

        [[args]]
        index = 0
        type = "pointer"

        [[args]]
        index = 1
        type = "int"

        [[selectors]]
        arg = 1
        op = "equal"
        value = -2

        [actions]
        post = false
        override_error = -13
    "#;

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml(FILE_OPEN).unwrap();

        assert_eq!(config.hook, "file_open");
        assert_eq!(config.args.len(), 2);
        assert_eq!(config.args[0].ty, ArgType::Pointer);
        assert_eq!(
            config.selectors,
            vec![Matcher {
                arg: 1,
                op: MatchOp::Equal,
                value: -2
            }]
        );
        assert_eq!(config.fail_policy, FailPolicy::Allow);
        assert_eq!(config.duration().unwrap(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_event_config() {
        let config = Config::from_toml(FILE_OPEN).unwrap();
        let event = config.event_config();

        assert_eq!(event.func_id, 3);
        assert_eq!(event.arg_type(1), ArgType::Int);
        assert_eq!(event.arg_type(2), ArgType::None);
        assert!(!event.posts());
        assert!(event.overrides());
        assert_eq!(event.override_error, -13);
        assert_eq!(event.fail_verdict(), 0);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml(r#"hook = "bprm_check_security""#).unwrap();

        assert_eq!(config.actions, ActionSpec::default());
        assert_eq!(config.fail_error, -EPERM);
        assert_eq!(config.duration, "30s");
        assert_eq!(config.filter().unwrap().matcher_count(), Some(0));
        assert!(config.event_config().posts());
    }

    #[test]
    fn test_rejects_bad_override() {
        let mut config = Config::from_toml(FILE_OPEN).unwrap();
        config.actions.override_error = Some(13);
        assert!(config.validate().is_err());

        config.actions.override_error = Some(-(MAX_ERRNO + 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_selector_on_undeclared_arg() {
        let mut config = Config::from_toml(FILE_OPEN).unwrap();
        config.selectors[0].arg = 3;
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("no type"));
    }

    #[test]
    fn test_rejects_bad_schema() {
        let mut config = Config::from_toml(FILE_OPEN).unwrap();
        config.args.push(ArgSpec {
            index: 1,
            ty: ArgType::Long,
        });
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(FILE_OPEN).unwrap();
        config.args[0].index = MAX_ARGS as u8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_hook_and_duration() {
        let mut config = Config::from_toml(FILE_OPEN).unwrap();
        config.hook = "file open".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(FILE_OPEN).unwrap();
        config.duration = "0s".to_string();
        assert!(config.validate().is_err());

        config.duration = "307445734561825861m".to_string();
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("overflows"));
    }

    #[test]
    fn test_deny_policy() {
        let mut config = Config::from_toml(FILE_OPEN).unwrap();
        config.fail_policy = FailPolicy::Deny;
        config.fail_error = -1;
        assert!(config.validate().is_ok());
        assert_eq!(config.event_config().fail_verdict(), -1);

        config.fail_error = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, FILE_OPEN).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.func_id, 3);

        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }
}
