//! Configuration types for primenet-manager
//!
//! Settings are persisted as YAML using the same key names the GIMPS manager
//! scripts have always used (`UserName`, `Devices`, `Assignments`, ...), so an
//! existing settings file keeps working. Command line flags are applied on top
//! of the loaded settings by the binary, after which [`Settings::prepare`]
//! clamps values and resolves the per-device file paths.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest allowed polling delay, in hours
pub const MAX_POLL_HOURS: u64 = 120;

/// Lowest "will factor to" bit level accepted for trial factoring work
pub const MIN_TARGET_EXPONENT: u32 = 73;

/// Consecutive failed cycles tolerated in trial factoring mode before exiting
pub const DEFAULT_TF_MAX_FAILED_CYCLES: u32 = 10;

/// Which kind of GIMPS client the managed directories belong to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerMode {
    /// Trial factoring (mfakto/mfaktc): `Factor=` assignments, GPU72 or Primenet
    #[default]
    TrialFactoring,
    /// Lucas-Lehmer testing (clLucas): `Test=`/`DoubleCheck=` assignments, Primenet only
    LucasLehmer,
}

impl ManagerMode {
    /// Per-request HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        match self {
            ManagerMode::TrialFactoring => Duration::from_secs(30),
            ManagerMode::LucasLehmer => Duration::from_secs(10),
        }
    }

    /// Short tag used in log output
    pub fn tag(&self) -> &'static str {
        match self {
            ManagerMode::TrialFactoring => "TFMgr",
            ManagerMode::LucasLehmer => "LLMgr",
        }
    }

    /// File name of the submission ledger kept next to `results.txt`
    pub fn ledger_file_name(&self) -> &'static str {
        match self {
            ManagerMode::TrialFactoring => "results_sent.txt",
            ManagerMode::LucasLehmer => "result_sent.txt",
        }
    }
}

/// How many consecutive failed update cycles the orchestrator tolerates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Exit with a fatal error after this many consecutive failed cycles
    Bounded(u32),
    /// Keep retrying forever
    Unbounded,
}

/// Work type as written in the settings file
///
/// Trial factoring uses a GPU72 name (`lltf`/`dctf`), Lucas-Lehmer uses a
/// numeric Primenet preference code (`100`, `101`, `102`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkType {
    /// Numeric Primenet work preference
    Code(u32),
    /// Named GPU72 work type
    Name(String),
}

impl Default for WorkType {
    fn default() -> Self {
        WorkType::Name("lltf".to_string())
    }
}

impl WorkType {
    /// Primenet `pref` value for manual assignment requests
    pub fn primenet_pref(&self, mode: ManagerMode) -> u32 {
        match (mode, self) {
            // Trial factoring is always requested as code 2
            (ManagerMode::TrialFactoring, _) => 2,
            (ManagerMode::LucasLehmer, WorkType::Code(code)) => *code,
            (ManagerMode::LucasLehmer, WorkType::Name(name)) => name.parse().unwrap_or(101),
        }
    }

    /// GPU72 path segment (`lltf` or `dctf`)
    pub fn gpu72_kind(&self) -> &'static str {
        match self {
            WorkType::Name(name) if name == "dctf" => "dctf",
            _ => "lltf",
        }
    }
}

/// Paths of the files managed for one device
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileFiles {
    /// Work queue (`worktodo.txt`)
    pub todo: PathBuf,
    /// Results written by the client (`results.txt`)
    pub results: PathBuf,
    /// Append-only submission ledger (`results_sent.txt`, or
    /// `result_sent.txt` for Lucas-Lehmer)
    pub sent: PathBuf,
}

impl ProfileFiles {
    /// Derive the trial factoring file triple from a work directory
    pub fn in_dir(dir: &Path) -> Self {
        Self::for_mode(dir, ManagerMode::TrialFactoring)
    }

    /// Derive the file triple for `mode` from a work directory
    pub fn for_mode(dir: &Path, mode: ManagerMode) -> Self {
        Self {
            todo: dir.join("worktodo.txt"),
            results: dir.join("results.txt"),
            sent: dir.join(mode.ledger_file_name()),
        }
    }
}

/// One managed client installation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// OpenCL device number (informational, used in log output)
    #[serde(rename = "Device", default)]
    pub device: u32,

    /// Directory holding worktodo.txt and results.txt
    #[serde(rename = "Directory", default = "default_workdir")]
    pub workdir: PathBuf,

    /// Work type to request
    #[serde(rename = "WorkType", default)]
    pub work_type: WorkType,

    /// GPU72 work option name (trial factoring only)
    #[serde(rename = "WorkOption", default = "default_work_option")]
    pub work_option: String,

    /// Minimum "will factor to" exponent (trial factoring only)
    #[serde(rename = "TargetExponent", default = "default_target")]
    pub target: u32,

    /// Number of assignments to keep cached in worktodo.txt
    #[serde(rename = "Assignments", default = "default_cache")]
    pub cache: usize,

    /// GPU thread count for the client. Stored and written back with the
    /// settings; the manager itself never reads it.
    #[serde(rename = "Threads", default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,

    /// Resolved file paths, filled in by [`Settings::prepare`]
    #[serde(skip)]
    pub files: ProfileFiles,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            device: 0,
            workdir: default_workdir(),
            work_type: WorkType::default(),
            work_option: default_work_option(),
            target: default_target(),
            cache: default_cache(),
            threads: None,
            files: ProfileFiles::in_dir(&default_workdir()),
        }
    }
}

impl DeviceProfile {
    /// Default profile for `mode`
    ///
    /// Lucas-Lehmer devices cache two assignments of Primenet work type 101.
    pub fn for_mode(mode: ManagerMode) -> Self {
        match mode {
            ManagerMode::TrialFactoring => Self::default(),
            ManagerMode::LucasLehmer => Self {
                work_type: WorkType::Code(101),
                cache: 2,
                files: ProfileFiles::for_mode(&default_workdir(), mode),
                ..Self::default()
            },
        }
    }

    /// A profile rooted at `dir` with resolved file paths and default parameters
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let workdir = dir.into();
        Self {
            files: ProfileFiles::in_dir(&workdir),
            workdir,
            ..Default::default()
        }
    }

    /// GPU72 numeric option code for the configured work option
    pub fn gpu72_option(&self) -> u32 {
        match self.work_option.as_str() {
            "lowest_tf_level" => 1,
            "highest_tf_level" => 2,
            "lowest_exponent" => 3,
            "oldest_exponent" => 4,
            "let_gpu72_decide" => 9,
            _ => 0,
        }
    }
}

/// Top-level settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Client family being managed
    #[serde(rename = "Mode", default)]
    pub mode: ManagerMode,

    /// Primenet user name
    #[serde(rename = "UserName", default)]
    pub username: String,

    /// Primenet password
    #[serde(rename = "Password", default)]
    pub password: String,

    /// GPU72 user name
    #[serde(rename = "GPU72UserName", default)]
    pub gpu72_username: String,

    /// GPU72 password
    #[serde(rename = "GPU72Password", default)]
    pub gpu72_password: String,

    /// Hours between update cycles; 0 runs a single cycle and exits
    #[serde(rename = "Poll", default = "default_poll_hours")]
    pub poll_hours: u64,

    /// Append log output to this file instead of stderr
    #[serde(rename = "Logs", default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Consecutive failed cycles before exiting; 0 retries forever.
    /// Absent means the mode default.
    #[serde(
        rename = "MaxFailedCycles",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_failed_cycles: Option<u32>,

    /// Wait after a failed login or device update
    #[serde(
        rename = "BackoffSeconds",
        default = "default_backoff",
        with = "duration_serde"
    )]
    pub backoff: Duration,

    /// Managed devices, updated in this order
    #[serde(rename = "Devices", default = "default_devices")]
    pub devices: Vec<DeviceProfile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: ManagerMode::default(),
            username: String::new(),
            password: String::new(),
            gpu72_username: String::new(),
            gpu72_password: String::new(),
            poll_hours: default_poll_hours(),
            log_file: None,
            max_failed_cycles: None,
            backoff: default_backoff(),
            devices: default_devices(),
        }
    }
}

impl Settings {
    /// Default settings for `mode`
    ///
    /// Lucas-Lehmer polls every 12 hours and uses [`DeviceProfile::for_mode`]
    /// for its device.
    pub fn for_mode(mode: ManagerMode) -> Self {
        match mode {
            ManagerMode::TrialFactoring => Self::default(),
            ManagerMode::LucasLehmer => Self {
                mode,
                poll_hours: 12,
                devices: vec![DeviceProfile::for_mode(mode)],
                ..Self::default()
            },
        }
    }

    /// Load settings from a YAML file
    ///
    /// `mode` applies when the file has no `Mode` key and picks the defaults
    /// for absent values. A missing file yields the defaults for `mode`. A
    /// file that cannot be parsed is logged and also yields the defaults, so
    /// a typo never stops an unattended run from starting with flag-provided
    /// values.
    pub fn load(path: &Path, mode: ManagerMode) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::for_mode(mode));
            }
            Err(e) => return Err(Error::file(path, e)),
        };

        match Self::from_yaml_in_mode(&contents, mode) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "settings file unreadable, using defaults"
                );
                Ok(Self::for_mode(mode))
            }
        }
    }

    /// Parse settings from YAML text, trial factoring unless `Mode` says otherwise
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Self::from_yaml_in_mode(contents, ManagerMode::TrialFactoring)
    }

    /// Parse settings from YAML text with `mode` as the fallback mode
    ///
    /// Values the text leaves out (`Poll`, `Devices`, and per device
    /// `Assignments` and `WorkType`) take the defaults of the effective mode.
    pub fn from_yaml_in_mode(contents: &str, mode: ManagerMode) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(contents)?;
        let mut settings: Settings = match raw {
            serde_yaml::Value::Null => Self::for_mode(mode),
            _ => serde_yaml::from_value(raw.clone())?,
        };
        if raw.get("Mode").is_none() {
            settings.mode = mode;
        }

        let defaults = Self::for_mode(settings.mode);
        if raw.get("Poll").is_none() {
            settings.poll_hours = defaults.poll_hours;
        }
        match raw.get("Devices").and_then(serde_yaml::Value::as_sequence) {
            Some(entries) => {
                let device_defaults = DeviceProfile::for_mode(settings.mode);
                for (dev, entry) in settings.devices.iter_mut().zip(entries) {
                    if entry.get("Assignments").is_none() {
                        dev.cache = device_defaults.cache;
                    }
                    if entry.get("WorkType").is_none() {
                        dev.work_type = device_defaults.work_type.clone();
                    }
                }
            }
            None if raw.get("Devices").is_none() => settings.devices = defaults.devices,
            None => {}
        }
        Ok(settings)
    }

    /// Write settings to a YAML file, replacing it
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|e| Error::file(path, e))
    }

    /// Whether Primenet credentials are configured
    pub fn has_primenet(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Whether GPU72 credentials are configured
    pub fn has_gpu72(&self) -> bool {
        self.mode == ManagerMode::TrialFactoring
            && !self.gpu72_username.is_empty()
            && !self.gpu72_password.is_empty()
    }

    /// Delay between successful cycles, or `None` for single-shot mode
    pub fn poll_interval(&self) -> Option<Duration> {
        match self.poll_hours {
            0 => None,
            hours => Some(Duration::from_secs(hours * 3600)),
        }
    }

    /// Effective cycle retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        match (self.max_failed_cycles, self.mode) {
            (Some(0), _) => RetryPolicy::Unbounded,
            (Some(n), _) => RetryPolicy::Bounded(n),
            (None, ManagerMode::TrialFactoring) => {
                RetryPolicy::Bounded(DEFAULT_TF_MAX_FAILED_CYCLES)
            }
            (None, ManagerMode::LucasLehmer) => RetryPolicy::Unbounded,
        }
    }

    /// Validate, clamp and resolve derived values
    ///
    /// Must be called once after loading and applying overrides, before the
    /// settings are handed to the orchestrator.
    pub fn prepare(&mut self) -> Result<()> {
        let credentials_ok = match self.mode {
            ManagerMode::TrialFactoring => self.has_primenet() || self.has_gpu72(),
            ManagerMode::LucasLehmer => self.has_primenet(),
        };
        if !credentials_ok {
            return Err(Error::config(
                "UserName",
                "Primenet (or, for trial factoring, GPU72) credentials are required",
            ));
        }

        if self.devices.is_empty() {
            return Err(Error::config("Devices", "at least one device is required"));
        }

        if self.poll_hours > MAX_POLL_HOURS {
            debug!(
                poll_hours = self.poll_hours,
                max = MAX_POLL_HOURS,
                "clamping poll interval"
            );
            self.poll_hours = MAX_POLL_HOURS;
        }

        for dev in &mut self.devices {
            let dir = std::path::absolute(&dev.workdir).map_err(|e| {
                Error::config(
                    "Directory",
                    format!("cannot resolve {}: {}", dev.workdir.display(), e),
                )
            })?;
            dev.files = ProfileFiles::for_mode(&dir, self.mode);

            if self.mode == ManagerMode::TrialFactoring {
                dev.work_type = WorkType::Name(dev.work_type.gpu72_kind().to_string());
                dev.target = dev.target.max(MIN_TARGET_EXPONENT);
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_work_option() -> String {
    "what_makes_sense".to_string()
}

fn default_target() -> u32 {
    MIN_TARGET_EXPONENT
}

fn default_cache() -> usize {
    5
}

fn default_poll_hours() -> u64 {
    2
}

fn default_backoff() -> Duration {
    Duration::from_secs(120)
}

fn default_devices() -> Vec<DeviceProfile> {
    vec![DeviceProfile::default()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
