use once_cell::sync::Lazy;
use std::path::PathBuf;
use tokio::sync::watch;

/// Progress reporter trait for acquisition operations.
/// Implementations forward updates to whatever surface the caller owns.
pub trait ProgressReporter: Send + Sync {
    /// Start a new step with optional total steps
    fn start_step(&self, name: &str, total_steps: Option<u32>);

    /// Update bytes transferred for download progress
    fn update_bytes(&self, transferred: u64, total: Option<u64>);

    /// Set overall percentage (0.0-100.0)
    fn set_percent(&self, percent: f64);

    /// Set a short status message
    fn set_message(&self, message: &str);

    /// Mark operation as complete
    fn done(&self, success: bool, message: Option<&str>);
}

/// A progress reporter that does nothing (silent).
/// Useful for background verification or tests.
pub struct SilentProgressReporter;

impl ProgressReporter for SilentProgressReporter {
    fn start_step(&self, _name: &str, _total_steps: Option<u32>) {}
    fn update_bytes(&self, _transferred: u64, _total: Option<u64>) {}
    fn set_percent(&self, _percent: f64) {}
    fn set_message(&self, _message: &str) {}
    fn done(&self, _success: bool, _message: Option<&str>) {}
}

/// Emits a percentage through a reporter only when it moved by at least
/// `threshold` points since the last emission. Never emits a lower value.
pub struct ProgressThrottle {
    last: std::sync::Mutex<Option<f64>>,
    threshold: f64,
}

impl ProgressThrottle {
    pub fn new(threshold: f64) -> Self {
        Self {
            last: std::sync::Mutex::new(None),
            threshold: threshold.max(0.0),
        }
    }

    /// Returns the value that was emitted, if any.
    pub fn report(&self, reporter: &dyn ProgressReporter, percent: f64) -> Option<f64> {
        let percent = percent.clamp(0.0, 100.0);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let emit = match *last {
            None => true,
            Some(prev) if percent <= prev => false,
            Some(prev) => percent - prev >= self.threshold || (percent >= 100.0 && prev < 100.0),
        };

        if emit {
            *last = Some(percent);
            reporter.set_percent(percent);
            Some(percent)
        } else {
            None
        }
    }
}

/// Sending half of a cancellation signal scoped to one logical operation.
#[derive(Clone)]
pub struct CancelHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken::new(self.tx.subscribe())
    }
}

/// Cancellation token wrapper
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Creates a linked handle/token pair.
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle {
                tx: std::sync::Arc::new(tx),
            },
            CancelToken { rx },
        )
    }

    /// A token that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Pending forever if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Installation specification
#[derive(Debug, Clone)]
pub struct InstallSpec {
    /// Minecraft version ID (e.g., "1.20.1"), or a loader profile id
    pub version_id: String,

    /// Root data directory holding versions/, libraries/, assets/ and natives/
    pub data_dir: PathBuf,
}

impl InstallSpec {
    pub fn new(version_id: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            version_id: version_id.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Get the root data directory
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Get the path to the libraries directory
    pub fn libraries_dir(&self) -> PathBuf {
        self.data_dir.join("libraries")
    }

    /// Get the path to the assets directory
    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }

    /// Get the path to the versions directory
    pub fn versions_dir(&self) -> PathBuf {
        self.data_dir.join("versions")
    }

    /// Get the path to the natives directory for this version
    pub fn natives_dir(&self) -> PathBuf {
        self.data_dir.join("natives").join(&self.version_id)
    }

    pub fn version_json_path(&self, id: &str) -> PathBuf {
        self.versions_dir().join(id).join(format!("{}.json", id))
    }

    pub fn version_jar_path(&self, id: &str) -> PathBuf {
        self.versions_dir().join(id).join(format!("{}.jar", id))
    }
}

/// Operating system families as named in descriptor rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsType {
    Windows,
    MacOS,
    Linux,
}

impl OsType {
    /// Detect the current OS
    pub fn current() -> Self {
        #[cfg(target_os = "windows")]
        return OsType::Windows;

        #[cfg(target_os = "macos")]
        return OsType::MacOS;

        #[cfg(target_os = "linux")]
        return OsType::Linux;

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        compile_error!("Unsupported operating system");
    }

    /// Get the OS name as a string (for rule matching)
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Windows => "windows",
            OsType::Linux => "linux",
            OsType::MacOS => "osx",
        }
    }

    /// Rule and natives keys use both "osx" and "macos" for the same platform.
    pub fn matches_key(&self, key: &str) -> bool {
        match self {
            OsType::MacOS => key == "osx" || key == "macos",
            other => key == other.as_str(),
        }
    }
}

/// Architecture types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    X64,
    Arm64,
    Arm32,
}

impl Arch {
    /// Detect the current architecture
    pub fn current() -> Self {
        #[cfg(target_arch = "x86")]
        return Arch::X86;

        #[cfg(target_arch = "x86_64")]
        return Arch::X64;

        #[cfg(target_arch = "aarch64")]
        return Arch::Arm64;

        #[cfg(target_arch = "arm")]
        return Arch::Arm32;

        #[cfg(not(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "arm"
        )))]
        compile_error!("Unsupported architecture");
    }

    /// Name used in `rules[].os.arch`
    pub fn rule_name(&self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
            Arch::Arm32 => "arm32",
        }
    }

    /// Value substituted for `${arch}` in native classifiers.
    pub fn bits(&self) -> &'static str {
        match self {
            Arch::X86 | Arch::Arm32 => "32",
            Arch::X64 | Arch::Arm64 => "64",
        }
    }
}

static OS_VERSION: Lazy<String> =
    Lazy::new(|| sysinfo::System::os_version().unwrap_or_default());

/// The platform rules and native classifiers are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: OsType,
    pub arch: Arch,
    pub os_version: String,
}

impl Platform {
    pub fn current() -> Self {
        Self {
            os: OsType::current(),
            arch: Arch::current(),
            os_version: OS_VERSION.clone(),
        }
    }

    pub fn new(os: OsType, arch: Arch) -> Self {
        Self {
            os,
            arch,
            os_version: String::new(),
        }
    }

    pub fn with_os_version(mut self, version: impl Into<String>) -> Self {
        self.os_version = version.into();
        self
    }
}
