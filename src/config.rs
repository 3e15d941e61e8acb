//! Region configuration.
//!
//! # Environment Variables
//!
//! Read by [`RegionConfig::with_env_overrides`]:
//!
//! - `SCOREBOARD_DIR` - Directory holding the backing file
//! - `SCOREBOARD_LOCK_TIMEOUT_MS` - Default lock timeout in milliseconds
//!   (`0` waits forever)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::shm::layout::RecordLayout;

pub const ENV_DIR: &str = "SCOREBOARD_DIR";
pub const ENV_LOCK_TIMEOUT_MS: &str = "SCOREBOARD_LOCK_TIMEOUT_MS";

/// Distinguishes regions created by the same process.
static REGION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Where backing files live by default.
pub fn default_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        PathBuf::from("/dev/shm")
    } else {
        std::env::temp_dir().join("shm_scoreboard")
    }
}

/// Settings for creating a [`Region`](crate::Region).
///
/// Use the builder methods to customize, then pass to
/// [`Region::with_config`](crate::Region::with_config).
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Number of slots (default: 0, which `create` rejects)
    pub capacity: usize,
    /// Slot stride (default: one cache line per slot)
    pub layout: RecordLayout,
    /// Directory for the backing file (default: `/dev/shm` on Linux)
    pub dir: PathBuf,
    /// File name; generated from pid and a counter when unset
    pub name: Option<String>,
    /// Timeout used by `flush` and `snapshot` (default: wait forever)
    pub lock_timeout: Option<Duration>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            layout: RecordLayout::default(),
            dir: default_dir(),
            name: None,
            lock_timeout: None,
        }
    }
}

impl RegionConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_layout(mut self, layout: RecordLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Apply `SCOREBOARD_*` environment variables. Unparseable values are
    /// logged and ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(ENV_DIR) {
            if !dir.is_empty() {
                self.dir = PathBuf::from(dir);
            }
        }
        if let Ok(raw) = std::env::var(ENV_LOCK_TIMEOUT_MS) {
            match parse_timeout_ms(&raw) {
                Some(timeout) => self.lock_timeout = timeout,
                None => warn!(value = %raw, "ignoring invalid {ENV_LOCK_TIMEOUT_MS}"),
            }
        }
        self
    }

    /// Full path of the backing file. Generates and stores a name if none
    /// was set.
    pub(crate) fn resolve_path(&mut self) -> PathBuf {
        let name = self.name.get_or_insert_with(|| {
            let n = REGION_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("scoreboard_{}_{n}", std::process::id())
        });
        Path::new(&self.dir).join(format!("{name}.slots"))
    }
}

/// `Some(None)` means "no timeout".
fn parse_timeout_ms(raw: &str) -> Option<Option<Duration>> {
    match raw.trim().parse::<u64>().ok()? {
        0 => Some(None),
        ms => Some(Some(Duration::from_millis(ms))),
    }
}
