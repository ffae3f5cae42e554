pub mod config;
pub mod mcp_client;
pub mod router;
pub mod server;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Number of rotated log files kept next to the live one.
const LOG_FILES_KEPT: u32 = 3;

/// Return the platform-standard data directory for the router.
///
/// - macOS: `~/Library/Application Support/mcp-router/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-router\`
/// - Linux: `$XDG_DATA_HOME/mcp-router/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-router/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-router");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-router")
}

/// Initialize the tracing subscriber.
///
/// stdout belongs to the MCP protocol, so logs go to `router.log` in the
/// data directory. Existing logs are rotated first (router.log → .1 → .2 →
/// .3). If the file cannot be opened, logs go to stderr instead.
///
/// The filter comes from `RUST_LOG`, defaulting to `mcp_router=info,warn`.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    let log_path = log_dir.join("router.log");

    let (writer, log_file) = match open_log_file(&log_dir, &log_path) {
        Ok(file) => (BoxMakeWriter::new(FlushingWriter::new(file)), Some(log_path)),
        Err(e) => {
            eprintln!(
                "mcp-router: cannot open {} ({e}); logging to stderr",
                log_path.display()
            );
            (BoxMakeWriter::new(std::io::stderr), None)
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_router=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_file
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stderr".to_string()),
        pid = std::process::id(),
        "=== mcp-router starting ==="
    );
}

fn open_log_file(log_dir: &Path, log_path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::create_dir_all(log_dir)?;
    rotate_log_file(log_path, LOG_FILES_KEPT);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
}

/// Rotate log files: `router.log` → `router.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A file writer that flushes after every write, so log lines survive a
/// killed process.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
