use once_cell::sync::OnceCell;
use tracing::debug;

pub const TAG: &str = "powerinfer-android";

// enum ggml_log_level
pub const GGML_LOG_LEVEL_ERROR: u32 = 2;
pub const GGML_LOG_LEVEL_WARN: u32 = 3;
pub const GGML_LOG_LEVEL_INFO: u32 = 4;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install the process-wide logger once.
///
/// On Android, tracing events fall through to the `log` facade and end up in
/// logcat via `android_logger`. Elsewhere a `tracing_subscriber` fmt layer is
/// used.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        #[cfg(target_os = "android")]
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(max_level())
                .with_tag(TAG),
        );

        #[cfg(not(target_os = "android"))]
        {
            // Use DEBUG level for debug builds, INFO for release builds
            let _ = tracing_subscriber::fmt()
                .with_max_level(if cfg!(debug_assertions) {
                    tracing::Level::DEBUG
                } else {
                    tracing::Level::INFO
                })
                .with_ansi(!cfg!(windows))
                .with_target(false)
                .compact()
                .try_init();
        }
    });

    debug!("Logging initialized");
}

#[cfg(target_os = "android")]
fn max_level() -> log::LevelFilter {
    if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    }
}

pub fn ggml_level(level: u32) -> log::Level {
    match level {
        GGML_LOG_LEVEL_ERROR => log::Level::Error,
        GGML_LOG_LEVEL_WARN => log::Level::Warn,
        GGML_LOG_LEVEL_INFO => log::Level::Info,
        _ => log::Level::Debug,
    }
}

/// Forward one line printed by the native library.
pub fn forward_native_log(level: u32, text: &str) {
    let text = text.trim_end_matches('\n');
    if text.is_empty() {
        return;
    }
    log::log!(target: "llama", ggml_level(level), "{}", text);
}
