use std::path::{Path, PathBuf};

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE_BASENAME: &str = "project-todo";
pub const LOG_FILE_SUFFIX: &str = "log";
pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const LOG_ROTATE_KEEP_FILES: usize = 10;

/// Log files live next to the data they describe, under `<data dir>/logs/`.
pub fn log_directory(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_DIR)
}

/// Log filter: `PROJECT_TODO_LOG`, then `RUST_LOG`, then a build-dependent default.
pub fn log_spec() -> String {
    let default_spec = if cfg!(debug_assertions) {
        "warn,project_todo_lib=debug"
    } else {
        "warn,project_todo_lib=info"
    };
    ["PROJECT_TODO_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_spec.to_string())
}

#[cfg(all(feature = "app", not(test)))]
pub fn init_logging(data_dir: &Path) -> Result<(), flexi_logger::FlexiLoggerError> {
    use flexi_logger::{
        detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming, WriteMode,
    };

    let dir = log_directory(data_dir);
    std::fs::create_dir_all(&dir)?;

    Logger::try_with_str(log_spec())?
        .log_to_file(
            FileSpec::default()
                .directory(&dir)
                .basename(LOG_FILE_BASENAME)
                .suffix(LOG_FILE_SUFFIX),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .format_for_files(detailed_format)
        .rotate(
            Criterion::Size(LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(if cfg!(debug_assertions) {
            Duplicate::Info
        } else {
            Duplicate::None
        })
        .start()?;

    install_panic_hook();

    log::info!(
        "logger initialized dir={} rotate_size_bytes={} keep_files={}",
        dir.display(),
        LOG_ROTATE_SIZE_BYTES,
        LOG_ROTATE_KEEP_FILES
    );
    Ok(())
}

#[cfg(all(feature = "app", not(test)))]
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info: &std::panic::PanicHookInfo<'_>| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("<non-string panic payload>");
        let location = info
            .location()
            .map(|loc| format!("{loc}"))
            .unwrap_or_else(|| "<unknown>".to_string());
        log::error!("panic: payload={payload} location={location}");
        default_hook(info);
    }));
}
