use std::fs::OpenOptions;

use colored::Colorize;

fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Info => "green",
        log::Level::Warn => "yellow",
        log::Level::Error => "red",
        log::Level::Debug => "magenta",
        log::Level::Trace => "bright black",
    }
}

/// Installs the global logger: colored lines on stdout, plain lines appended
/// to `log_file`. Sweep and storage noise from dependencies is filtered.
pub fn setup(log_file: &str, console: bool) -> Result<(), fern::InitError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(fern::InitError::Io)?;

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Utc::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(fern::log_file(log_file)?);

    let mut dispatch = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .level_for("sqlx", log::LevelFilter::Warn)
        .level_for("hyper", log::LevelFilter::Off)
        .level_for("actix_server", log::LevelFilter::Info)
        .chain(file);

    if console {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "{}[{}][{}] {}",
                        chrono::Local::now().format("[%H:%M:%S]"),
                        record.target(),
                        record
                            .level()
                            .to_string()
                            .color(level_color(record.level())),
                        message
                    ))
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch.apply()?;
    Ok(())
}
