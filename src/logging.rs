use std::{fs, io};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B\[([0-9]{1,2}(;[0-9]{1,2})*)?[mK]").expect("valid ANSI escape regex")
});

/// Route the `log` facade to `<log_dir>/<name>.log`.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. stdout is left
/// alone because the editor protocol owns it.
pub fn init_logging(name: &str, config: &Config) -> io::Result<()> {
    let log_dir = config.log_dir();
    fs::create_dir_all(&log_dir)?;
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{name}.log")))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()
        .map_err(io::Error::other)
}

/// Clean ANSI escape sequences from text.
pub fn clean_ansi(input: &str) -> String {
    ANSI_ESCAPE.replace_all(input, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_colour_codes() {
        assert_eq!(
            clean_ansi("\x1B[32mSuccessfully generated html-report to => /r\x1B[0m"),
            "Successfully generated html-report to => /r"
        );
        assert_eq!(clean_ansi("plain"), "plain");
    }
}
