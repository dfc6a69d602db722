use std::io::{self, Write};

use anstyle::{AnsiColor, Reset};
use klocks::{Lazy, SpinMutex};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// a simple logger
struct SimpleLogger {
    clog: LevelFilter,
    // 多个执行流同时打日志时，避免一行被截断
    line_lock: SpinMutex<()>,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.clog
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // 开头部分，即日志级别，如 `[ INFO]`
        let color = match record.level() {
            Level::Error => AnsiColor::Red,
            Level::Warn => AnsiColor::BrightYellow,
            Level::Info => AnsiColor::Blue,
            Level::Debug => AnsiColor::Green,
            Level::Trace => AnsiColor::BrightBlack,
        };
        let _guard = self.line_lock.lock();
        let mut stderr = io::stderr().lock();
        // 写 stderr 失败也没有更好的去处，忽略
        let _ = writeln!(
            stderr,
            "{}[{:>5}]{} {}",
            color.render_fg(),
            record.level(),
            Reset.render(),
            record.args(),
        );
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// initiate logger
///
/// 日志级别由环境变量 `VMM_CLOG` 决定，未设置时不输出。可以重复调用
pub fn init() {
    static LOGGER: Lazy<SimpleLogger> = Lazy::new(|| SimpleLogger {
        clog: parse_level(std::env::var("VMM_CLOG").ok().as_deref()),
        line_lock: SpinMutex::new(()),
    });

    // 已经有 logger 时 set_logger 会失败，此时保留原有的即可
    if log::set_logger(&*LOGGER).is_ok() {
        log::set_max_level(LOGGER.clog);
    }
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use super::parse_level;

    #[test]
    fn level_names() {
        assert_eq!(parse_level(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(parse_level(Some("WARN")), LevelFilter::Warn);
        assert_eq!(parse_level(Some("verbose")), LevelFilter::Off);
        assert_eq!(parse_level(None), LevelFilter::Off);
    }

    #[test]
    fn init_twice() {
        super::init();
        super::init();
        log::info!("logger initialized twice");
    }
}
