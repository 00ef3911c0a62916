use ecs_logger::extra_fields;
use log::warn;
use serde::Serialize;
use crate::config::settings::Logger;

#[derive(Serialize)]
pub struct LoggerExtraFields {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Request-scoped ECS extra fields. They are cleared when the guard drops, so
/// every return path of a handler leaves the global log context empty.
pub struct LogContext(());

impl LogContext {
    pub fn enter(request_id: &str, session_id: Option<&str>) -> Self {
        if let Err(e) = extra_fields::set_extra_fields(LoggerExtraFields {
            request_id: request_id.to_string(),
            session_id: session_id.map(str::to_string),
        }) {
            warn!("failed to set log context: {e}");
        }
        LogContext(())
    }
}

impl Drop for LogContext {
    fn drop(&mut self) {
        extra_fields::clear_extra_fields();
    }
}

pub fn level_filter(level: &str) -> log::LevelFilter {
    match level {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

pub fn setup_logger(logger: Option<&Logger>) {
    let log_level = level_filter(logger.map(|l| l.level.as_str()).unwrap_or("info"));

    env_logger::builder()
        .filter_level(log_level)
        .format_timestamp_micros()
        .format(ecs_logger::format)
        .target(env_logger::Target::Stdout)
        .init();
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use log::Log;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(data)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn ecs_line(logger: &env_logger::Logger, buf: &SharedBuf) -> String {
        buf.0.lock().unwrap().clear();
        logger.log(&log::Record::builder().args(format_args!("after request")).level(log::Level::Info).build());
        String::from_utf8(buf.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_log_context_is_cleared_on_early_return() {
        fn handle(fail: bool) -> Result<(), String> {
            let _log_context = LogContext::enter("req-early-return-7f3a", Some("sess-early-return-7f3a"));
            if fail {
                return Err("bad input".to_string());
            }
            Ok(())
        }

        let buf = SharedBuf::default();
        let logger = env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .format(ecs_logger::format)
            .target(env_logger::Target::Pipe(Box::new(buf.clone())))
            .build();

        assert!(handle(true).is_err());
        let line = ecs_line(&logger, &buf);
        assert!(line.contains("after request"));
        assert!(!line.contains("req-early-return-7f3a"));
        assert!(!line.contains("sess-early-return-7f3a"));

        assert!(handle(false).is_ok());
        assert!(!ecs_line(&logger, &buf).contains("req-early-return-7f3a"));
    }

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter("trace"), log::LevelFilter::Trace);
        assert_eq!(level_filter("warn"), log::LevelFilter::Warn);
        assert_eq!(level_filter("verbose"), log::LevelFilter::Info);
    }

    #[test]
    fn test_extra_fields_skip_missing_session() {
        let fields = LoggerExtraFields {
            request_id: "req-1".to_string(),
            session_id: None,
        };
        let value = serde_json::to_value(&fields).unwrap();
        assert_eq!(value, serde_json::json!({ "request_id": "req-1" }));
    }
}
