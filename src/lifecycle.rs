//! Lifecycle log records emitted by the proxy.

use std::fmt;
use std::panic::Location;
use std::path::Path;

use tracing::Level;

/// Name of the logger every lifecycle record is sent to.
pub const LOGGER_NAME: &str = "SqlConnectionProxy";

/// Category attached to every lifecycle record.
pub const CATEGORY: &str = "ConnectionProxy";

/// Where a proxy was created.
///
/// The file is kept as a base name only. `component` identifies the crate or
/// module that owns the call site and defaults to empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSite {
    pub component: Option<String>,
    pub file: String,
    pub line: u32,
}

impl CallSite {
    /// Build a call site from a source path and line.
    pub fn new(file: &str, line: u32) -> Self {
        let file = Path::new(file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            component: None,
            file,
            line,
        }
    }

    /// Capture the location of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line())
    }

    /// Attach the owning component's name.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }
}

/// Lifecycle transitions that get logged, with their severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Open,
    Close,
    Dispose,
}

impl LifecycleEvent {
    /// Numeric severity of the record. Higher is more important.
    pub fn severity(&self) -> u32 {
        match self {
            LifecycleEvent::Open => 50_000,
            LifecycleEvent::Close => 60_000,
            LifecycleEvent::Dispose => 70_000,
        }
    }

    /// `tracing` level the record is emitted at.
    ///
    /// Severities at or above 70000 are errors, at or above 60000 warnings,
    /// and everything below is informational.
    pub fn level(&self) -> Level {
        let severity = self.severity();
        if severity >= 70_000 {
            Level::ERROR
        } else if severity >= 60_000 {
            Level::WARN
        } else {
            Level::INFO
        }
    }

    /// Level name the record is tagged with.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Open => "SqlConnection.Open",
            LifecycleEvent::Close => "SqlConnection.Close",
            LifecycleEvent::Dispose => "SqlConnection.Dispose",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The message body of a lifecycle record.
///
/// Rendered as `<root><assembly>..</assembly><file>..</file><line>..</line></root>`
/// so existing log consumers keep parsing it.
#[derive(Debug, Clone, Copy)]
pub struct LogPayload<'a> {
    call_site: &'a CallSite,
}

impl<'a> LogPayload<'a> {
    pub fn new(call_site: &'a CallSite) -> Self {
        Self { call_site }
    }
}

impl fmt::Display for LogPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<root><assembly>{}</assembly><file>{}</file><line>{}</line></root>",
            escape(self.call_site.component.as_deref().unwrap_or_default()),
            escape(&self.call_site.file),
            self.call_site.line
        )
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Send one lifecycle record to the `SqlConnectionProxy` logger.
pub(crate) fn emit(event: LifecycleEvent, call_site: &CallSite, error: Option<&str>) {
    // `tracing::event!` needs a constant level.
    macro_rules! record {
        ($level:expr) => {
            tracing::event!(
                target: LOGGER_NAME,
                $level,
                category = CATEGORY,
                event = event.name(),
                severity = event.severity(),
                component = call_site.component.as_deref().unwrap_or_default(),
                file = call_site.file.as_str(),
                line = call_site.line,
                error = error,
                "{}",
                LogPayload::new(call_site)
            )
        };
    }

    let level = event.level();
    if level == Level::ERROR {
        record!(Level::ERROR)
    } else if level == Level::WARN {
        record!(Level::WARN)
    } else {
        record!(Level::INFO)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_site_keeps_base_name() {
        let site = CallSite::new("/src/app/handlers/orders.rs", 42);
        assert_eq!(site.file, "orders.rs");
        assert_eq!(site.line, 42);
        assert_eq!(site.component, None);
    }

    #[test]
    fn test_caller_location() {
        let site = CallSite::caller();
        assert_eq!(site.file, "lifecycle.rs");
        assert_eq!(site.line, line!() - 2);
    }

    #[test]
    fn test_severities_are_ordered() {
        assert_eq!(LifecycleEvent::Open.severity(), 50_000);
        assert_eq!(LifecycleEvent::Close.severity(), 60_000);
        assert_eq!(LifecycleEvent::Dispose.severity(), 70_000);
        assert_eq!(LifecycleEvent::Dispose.to_string(), "SqlConnection.Dispose");
    }

    #[test]
    fn test_levels_follow_severity() {
        assert_eq!(LifecycleEvent::Open.level(), Level::INFO);
        assert_eq!(LifecycleEvent::Close.level(), Level::WARN);
        assert_eq!(LifecycleEvent::Dispose.level(), Level::ERROR);

        let (captured, _guard) = capture::install();
        let site = CallSite::new("orders.rs", 7);
        emit(LifecycleEvent::Open, &site, None);
        emit(LifecycleEvent::Close, &site, None);
        emit(LifecycleEvent::Dispose, &site, None);

        let levels: Vec<String> = captured
            .records()
            .iter()
            .map(|record| record["level"].clone())
            .collect();
        assert_eq!(levels, ["INFO", "WARN", "ERROR"]);
    }

    #[test]
    fn test_payload_format() {
        let site = CallSite::new("orders.rs", 7).with_component("billing<svc>");
        assert_eq!(
            LogPayload::new(&site).to_string(),
            "<root><assembly>billing&lt;svc&gt;</assembly><file>orders.rs</file><line>7</line></root>"
        );

        let anonymous = CallSite::new("", 0);
        assert_eq!(
            LogPayload::new(&anonymous).to_string(),
            "<root><assembly></assembly><file></file><line>0</line></root>"
        );
    }

    #[test]
    fn test_emit_fields() {
        let (captured, _guard) = capture::install();
        let site = CallSite::new("orders.rs", 7).with_component("billing");

        emit(LifecycleEvent::Close, &site, None);

        let records = captured.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["event"], "SqlConnection.Close");
        assert_eq!(record["severity"], "60000");
        assert_eq!(record["category"], CATEGORY);
        assert_eq!(record["component"], "billing");
        assert_eq!(record["file"], "orders.rs");
        assert_eq!(record["line"], "7");
        assert!(!record.contains_key("error"));
        assert!(record["message"].contains("<file>orders.rs</file>"));
    }
}
