use tracing::info;

/// Receives device log text.
///
/// Called on the link's receive thread, once per LOG packet.
pub trait LogSink: Send + Sync {
    fn append(&self, text: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn append(&self, text: &str) {
        self(text)
    }
}

/// Forwards device log lines to `tracing` at info level.
#[derive(Debug, Clone)]
pub struct TracingLogSink {
    device: String,
}

impl TracingLogSink {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl LogSink for TracingLogSink {
    fn append(&self, text: &str) {
        for line in text.lines().filter(|line| !line.is_empty()) {
            info!(device = %self.device, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink: Arc<dyn LogSink> = {
            let seen = Arc::clone(&seen);
            Arc::new(move |text: &str| seen.lock().unwrap().push_str(text))
        };

        sink.append("hello ");
        sink.append("device");
        assert_eq!(seen.lock().unwrap().as_str(), "hello device");
    }

    #[test]
    fn tracing_sink_accepts_multiline_text() {
        TracingLogSink::new("dut").append("line one\n\nline two\n");
    }
}
