/// Named wall-clock timers that print human-readable timing lines.
///
/// `start` arms a timer, `log` prints `"<label>: <elapsed> <message>"` and
/// `end` prints `"<label>: <elapsed>"` and returns the elapsed time.
/// Elapsed time is read from `tokio::time::Instant` so paused-clock tests
/// get exact values.
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Where timing lines go: stdout, or an in-memory buffer in tests.
#[derive(Debug, Clone, Default)]
pub struct LineSink {
    captured: Option<Arc<Mutex<Vec<String>>>>,
}

impl LineSink {
    pub fn stdout() -> Self {
        Self { captured: None }
    }

    #[cfg(test)]
    pub fn capture() -> Self {
        Self {
            captured: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    #[cfg(test)]
    pub fn lines(&self) -> Vec<String> {
        match &self.captured {
            Some(buf) => buf.lock().unwrap().clone(),
            None => Vec::new(),
        }
    }

    pub fn line(&self, line: String) {
        match &self.captured {
            Some(buf) => {
                if let Ok(mut buf) = buf.lock() {
                    buf.push(line);
                }
            }
            None => println!("{line}"),
        }
    }
}

#[derive(Debug)]
pub struct Stopwatch {
    label: String,
    start: Instant,
    sink: LineSink,
}

impl Stopwatch {
    pub fn start(label: impl Into<String>, sink: &LineSink) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
            sink: sink.clone(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn log(&self, message: &str) {
        self.sink.line(format!(
            "{}: {} {}",
            self.label,
            format_elapsed(self.elapsed()),
            message
        ));
    }

    pub fn end(self) -> Duration {
        let elapsed = self.elapsed();
        self.sink
            .line(format!("{}: {}", self.label, format_elapsed(elapsed)));
        elapsed
    }
}

/// `123.456ms`, `1.234s`, `6:04.018 (m:ss.mmm)` or `1:02:03.456 (h:mm:ss.mmm)`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 1.0 {
        return format!("{:.3}ms", secs * 1_000.0);
    }
    if secs < 60.0 {
        return format!("{secs:.3}s");
    }

    let total_ms = elapsed.as_millis();
    let millis = total_ms % 1_000;
    let seconds = (total_ms / 1_000) % 60;
    let minutes = (total_ms / 60_000) % 60;
    let hours = total_ms / 3_600_000;
    if hours == 0 {
        format!("{minutes}:{seconds:02}.{millis:03} (m:ss.mmm)")
    } else {
        format!("{hours}:{minutes:02}:{seconds:02}.{millis:03} (h:mm:ss.mmm)")
    }
}

/// `30000` -> `30,000`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sub_second() {
        assert_eq!(format_elapsed(Duration::from_micros(123_456)), "123.456ms");
        assert_eq!(format_elapsed(Duration::ZERO), "0.000ms");
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_elapsed(Duration::from_millis(1_234)), "1.234s");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "59.999s");
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(
            format_elapsed(Duration::from_millis(6 * 60_000 + 4_018)),
            "6:04.018 (m:ss.mmm)"
        );
        assert_eq!(
            format_elapsed(Duration::from_secs(60)),
            "1:00.000 (m:ss.mmm)"
        );
    }

    #[test]
    fn test_format_hours() {
        assert_eq!(
            format_elapsed(Duration::from_millis(3_723_456)),
            "1:02:03.456 (h:mm:ss.mmm)"
        );
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(30_000), "30,000");
        assert_eq!(group_thousands(300_000), "300,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_and_end_lines() {
        let sink = LineSink::capture();
        let watch = Stopwatch::start("GLOBAL", &sink);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        watch.log("Iteration: 30,000");
        tokio::time::sleep(Duration::from_millis(500)).await;
        let total = watch.end();

        assert_eq!(total, Duration::from_secs(2));
        assert_eq!(
            sink.lines(),
            vec![
                "GLOBAL: 1.500s Iteration: 30,000".to_string(),
                "GLOBAL: 2.000s".to_string(),
            ]
        );
    }
}
