//! Timing and tracing, reproducing the original's external file formats
//! exactly, layered alongside `tracing` for ordinary structured logs.
//!
//! Grounded on `include/logger.h`'s `Logger` class: `startTimer`/`stopTimer`
//! accumulate into a named-event map and `writeTime` appends
//! whitespace-separated `"event duration"` lines to a file; `startTracer`/
//! `stopTracer` record per-thread coloured spans and `writeTrace` renders
//! one `<rect>` per span into a per-rank SVG file.

use std::collections::HashMap;
use std::io::Write;
use std::time::{Duration, Instant};

/// Accumulates named event durations and can write them to the
/// `"event duration"` log format used by the original `Logger::writeTime`.
#[derive(Default)]
pub struct Timer {
    started: HashMap<String, Instant>,
    totals: HashMap<String, Duration>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, event: &str) {
        self.started.insert(event.to_string(), Instant::now());
    }

    /// Stop the named event, accumulating its elapsed time. Returns the
    /// elapsed duration for this call (not the running total), mirroring
    /// `stopTimer`'s optional immediate-print behaviour via the `print`
    /// argument (handled by the caller through `tracing`).
    pub fn stop(&mut self, event: &str) -> Duration {
        let elapsed = self.started.remove(event).map(|t| t.elapsed()).unwrap_or_default();
        *self.totals.entry(event.to_string()).or_insert(Duration::ZERO) += elapsed;
        elapsed
    }

    pub fn reset(&mut self, event: &str) {
        self.totals.remove(event);
    }

    /// Write every accumulated event as a whitespace-separated
    /// `"event duration"` line (duration in seconds, matching the
    /// original's `double` seconds), one per line.
    pub fn write_time(&self, mut out: impl Write) -> std::io::Result<()> {
        for (event, dur) in &self.totals {
            writeln!(out, "{event} {:.6}", dur.as_secs_f64())?;
        }
        Ok(())
    }
}

/// One recorded span: a thread tag, a `[begin, end)` time window, and a
/// colour (an event-derived RGB triple), matching `include/logger.h`'s
/// trace queue entries.
#[derive(Clone, Copy, Debug)]
pub struct TraceSpan {
    pub thread: usize,
    pub begin: Duration,
    pub end: Duration,
    pub color: (u8, u8, u8),
}

/// Collects [`TraceSpan`]s and renders them as one `<rect>` per span into a
/// per-rank SVG file, matching `Logger::writeTrace`.
#[derive(Default)]
pub struct Tracer {
    base: Option<Instant>,
    spans: Vec<TraceSpan>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn base(&mut self) -> Instant {
        *self.base.get_or_insert_with(Instant::now)
    }

    pub fn record(&mut self, thread: usize, begin: Instant, end: Instant, color: (u8, u8, u8)) {
        let base = self.base();
        self.spans.push(TraceSpan {
            thread,
            begin: begin.saturating_duration_since(base),
            end: end.saturating_duration_since(base),
            color,
        });
    }

    /// Render the SVG trace for one rank, one `<rect>` per span, height 90,
    /// y offset `thread * 100`, x/width scaled from the recorded times.
    pub fn write_trace(&self, rank: i32, mut out: impl Write, scale: f64) -> std::io::Result<()> {
        writeln!(out, "<?xml version=\"1.0\" standalone=\"no\"?>")?;
        writeln!(out, "<svg xmlns=\"http://www.w3.org/2000/svg\" version=\"1.1\">")?;
        for span in &self.spans {
            let x = span.begin.as_secs_f64() * scale;
            let width = (span.end - span.begin).as_secs_f64() * scale;
            let y = span.thread as f64 * 100.0;
            let (r, g, b) = span.color;
            writeln!(
                out,
                "<rect x=\"{x:.3}\" y=\"{y:.3}\" width=\"{width:.3}\" height=\"90\" fill=\"#{r:02x}{g:02x}{b:02x}\"/>"
            )?;
        }
        writeln!(out, "</svg>")?;
        let _ = rank;
        Ok(())
    }
}
