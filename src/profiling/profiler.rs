//! Span recording and trace output.

use std::borrow::Cow;
use std::path::Path;

#[cfg(feature = "profiling")]
mod enabled {
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Mutex, OnceLock};
    use std::time::Instant;

    use super::*;


    struct CompleteEvent {
        name: String,
        ts_us: u64,
        dur_us: u64,
        tid: u64,
        args: Vec<(&'static str, u64)>,
    }

    struct ProfilerState {
        start: Instant,
        out_path: PathBuf,
        is_on: AtomicBool,
        events: Mutex<Vec<CompleteEvent>>,
    }

    static STATE: OnceLock<ProfilerState> = OnceLock::new();
    static NEXT_TID: AtomicU64 = AtomicU64::new(1);

    thread_local! {
        static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    }

    fn now_us(state: &ProfilerState) -> u64 {
        state.start.elapsed().as_micros() as u64
    }

    /// Starts recording; events are written to `path` on shutdown.
    pub fn init<P: AsRef<Path>>(path: P) {
        let _ = STATE.set(ProfilerState {
            start: Instant::now(),
            out_path: path.as_ref().to_path_buf(),
            is_on: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        });
    }

    /// Stops recording and writes the trace file.
    pub fn shutdown() {
        if let Some(state) = STATE.get() {
            state.is_on.store(false, Ordering::Release);
            if let Err(e) = write_trace_file(state) {
                log::warn!("profiler failed to write {}: {e}", state.out_path.display());
            }
        }
    }

    fn write_trace_file(state: &ProfilerState) -> std::io::Result<()> {
        let events = match state.events.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        if let Some(parent) = state.out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut w = BufWriter::new(File::create(&state.out_path)?);

        write!(w, "{{\"traceEvents\":[")?;
        for (i, event) in events.iter().enumerate() {
            if i > 0 { write!(w, ",")?; }
            write!(w, "{{\"name\":")?;
            write_json_string(&mut w, &event.name)?;
            write!(
                w,
                ",\"cat\":\"storage\",\"ph\":\"X\",\"ts\":{},\"dur\":{},\"pid\":1,\"tid\":{}",
                event.ts_us, event.dur_us, event.tid
            )?;
            if !event.args.is_empty() {
                write!(w, ",\"args\":{{")?;
                for (j, (key, value)) in event.args.iter().enumerate() {
                    if j > 0 { write!(w, ",")?; }
                    write!(w, "\"{key}\":{value}")?;
                }
                write!(w, "}}")?;
            }
            write!(w, "}}")?;
        }
        write!(w, "]}}")?;
        w.flush()
    }

    fn write_json_string<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
        write!(w, "\"")?;
        for ch in s.chars() {
            match ch {
                '"' => write!(w, "\\\"")?,
                '\\' => write!(w, "\\\\")?,
                c if c.is_control() => write!(w, "\\u{:04x}", c as u32)?,
                c => write!(w, "{c}")?,
            }
        }
        write!(w, "\"")
    }

    /// Opens a span closed when the guard drops.
    pub fn span(name: impl Into<SpanName>) -> SpanGuard {
        match STATE.get() {
            Some(state) if state.is_on.load(Ordering::Acquire) => SpanGuard {
                name: name.into().0.into_owned(),
                ts0: now_us(state),
                tid: TID.with(|t| *t),
                args: Vec::new(),
                active: true,
            },
            _ => SpanGuard { name: String::new(), ts0: 0, tid: 0, args: Vec::new(), active: false },
        }
    }

    /// Records a complete event on drop.
    pub struct SpanGuard {
        name: String,
        ts0: u64,
        tid: u64,
        args: Vec<(&'static str, u64)>,
        active: bool,
    }

    impl SpanGuard {
        /// Attaches a numeric argument.
        #[inline]
        pub fn arg(mut self, key: &'static str, value: u64) -> Self {
            if self.active {
                self.args.push((key, value));
            }
            self
        }
    }

    impl Drop for SpanGuard {
        fn drop(&mut self) {
            if !self.active { return; }
            let Some(state) = STATE.get() else { return };
            if !state.is_on.load(Ordering::Acquire) { return; }

            let event = CompleteEvent {
                name: std::mem::take(&mut self.name),
                ts_us: self.ts0,
                dur_us: now_us(state).saturating_sub(self.ts0),
                tid: self.tid,
                args: std::mem::take(&mut self.args),
            };
            match state.events.lock() {
                Ok(mut events) => events.push(event),
                Err(poisoned) => poisoned.into_inner().push(event),
            }
        }
    }
}

#[cfg(not(feature = "profiling"))]
mod disabled {
    use super::*;

    /// No-op.
    #[inline]
    pub fn init<P: AsRef<Path>>(_path: P) {}

    /// No-op.
    #[inline]
    pub fn shutdown() {}

    /// No-op span.
    #[inline]
    pub fn span(_name: impl Into<SpanName>) -> SpanGuard {
        SpanGuard
    }

    /// Zero-sized span guard.
    pub struct SpanGuard;

    impl SpanGuard {
        /// No-op.
        #[inline]
        pub fn arg(self, _key: &'static str, _value: u64) -> Self {
            self
        }
    }
}

/// A span name; accepts `&'static str`, `String` or `Cow<'static, str>`.
pub struct SpanName(pub Cow<'static, str>);

impl From<&'static str> for SpanName {
    fn from(s: &'static str) -> Self { SpanName(Cow::Borrowed(s)) }
}
impl From<String> for SpanName {
    fn from(s: String) -> Self { SpanName(Cow::Owned(s)) }
}
impl From<Cow<'static, str>> for SpanName {
    fn from(s: Cow<'static, str>) -> Self { SpanName(s) }
}

#[cfg(feature = "profiling")]
pub use enabled::{init, shutdown, span, SpanGuard};

#[cfg(not(feature = "profiling"))]
pub use disabled::{init, shutdown, span, SpanGuard};
