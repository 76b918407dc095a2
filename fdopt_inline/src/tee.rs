//! Priority-filtered multi-sink log streams.
//!
//! Every user-visible line the inliner produces flows through a
//! [`TeeStream`]: a set of sinks, each with its own priority threshold. A
//! message prints on every sink whose threshold is at or below the
//! message's priority, so one `emit` can hit a report file, the debug file,
//! and stderr at once.

use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::rc::Rc;

/// Message and sink priorities. A sink with threshold `vl::LOG` prints
/// messages at `LOG` and above; `vl::NEVER` as a message priority prints
/// nowhere.
pub mod vl {
    pub const ERROR: u8 = 10;
    pub const ALWAYS: u8 = 10;
    pub const WARN: u8 = 8;
    pub const LOG: u8 = 6;
    pub const INFO: u8 = 4;
    /// Entry/exit of big functions, algorithm phase points.
    pub const TRACE: u8 = 3;
    /// Tracing into small functions.
    pub const DETAIL: u8 = 2;
    /// Almost never wanted.
    pub const VERBOSE: u8 = 1;
    pub const NEVER: u8 = 0;
}

/// A sink shared between streams (the debug file backs several tees).
pub type SharedSink = Rc<RefCell<dyn Write>>;

/// Wrap a writer as a shareable sink.
pub fn sink<W: Write + 'static>(w: W) -> SharedSink {
    Rc::new(RefCell::new(w))
}

// =============================================================================
// TeeStream
// =============================================================================

pub struct TeeStream {
    sinks: Vec<(SharedSink, u8)>,
    default_priority: u8,
}

impl TeeStream {
    pub fn new(default_priority: u8) -> Self {
        TeeStream {
            sinks: Vec::new(),
            default_priority,
        }
    }

    pub fn add_sink(&mut self, s: SharedSink, threshold: u8) {
        self.sinks.push((s, threshold));
    }

    pub fn set_default_priority(&mut self, p: u8) {
        self.default_priority = p.min(vl::ALWAYS);
    }

    /// Write to every sink whose threshold admits `priority`. A message at
    /// `vl::NEVER` prints nowhere.
    pub fn emit(&mut self, priority: u8, args: fmt::Arguments<'_>) {
        if priority == vl::NEVER {
            return;
        }
        for (s, threshold) in &self.sinks {
            if *threshold <= priority {
                let _ = s.borrow_mut().write_fmt(args);
            }
        }
    }

    /// Write at the stream's default priority.
    pub fn emit_default(&mut self, args: fmt::Arguments<'_>) {
        self.emit(self.default_priority, args);
    }

    pub fn flush(&mut self) {
        for (s, _) in &self.sinks {
            let _ = s.borrow_mut().flush();
        }
    }
}

/// `tee!(stream, vl::INFO, "inlined {}", n)`: write without a newline.
#[macro_export]
macro_rules! tee {
    ($tee:expr, $p:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $tee.emit($p, format_args!($fmt $(, $arg)*))
    };
}

/// `teeln!(stream, vl::INFO, "inlined {}", n)`: write one line.
#[macro_export]
macro_rules! teeln {
    ($tee:expr, $p:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        $tee.emit($p, format_args!($fmt $(, $arg)*));
        $tee.emit($p, format_args!("\n"));
    }};
}

// =============================================================================
// The inliner's log set
// =============================================================================

/// The five streams the inliner reports through. File-backed from a
/// basename (`<base>.count`, `.cseval`, `.dead`, `.hash`, `.debug`), all on
/// stdout for the basename `-`, or in-memory for tests.
pub struct LogSet {
    pub count: TeeStream,
    pub cseval: TeeStream,
    pub dead: TeeStream,
    pub hash: TeeStream,
    pub debug: TeeStream,
}

impl LogSet {
    /// Open file-backed logs. The debug file (and stderr, at warnings and
    /// above) also receives everything the other four report, filtered by
    /// `verbosity`; verbosity 0 silences the debug stream entirely.
    pub fn open(base: &str, verbosity: u8) -> io::Result<LogSet> {
        if base == "-" {
            let out = sink(io::stdout());
            let mut mk = || {
                let mut t = TeeStream::new(vl::LOG);
                t.add_sink(Rc::clone(&out), vl::LOG);
                t
            };
            let (count, cseval, dead, hash) = (mk(), mk(), mk(), mk());
            let mut debug = TeeStream::new(verbosity.max(vl::VERBOSE));
            if verbosity > vl::NEVER {
                debug.add_sink(sink(io::stderr()), verbosity);
            }
            return Ok(LogSet {
                count,
                cseval,
                dead,
                hash,
                debug,
            });
        }

        let debug_file: Option<SharedSink> = if verbosity > vl::NEVER {
            Some(sink(File::create(format!("{base}.debug"))?))
        } else {
            None
        };

        let mut mk = |suffix: &str| -> io::Result<TeeStream> {
            let mut t = TeeStream::new(vl::LOG);
            t.add_sink(sink(File::create(format!("{base}{suffix}"))?), vl::LOG);
            if let Some(dbg) = &debug_file {
                t.add_sink(Rc::clone(dbg), verbosity);
            }
            Ok(t)
        };
        let count = mk(".count")?;
        let cseval = mk(".cseval")?;
        let dead = mk(".dead")?;
        let hash = mk(".hash")?;

        let mut debug = TeeStream::new(verbosity.max(vl::VERBOSE));
        if let Some(dbg) = &debug_file {
            debug.add_sink(Rc::clone(dbg), verbosity);
            debug.add_sink(sink(io::stderr()), vl::WARN);
        }
        Ok(LogSet {
            count,
            cseval,
            dead,
            hash,
            debug,
        })
    }

    /// In-memory logs plus handles to their buffers, for tests.
    pub fn in_memory(verbosity: u8) -> (LogSet, LogBuffers) {
        let buffers = LogBuffers::default();
        let mk = |buf: &Rc<RefCell<Vec<u8>>>| {
            let mut t = TeeStream::new(vl::LOG);
            t.add_sink(Rc::clone(buf) as SharedSink, vl::LOG);
            t
        };
        let mut debug = TeeStream::new(verbosity.max(vl::VERBOSE));
        debug.add_sink(Rc::clone(&buffers.debug) as SharedSink, verbosity.max(1));
        let logs = LogSet {
            count: mk(&buffers.count),
            cseval: mk(&buffers.cseval),
            dead: mk(&buffers.dead),
            hash: mk(&buffers.hash),
            debug,
        };
        (logs, buffers)
    }

    pub fn flush(&mut self) {
        self.count.flush();
        self.cseval.flush();
        self.dead.flush();
        self.hash.flush();
        self.debug.flush();
    }
}

/// Buffer handles backing [`LogSet::in_memory`].
#[derive(Default, Clone)]
pub struct LogBuffers {
    pub count: Rc<RefCell<Vec<u8>>>,
    pub cseval: Rc<RefCell<Vec<u8>>>,
    pub dead: Rc<RefCell<Vec<u8>>>,
    pub hash: Rc<RefCell<Vec<u8>>>,
    pub debug: Rc<RefCell<Vec<u8>>>,
}

impl LogBuffers {
    pub fn count_text(&self) -> String {
        String::from_utf8_lossy(&self.count.borrow()).into_owned()
    }

    pub fn dead_text(&self) -> String {
        String::from_utf8_lossy(&self.dead.borrow()).into_owned()
    }

    pub fn hash_text(&self) -> String {
        String::from_utf8_lossy(&self.hash.borrow()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> (TeeStream, Rc<RefCell<Vec<u8>>>) {
        let buf: Rc<RefCell<Vec<u8>>> = Rc::default();
        let mut t = TeeStream::new(vl::LOG);
        t.add_sink(Rc::clone(&buf) as SharedSink, vl::INFO);
        (t, buf)
    }

    #[test]
    fn test_threshold_filters_messages() {
        let (mut t, buf) = capture();
        teeln!(t, vl::ERROR, "err");
        teeln!(t, vl::INFO, "info");
        teeln!(t, vl::TRACE, "trace");
        let text = String::from_utf8(buf.borrow().clone()).unwrap();
        assert!(text.contains("err"));
        assert!(text.contains("info"));
        assert!(!text.contains("trace"));
    }

    #[test]
    fn test_shared_sink_receives_from_two_streams() {
        let buf: Rc<RefCell<Vec<u8>>> = Rc::default();
        let mut a = TeeStream::new(vl::LOG);
        let mut b = TeeStream::new(vl::LOG);
        a.add_sink(Rc::clone(&buf) as SharedSink, vl::NEVER);
        b.add_sink(Rc::clone(&buf) as SharedSink, vl::NEVER);
        teeln!(a, vl::LOG, "from-a");
        teeln!(b, vl::LOG, "from-b");
        let text = String::from_utf8(buf.borrow().clone()).unwrap();
        assert!(text.contains("from-a"));
        assert!(text.contains("from-b"));
    }

    #[test]
    fn test_never_priority_prints_nowhere() {
        let (mut t, buf) = capture();
        tee!(t, vl::NEVER, "ghost");
        assert!(buf.borrow().is_empty());
    }
}
