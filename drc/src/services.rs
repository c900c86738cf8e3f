use std::fmt;

/// Services the host provides to the engine.
///
/// The engine never allocates its code caches or prints diagnostics on its own, everything goes
/// through these hooks so a host can back the caches with its own arenas and route messages to
/// its own console.
pub trait HostServices {
    /// Allocate a zeroed buffer of exactly `size` bytes, `None` if the allocation failed
    fn alloc(&self, size: usize) -> Option<Box<[u8]>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        buf.resize(size, 0);
        Some(buf.into_boxed_slice())
    }

    fn free(&self, buf: Box<[u8]>) {
        drop(buf);
    }

    fn print(&self, level: log::Level, args: fmt::Arguments<'_>) {
        log::log!(target: "drc", level, "{}", args);
    }
}

/// Heap allocation and the `log` facade
#[derive(Default, Debug, Clone, Copy)]
pub struct DefaultServices;

impl HostServices for DefaultServices {}

/// Prints through a [`HostServices`] print hook with `format!` syntax
macro_rules! host_print {
    ($services:expr, $level:ident, $($arg:tt)*) => {
        $services.print(log::Level::$level, format_args!($($arg)*))
    };
}
pub(crate) use host_print;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        lines: RefCell<Vec<(log::Level, String)>>,
    }

    impl HostServices for Recorder {
        fn print(&self, level: log::Level, args: fmt::Arguments<'_>) {
            self.lines.borrow_mut().push((level, args.to_string()));
        }
    }

    #[test]
    fn default_alloc_is_zeroed() {
        let buf = DefaultServices.alloc(64).unwrap();
        assert_eq!(buf.len(), 64);
        assert!(buf.iter().all(|&b| b == 0));
        DefaultServices.free(buf);
    }

    #[test]
    fn print_macro_formats() {
        let recorder = Recorder::default();
        host_print!(recorder, Warn, "block {:#x} failed", 0x100);
        assert_eq!(recorder.lines.borrow()[0], (log::Level::Warn, "block 0x100 failed".to_owned()));
    }
}
