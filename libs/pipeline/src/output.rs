use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Stdout-like writer shared by the processor and the supervisor.
///
/// `write_all` держит lock на всю строку, поэтому строки из разных
/// задач не перемешиваются.
pub struct SharedWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: Write> SharedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, W> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write one line and flush. A failed write is logged, not returned.
    pub fn line(&self, args: fmt::Arguments<'_>) {
        let line = format!("{args}\n");
        let mut writer = self.lock();
        if let Err(e) = writer.write_all(line.as_bytes()).and_then(|()| writer.flush()) {
            tracing::warn!(error = %e, "cannot write output line");
        }
    }
}

impl<W: Write> Write for SharedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}
