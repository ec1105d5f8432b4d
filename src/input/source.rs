//! Resettable record sources.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ImportResult, ValidationError};

/// Iterator over one pass of a source.
pub type InputIter<'a, T> = Box<dyn Iterator<Item = io::Result<T>> + Send + 'a>;

/// A source of records that can be read from the beginning more than once.
///
/// Every call to [`InputIterable::iter`] starts a fresh pass. The import reads
/// nodes once to populate the id mapper, relationships once to resolve them,
/// and estimates take their own independent pass.
pub trait InputIterable<T>: Send + Sync {
    /// Start a new pass from the first record.
    ///
    /// # Errors
    /// Any I/O error opening the underlying source.
    fn iter(&self) -> io::Result<InputIter<'_, T>>;

    /// Whether `iter` may be called more than once.
    fn supports_multiple_passes(&self) -> bool {
        true
    }
}

/// Fail with [`ValidationError::SinglePassSource`] unless `source` can be
/// read more than once.
pub(crate) fn ensure_replayable<T>(source: &dyn InputIterable<T>, input: &'static str) -> ImportResult<()> {
    if source.supports_multiple_passes() {
        Ok(())
    } else {
        Err(ValidationError::SinglePassSource { input }.into())
    }
}

/// In-memory source; every pass clones the records.
#[derive(Debug, Clone)]
pub struct VecSource<T> {
    items: Arc<[T]>,
}

impl<T> VecSource<T> {
    /// Wrap `items`.
    pub fn new(items: Vec<T>) -> Self {
        Self { items: items.into() }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> From<Vec<T>> for VecSource<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T: Clone + Send + Sync> InputIterable<T> for VecSource<T> {
    fn iter(&self) -> io::Result<InputIter<'_, T>> {
        Ok(Box::new(self.items.iter().cloned().map(Ok)))
    }
}

/// Source backed by a closure that opens a fresh iterator per pass, e.g. by
/// reopening a file.
///
/// A [`FnSource::single_pass`] source opens once; any later `iter` call is an
/// I/O error, and the importer and estimates refuse it up front.
pub struct FnSource<F> {
    open: F,
    multi_pass: bool,
    opened: AtomicBool,
}

impl<F> FnSource<F> {
    /// A source that can be replayed.
    pub const fn new(open: F) -> Self {
        Self {
            open,
            multi_pass: true,
            opened: AtomicBool::new(false),
        }
    }

    /// A source that can only be read once (e.g. stdin).
    pub const fn single_pass(open: F) -> Self {
        Self {
            open,
            multi_pass: false,
            opened: AtomicBool::new(false),
        }
    }
}

impl<T, F> InputIterable<T> for FnSource<F>
where
    F: Fn() -> io::Result<InputIter<'static, T>> + Send + Sync,
{
    fn iter(&self) -> io::Result<InputIter<'_, T>> {
        if !self.multi_pass && self.opened.swap(true, Ordering::AcqRel) {
            return Err(io::Error::new(io::ErrorKind::Other, "single-pass source was already read"));
        }
        (self.open)()
    }

    fn supports_multiple_passes(&self) -> bool {
        self.multi_pass
    }
}

impl<F> std::fmt::Debug for FnSource<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource")
            .field("multi_pass", &self.multi_pass)
            .field("opened", &self.opened.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
