//! Lazily evaluated contents and linknames
//!
//! Target and destination entries carry contents that may be expensive to
//! produce (disk reads, decryption). A [`LazyContents`] evaluates its
//! producer at most once and caches bytes, SHA-256, and any error; the
//! error is replayed on every later access. The single-threaded engine
//! invariant makes plain interior mutability sufficient here.

use crate::error::{Error, Result};
use crate::hash::sha256;
use once_cell::unsync::OnceCell;
use std::cell::RefCell;
use std::sync::Arc;

type ContentsFn<'a> = Box<dyn FnOnce() -> Result<Vec<u8>> + 'a>;
type LinknameFn<'a> = Box<dyn FnOnce() -> Result<String> + 'a>;

struct EvaluatedContents {
    contents: Vec<u8>,
    sha256: [u8; 32],
}

/// Contents that are produced on first use and cached afterwards
pub struct LazyContents<'a> {
    producer: RefCell<Option<ContentsFn<'a>>>,
    cell: OnceCell<std::result::Result<EvaluatedContents, Arc<Error>>>,
}

impl<'a> LazyContents<'a> {
    /// Create lazy contents from already-known bytes
    #[must_use]
    pub fn new(contents: Vec<u8>) -> Self {
        let cell = OnceCell::new();
        let evaluated = EvaluatedContents {
            sha256: sha256(&contents),
            contents,
        };
        cell.set(Ok(evaluated)).unwrap_or_else(|_| unreachable!());
        Self {
            producer: RefCell::new(None),
            cell,
        }
    }

    /// Create lazy contents from a producer function
    pub fn from_fn(producer: impl FnOnce() -> Result<Vec<u8>> + 'a) -> Self {
        Self {
            producer: RefCell::new(Some(Box::new(producer))),
            cell: OnceCell::new(),
        }
    }

    fn evaluated(&self) -> &std::result::Result<EvaluatedContents, Arc<Error>> {
        self.cell.get_or_init(|| {
            let producer = self
                .producer
                .borrow_mut()
                .take()
                .expect("lazy contents evaluated without a producer");
            producer()
                .map(|contents| EvaluatedContents {
                    sha256: sha256(&contents),
                    contents,
                })
                .map_err(Arc::new)
        })
    }

    /// The contents, evaluating the producer on first call
    pub fn contents(&self) -> Result<&[u8]> {
        match self.evaluated() {
            Ok(evaluated) => Ok(&evaluated.contents),
            Err(e) => Err(Error::Shared(Arc::clone(e))),
        }
    }

    /// The SHA-256 digest of the contents
    pub fn contents_sha256(&self) -> Result<[u8; 32]> {
        match self.evaluated() {
            Ok(evaluated) => Ok(evaluated.sha256),
            Err(e) => Err(Error::Shared(Arc::clone(e))),
        }
    }
}

impl std::fmt::Debug for LazyContents<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cell.get() {
            Some(Ok(evaluated)) => f
                .debug_struct("LazyContents")
                .field("len", &evaluated.contents.len())
                .finish(),
            Some(Err(e)) => f.debug_struct("LazyContents").field("err", e).finish(),
            None => f.debug_struct("LazyContents").field("pending", &true).finish(),
        }
    }
}

/// A symlink target that is produced on first use and cached afterwards
pub struct LazyLinkname<'a> {
    producer: RefCell<Option<LinknameFn<'a>>>,
    cell: OnceCell<std::result::Result<String, Arc<Error>>>,
}

impl<'a> LazyLinkname<'a> {
    /// Create a lazy linkname from an already-known target
    #[must_use]
    pub fn new(linkname: String) -> Self {
        let cell = OnceCell::new();
        cell.set(Ok(linkname)).unwrap_or_else(|_| unreachable!());
        Self {
            producer: RefCell::new(None),
            cell,
        }
    }

    /// Create a lazy linkname from a producer function
    pub fn from_fn(producer: impl FnOnce() -> Result<String> + 'a) -> Self {
        Self {
            producer: RefCell::new(Some(Box::new(producer))),
            cell: OnceCell::new(),
        }
    }

    fn evaluated(&self) -> &std::result::Result<String, Arc<Error>> {
        self.cell.get_or_init(|| {
            let producer = self
                .producer
                .borrow_mut()
                .take()
                .expect("lazy linkname evaluated without a producer");
            producer().map_err(Arc::new)
        })
    }

    /// The linkname, evaluating the producer on first call
    pub fn linkname(&self) -> Result<&str> {
        match self.evaluated() {
            Ok(linkname) => Ok(linkname),
            Err(e) => Err(Error::Shared(Arc::clone(e))),
        }
    }

    /// The SHA-256 digest of the linkname bytes
    pub fn linkname_sha256(&self) -> Result<[u8; 32]> {
        self.linkname().map(|l| sha256(l.as_bytes()))
    }
}

impl std::fmt::Debug for LazyLinkname<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cell.get() {
            Some(Ok(linkname)) => f
                .debug_struct("LazyLinkname")
                .field("linkname", linkname)
                .finish(),
            Some(Err(e)) => f.debug_struct("LazyLinkname").field("err", e).finish(),
            None => f.debug_struct("LazyLinkname").field("pending", &true).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::hash::sha256;
    use std::cell::Cell;

    #[test]
    fn test_explicit_contents() {
        let lc = LazyContents::new(b"hello".to_vec());
        assert_eq!(lc.contents().unwrap(), b"hello");
        assert_eq!(lc.contents_sha256().unwrap(), sha256(b"hello"));
    }

    #[test]
    fn test_producer_runs_once() {
        let calls = Cell::new(0);
        let lc = LazyContents::from_fn(|| {
            calls.set(calls.get() + 1);
            Ok(b"produced".to_vec())
        });
        assert_eq!(lc.contents().unwrap(), b"produced");
        assert_eq!(lc.contents().unwrap(), b"produced");
        assert_eq!(lc.contents_sha256().unwrap(), sha256(b"produced"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_error_is_cached_and_replayed() {
        let calls = Cell::new(0);
        let lc = LazyContents::from_fn(|| {
            calls.set(calls.get() + 1);
            Err(Error::State("boom".to_string()))
        });
        let first = lc.contents().unwrap_err().to_string();
        let second = lc.contents().unwrap_err().to_string();
        assert_eq!(first, second);
        assert!(first.contains("boom"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_lazy_linkname() {
        let ll = LazyLinkname::from_fn(|| Ok(".bashrc".to_string()));
        assert_eq!(ll.linkname().unwrap(), ".bashrc");
        assert_eq!(ll.linkname_sha256().unwrap(), sha256(b".bashrc"));
    }
}
