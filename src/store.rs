//! Page images and the store the OCR tool reads them from.
//!
//! Rasterisation happens outside this crate — any renderer that produces one
//! PNG per page will do. The core only ever *reads* pages, keyed by their
//! 1-based number: the store is populated before the agent loop starts and
//! must tolerate concurrent reads when several tool calls run in parallel.

use crate::error::DocsightError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One rendered document page: 1-based number plus PNG bytes.
///
/// This is the only page representation in the crate; whatever shape an
/// external renderer produces is converted to `PageImage` at the boundary
/// that ingests it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub number: u32,
    pub png: Vec<u8>,
}

impl PageImage {
    pub fn new(number: u32, png: Vec<u8>) -> Self {
        Self { number, png }
    }
}

/// Read access to rendered pages by 1-based page number.
///
/// `Send + Sync` because tool calls within one loop iteration may fan out
/// across workers, each resolving its own page.
pub trait PageStore: Send + Sync {
    /// Fetch a page, or `None` when no such page exists.
    fn load(&self, page_num: u32) -> Option<PageImage>;

    /// Number of pages available.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory page store; the default for library use and tests.
#[derive(Debug, Default)]
pub struct MemoryPageStore {
    pages: HashMap<u32, Vec<u8>>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from pages in order; numbering is taken from each page.
    pub fn from_pages(pages: &[PageImage]) -> Self {
        let mut store = Self::new();
        for page in pages {
            store.insert(page.clone());
        }
        store
    }

    pub fn insert(&mut self, page: PageImage) {
        self.pages.insert(page.number, page.png);
    }
}

impl PageStore for MemoryPageStore {
    fn load(&self, page_num: u32) -> Option<PageImage> {
        self.pages
            .get(&page_num)
            .map(|png| PageImage::new(page_num, png.clone()))
    }

    fn len(&self) -> usize {
        self.pages.len()
    }
}

/// Disk-backed page store reading `NNN.png` files from a directory.
///
/// Pages are written once by the ingestion step and only read afterwards, so
/// plain blocking reads are fine — loads happen before or between network
/// calls, never on a hot path.
#[derive(Debug)]
pub struct DiskPageStore {
    dir: PathBuf,
    count: usize,
}

impl DiskPageStore {
    /// Persist pages as `pages/NNN.png` under `dir` and open a store on them.
    pub fn create(dir: &Path, pages: &[PageImage]) -> Result<Self, DocsightError> {
        let pages_dir = dir.join("pages");
        std::fs::create_dir_all(&pages_dir).map_err(|e| DocsightError::OutputWriteFailed {
            path: pages_dir.clone(),
            source: e,
        })?;
        for page in pages {
            let path = pages_dir.join(format!("{:03}.png", page.number));
            std::fs::write(&path, &page.png)
                .map_err(|e| DocsightError::OutputWriteFailed { path, source: e })?;
        }
        Ok(Self {
            dir: pages_dir,
            count: pages.len(),
        })
    }
}

impl PageStore for DiskPageStore {
    fn load(&self, page_num: u32) -> Option<PageImage> {
        let path = self.dir.join(format!("{page_num:03}.png"));
        std::fs::read(path).ok().map(|png| PageImage::new(page_num, png))
    }

    fn len(&self) -> usize {
        self.count
    }
}
