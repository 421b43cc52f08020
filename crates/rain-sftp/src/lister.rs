//! Paged view over a directory listing

use crate::namespace::DirEntry;

/// Entries per READDIR response
pub const READDIR_WINDOW: usize = 100;

/// Read-only cursor over a listing computed once at OPENDIR
#[derive(Debug, Clone, Default)]
pub struct ListingCursor {
    entries: Vec<DirEntry>,
}

impl ListingCursor {
    /// Wrap a precomputed listing
    pub const fn new(entries: Vec<DirEntry>) -> Self {
        Self { entries }
    }

    /// Up to `window` entries starting at `offset`, and whether they reach the
    /// end of the listing. An offset at or past the end returns no entries and
    /// `true`.
    pub fn list_at(&self, window: usize, offset: usize) -> (&[DirEntry], bool) {
        if offset >= self.entries.len() {
            return (&[], true);
        }
        let end = offset.saturating_add(window).min(self.entries.len());
        (&self.entries[offset..end], end == self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entries(count: usize) -> Vec<DirEntry> {
        (0..count)
            .map(|i| DirEntry {
                name: format!("file-{i}"),
                size: 0,
                modified: Utc::now(),
                is_dir: false,
            })
            .collect()
    }

    #[test]
    fn test_pages_through_listing() {
        let cursor = ListingCursor::new(entries(5));

        let (page, eof) = cursor.list_at(2, 0);
        assert_eq!(page.len(), 2);
        assert!(!eof);

        let (page, eof) = cursor.list_at(2, 4);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "file-4");
        assert!(eof);
    }

    #[test]
    fn test_offset_past_end() {
        let cursor = ListingCursor::new(entries(3));
        let (page, eof) = cursor.list_at(10, 3);
        assert!(page.is_empty());
        assert!(eof);

        let empty = ListingCursor::default();
        let (page, eof) = empty.list_at(10, 0);
        assert!(page.is_empty());
        assert!(eof);
    }

    #[test]
    fn test_exact_window_reaches_end() {
        let cursor = ListingCursor::new(entries(4));
        let (page, eof) = cursor.list_at(4, 0);
        assert_eq!(page.len(), 4);
        assert!(eof);
    }
}
