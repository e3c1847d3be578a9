//! Page state for a single generation
//!
//! [`PageManager`] owns layout progress: the ordered pages, the decreasing
//! Y cursor, one content buffer and annotation list per page, and the
//! object-ID counters. One manager serves exactly one generation and is
//! never reused, so no state can leak between documents.

use std::collections::BTreeMap;

use crate::layout::{PageDimensions, MARGIN};
use crate::pdf::buffer::PdfBuffer;

/// Object IDs 1 and 2 are the catalog and the page tree; pages follow.
pub const FIRST_PAGE_ID: u32 = 3;
/// Image XObjects and font objects allocate upward from here.
pub const FIRST_RESOURCE_ID: u32 = 1000;
/// Widgets, appearance streams, outlines and other late objects start here,
/// clear of the reserved low IDs and the resource range.
pub const FIRST_EXTRA_ID: u32 = 2000;

/// A named destination: a page position, optionally with a structure
/// element for PDF/UA-style structure destinations.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedDest {
    pub page_index: usize,
    pub y: f32,
    pub structure_id: Option<u32>,
}

/// Mutable layout and object state for one generation
#[derive(Debug)]
pub struct PageManager {
    pub dims: PageDimensions,
    pages: Vec<u32>,
    current_page: usize,
    /// Decreasing Y cursor on the current page
    pub y: f32,
    content: Vec<PdfBuffer>,
    annots: Vec<Vec<u32>>,
    extra: BTreeMap<u32, Vec<u8>>,
    next_extra_id: u32,
    next_resource_id: u32,
    named_dests: BTreeMap<String, NamedDest>,
}

impl PageManager {
    /// Create the manager with its first page already open
    pub fn new(dims: PageDimensions) -> Self {
        let mut pm = Self {
            dims,
            pages: Vec::new(),
            current_page: 0,
            y: dims.content_top(),
            content: Vec::new(),
            annots: Vec::new(),
            extra: BTreeMap::new(),
            next_extra_id: FIRST_EXTRA_ID,
            next_resource_id: FIRST_RESOURCE_ID,
            named_dests: BTreeMap::new(),
        };
        pm.add_page();
        pm
    }

    /// Append a fresh page and reset the cursor to the top margin
    pub fn add_page(&mut self) {
        self.pages.push(FIRST_PAGE_ID + self.pages.len() as u32);
        self.content.push(PdfBuffer::with_capacity(1024));
        self.annots.push(Vec::new());
        self.current_page = self.pages.len() - 1;
        self.y = self.dims.content_top();
        debug_assert_eq!(self.pages.len(), self.content.len());
        debug_assert_eq!(self.pages.len(), self.annots.len());
    }

    /// True when `required_height` no longer fits above the bottom margin
    pub fn check_page_break(&self, required_height: f32) -> bool {
        self.y - required_height < MARGIN
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current_page_index(&self) -> usize {
        self.current_page
    }

    /// Re-point the emitters at an existing page (footer stamping pass)
    pub fn switch_to_page(&mut self, index: usize) {
        assert!(index < self.pages.len(), "page index out of range");
        self.current_page = index;
    }

    pub fn page_ids(&self) -> &[u32] {
        &self.pages
    }

    pub fn page_id(&self, index: usize) -> u32 {
        self.pages[index]
    }

    /// Content-stream object ID for page `index`; streams sit directly
    /// after the page objects.
    pub fn content_stream_id(&self, index: usize) -> u32 {
        FIRST_PAGE_ID + self.pages.len() as u32 + index as u32
    }

    pub fn current_content(&mut self) -> &mut PdfBuffer {
        &mut self.content[self.current_page]
    }

    pub fn content_for(&self, index: usize) -> &PdfBuffer {
        &self.content[index]
    }

    /// Record an annotation object on the current page
    pub fn add_annot(&mut self, object_id: u32) {
        self.annots[self.current_page].push(object_id);
    }

    pub fn annots_for(&self, index: usize) -> &[u32] {
        &self.annots[index]
    }

    /// Reserve an object ID in the image/font resource range
    pub fn alloc_resource_id(&mut self) -> u32 {
        let id = self.next_resource_id;
        self.next_resource_id += 1;
        id
    }

    /// Reserve an object ID in the extra-object range
    pub fn alloc_extra_id(&mut self) -> u32 {
        let id = self.next_extra_id;
        self.next_extra_id += 1;
        id
    }

    /// Store a fully serialized object body under a reserved ID
    pub fn set_extra_object(&mut self, id: u32, body: Vec<u8>) {
        self.extra.insert(id, body);
    }

    /// Reserve an ID and store its body in one step
    pub fn add_extra_object(&mut self, body: Vec<u8>) -> u32 {
        let id = self.alloc_extra_id();
        self.set_extra_object(id, body);
        id
    }

    pub fn extra_objects(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.extra.iter().map(|(id, body)| (*id, body.as_slice()))
    }

    /// Register a named destination; the page index must already exist
    pub fn register_named_dest(&mut self, name: &str, dest: NamedDest) {
        debug_assert!(dest.page_index < self.pages.len());
        self.named_dests.insert(name.to_string(), dest);
    }

    pub fn named_dest(&self, name: &str) -> Option<&NamedDest> {
        self.named_dests.get(name)
    }

    pub fn named_dests(&self) -> &BTreeMap<String, NamedDest> {
        &self.named_dests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Orientation, PageSize};

    fn manager() -> PageManager {
        PageManager::new(PageDimensions::new(PageSize::A4, Orientation::Portrait))
    }

    #[test]
    fn first_page_id_is_three() {
        let pm = manager();
        assert_eq!(pm.page_ids(), &[3]);
        assert_eq!(pm.page_count(), 1);
    }

    #[test]
    fn page_ids_are_consecutive() {
        let mut pm = manager();
        pm.add_page();
        pm.add_page();
        assert_eq!(pm.page_ids(), &[3, 4, 5]);
        // Content streams follow the pages
        assert_eq!(pm.content_stream_id(0), 6);
        assert_eq!(pm.content_stream_id(2), 8);
    }

    #[test]
    fn new_page_resets_cursor() {
        let mut pm = manager();
        pm.y = 100.0;
        pm.add_page();
        assert_eq!(pm.y, pm.dims.content_top());
        assert_eq!(pm.current_page_index(), 1);
    }

    #[test]
    fn page_break_test_respects_margin() {
        let mut pm = manager();
        assert!(!pm.check_page_break(100.0));
        pm.y = MARGIN + 50.0;
        assert!(!pm.check_page_break(50.0));
        assert!(pm.check_page_break(50.1));
    }

    #[test]
    fn id_ranges_do_not_collide() {
        let mut pm = manager();
        assert_eq!(pm.alloc_resource_id(), 1000);
        assert_eq!(pm.alloc_resource_id(), 1001);
        assert_eq!(pm.alloc_extra_id(), 2000);
        let id = pm.add_extra_object(b"<< >>".to_vec());
        assert_eq!(id, 2001);
        assert_eq!(pm.extra_objects().count(), 1);
    }
}
