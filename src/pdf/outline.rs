//! Bookmark outlines and named destinations
//!
//! Bookmarks form a tree; each node gets one object ID up front, then the
//! sibling/child links and visible-descendant counts are filled in before
//! emission. Every node resolves to a named destination: an existing key,
//! a destination registered from the bookmark's own (page, Y), or the
//! top of page 1 as the last resort.

use crate::pdf::buffer::PdfBuffer;
use crate::pdf::page::{NamedDest, PageManager};
use crate::template::Bookmark;

struct Node {
    id: u32,
    title: String,
    dest_name: String,
    parent: u32,
    first: Option<u32>,
    last: Option<u32>,
    prev: Option<u32>,
    next: Option<u32>,
    count: i64,
}

/// Number of descendants visible when `node` is open
fn visible_descendants(node: &Bookmark) -> i64 {
    node.children
        .iter()
        .map(|child| {
            1 + if child.open.unwrap_or(true) {
                visible_descendants(child)
            } else {
                0
            }
        })
        .sum()
}

fn resolve_dest(
    pm: &mut PageManager,
    bookmark: &Bookmark,
    fallback_index: usize,
) -> String {
    if let Some(key) = &bookmark.dest {
        if pm.named_dest(key).is_some() {
            return key.clone();
        }
    }
    let name = bookmark
        .dest
        .clone()
        .unwrap_or_else(|| format!("bm{fallback_index}"));
    let dest = match (bookmark.page, bookmark.y) {
        (Some(page), y) if page >= 1 && page <= pm.page_count() => NamedDest {
            page_index: page - 1,
            y: y.unwrap_or(pm.dims.content_top()),
            structure_id: None,
        },
        // Fallback: first page, top margin
        _ => NamedDest {
            page_index: 0,
            y: pm.dims.content_top(),
            structure_id: None,
        },
    };
    pm.register_named_dest(&name, dest);
    name
}

fn allocate(
    pm: &mut PageManager,
    bookmarks: &[Bookmark],
    parent: u32,
    nodes: &mut Vec<Node>,
    counter: &mut usize,
) -> (Option<u32>, Option<u32>) {
    let mut first = None;
    let mut prev_index: Option<usize> = None;
    let mut last = None;

    for bookmark in bookmarks {
        let id = pm.alloc_extra_id();
        *counter += 1;
        let dest_name = resolve_dest(pm, bookmark, *counter);
        let open = bookmark.open.unwrap_or(true);
        let visible = visible_descendants(bookmark);
        let index = nodes.len();
        nodes.push(Node {
            id,
            title: bookmark.title.clone(),
            dest_name,
            parent,
            first: None,
            last: None,
            prev: None,
            next: None,
            count: if open { visible } else { -visible },
        });
        if let Some(pi) = prev_index {
            nodes[pi].next = Some(id);
            nodes[index].prev = Some(nodes[pi].id);
        }
        first.get_or_insert(id);
        last = Some(id);
        prev_index = Some(index);

        let (child_first, child_last) = allocate(pm, &bookmark.children, id, nodes, counter);
        nodes[index].first = child_first;
        nodes[index].last = child_last;
    }
    (first, last)
}

/// Build the outline tree; returns the `/Outlines` root object ID
pub fn build_outlines(pm: &mut PageManager, bookmarks: &[Bookmark]) -> Option<u32> {
    if bookmarks.is_empty() {
        return None;
    }
    let root_id = pm.alloc_extra_id();
    let mut nodes = Vec::new();
    let mut counter = 0;
    let (first, last) = allocate(pm, bookmarks, root_id, &mut nodes, &mut counter);

    let total: i64 = bookmarks
        .iter()
        .map(|b| 1 + if b.open.unwrap_or(true) { visible_descendants(b) } else { 0 })
        .sum();

    let mut root = PdfBuffer::new();
    root.push_str("<< /Type /Outlines /Count ");
    root.push_int(total);
    if let Some(first) = first {
        root.push_str(" /First ");
        root.push_ref(first);
    }
    if let Some(last) = last {
        root.push_str(" /Last ");
        root.push_ref(last);
    }
    root.push_str(" >>");
    pm.set_extra_object(root_id, root.into_bytes());

    for node in &nodes {
        let mut buf = PdfBuffer::new();
        buf.push_str("<< /Title ");
        buf.push_literal_string(&node.title);
        buf.push_str(" /Parent ");
        buf.push_ref(node.parent);
        buf.push_str(" /Dest ");
        buf.push_literal_string(&node.dest_name);
        if let Some(first) = node.first {
            buf.push_str(" /First ");
            buf.push_ref(first);
        }
        if let Some(last) = node.last {
            buf.push_str(" /Last ");
            buf.push_ref(last);
        }
        if let Some(prev) = node.prev {
            buf.push_str(" /Prev ");
            buf.push_ref(prev);
        }
        if let Some(next) = node.next {
            buf.push_str(" /Next ");
            buf.push_ref(next);
        }
        if node.count != 0 {
            buf.push_str(" /Count ");
            buf.push_int(node.count);
        }
        buf.push_str(" >>");
        pm.set_extra_object(node.id, buf.into_bytes());
    }

    Some(root_id)
}

/// Emit the Names/Dests table; returns the Dests tree object ID
///
/// Each value is a dictionary with `/D` (the page destination) and, when a
/// structure element is attached, an `/SD` structure destination.
pub fn emit_named_dests(pm: &mut PageManager) -> Option<u32> {
    if pm.named_dests().is_empty() {
        return None;
    }
    let entries: Vec<(String, NamedDest)> = pm
        .named_dests()
        .iter()
        .map(|(name, dest)| (name.clone(), dest.clone()))
        .collect();

    let mut buf = PdfBuffer::new();
    buf.push_str("<< /Names [");
    for (name, dest) in &entries {
        let page_id = pm.page_id(dest.page_index);
        buf.push_str(" ");
        buf.push_literal_string(name);
        buf.push_str(" << /D [");
        buf.push_ref(page_id);
        buf.push_str(" /XYZ 0 ");
        buf.push_f2(dest.y);
        buf.push_str(" 0]");
        if let Some(se) = dest.structure_id {
            buf.push_str(" /SD [");
            buf.push_ref(se);
            buf.push_str(" /XYZ 0 ");
            buf.push_f2(dest.y);
            buf.push_str(" 0]");
        }
        buf.push_str(" >>");
    }
    buf.push_str(" ] >>");
    Some(pm.add_extra_object(buf.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PageDimensions;
    use crate::template::{Orientation, PageSize};

    fn manager_with_pages(n: usize) -> PageManager {
        let mut pm = PageManager::new(PageDimensions::new(PageSize::A4, Orientation::Portrait));
        for _ in 1..n {
            pm.add_page();
        }
        pm
    }

    fn extra_text(pm: &PageManager, id: u32) -> String {
        let body = pm
            .extra_objects()
            .find(|(oid, _)| *oid == id)
            .map(|(_, b)| b.to_vec())
            .unwrap();
        String::from_utf8_lossy(&body).to_string()
    }

    fn bookmark(title: &str, page: usize) -> Bookmark {
        Bookmark {
            title: title.to_string(),
            page: Some(page),
            ..Default::default()
        }
    }

    #[test]
    fn empty_bookmarks_emit_nothing() {
        let mut pm = manager_with_pages(1);
        assert!(build_outlines(&mut pm, &[]).is_none());
        assert!(emit_named_dests(&mut pm).is_none());
    }

    #[test]
    fn tree_links_and_counts() {
        let mut pm = manager_with_pages(3);
        let mut parent = bookmark("Chapter", 1);
        parent.children = vec![bookmark("Section A", 2), bookmark("Section B", 3)];
        let closed = Bookmark {
            open: Some(false),
            ..bookmark("Appendix", 3)
        };
        let root_id = build_outlines(&mut pm, &[parent, closed]).unwrap();

        let root = extra_text(&pm, root_id);
        // Chapter + its 2 visible children + Appendix
        assert!(root.contains("/Count 4"));
        assert!(root.contains("/Type /Outlines"));

        // Chapter node: first/last children, count 2
        let chapter = extra_text(&pm, root_id + 1);
        assert!(chapter.contains("/Title (Chapter)"));
        assert!(chapter.contains("/Count 2"));
        assert!(chapter.contains("/First"));
        assert!(chapter.contains("/Last"));
        assert!(chapter.contains("/Next"));

        // Sibling links between sections
        let section_a = extra_text(&pm, root_id + 2);
        assert!(section_a.contains("/Prev") == false);
        assert!(section_a.contains("/Next"));
        let section_b = extra_text(&pm, root_id + 3);
        assert!(section_b.contains("/Prev"));
    }

    #[test]
    fn bookmarks_register_named_destinations() {
        let mut pm = manager_with_pages(2);
        let mut bm = bookmark("Go", 2);
        bm.y = Some(300.0);
        bm.dest = Some("go-here".to_string());
        build_outlines(&mut pm, &[bm]).unwrap();
        let dest = pm.named_dest("go-here").unwrap();
        assert_eq!(dest.page_index, 1);
        assert_eq!(dest.y, 300.0);

        let dests_id = emit_named_dests(&mut pm).unwrap();
        let table = extra_text(&pm, dests_id);
        assert!(table.contains("(go-here) << /D [4 0 R /XYZ 0 300.00 0] >>"));
    }

    #[test]
    fn out_of_range_page_falls_back_to_first_page() {
        let mut pm = manager_with_pages(1);
        let bm = bookmark("Bad", 9);
        build_outlines(&mut pm, &[bm]).unwrap();
        let dest = pm.named_dest("bm1").unwrap();
        assert_eq!(dest.page_index, 0);
        assert_eq!(dest.y, pm.dims.content_top());
    }
}
