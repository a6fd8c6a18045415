//! Virtualized window over a long list.
//!
//! Only `render_range()` is materialized: the visible rows plus `overscan`
//! rows on each side, never more than `viewport + 2 * overscan` items.
//! While the window sits at the end it follows the tail, so appends keep
//! the newest item on screen; scrolling away stops that until the user
//! scrolls back to the end.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualWindow {
    len: usize,
    viewport: usize,
    overscan: usize,
    offset: usize,
    follow_tail: bool,
}

impl VirtualWindow {
    pub fn new(viewport: usize, overscan: usize) -> Self {
        Self { len: 0, viewport, overscan, offset: 0, follow_tail: true }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn viewport(&self) -> usize {
        self.viewport
    }

    pub fn follows_tail(&self) -> bool {
        self.follow_tail
    }

    fn max_offset(&self) -> usize {
        self.len.saturating_sub(self.viewport)
    }

    pub fn at_end(&self) -> bool {
        self.offset >= self.max_offset()
    }

    pub fn visible(&self) -> Range<usize> {
        self.offset..(self.offset + self.viewport).min(self.len)
    }

    pub fn render_range(&self) -> Range<usize> {
        let visible = self.visible();
        let start = visible.start.saturating_sub(self.overscan);
        let end = (visible.end + self.overscan).min(self.len);
        start..end
    }

    pub fn scroll_to(&mut self, offset: usize) {
        self.offset = offset.min(self.max_offset());
        self.follow_tail = self.at_end();
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let target = if delta.is_negative() {
            self.offset.saturating_sub(delta.unsigned_abs())
        } else {
            self.offset.saturating_add(delta as usize)
        };
        self.scroll_to(target);
    }

    pub fn scroll_to_end(&mut self) {
        self.offset = self.max_offset();
        self.follow_tail = true;
    }

    pub fn on_append(&mut self, count: usize) {
        self.set_len(self.len + count);
    }

    /// New total length, e.g. after an insert in the middle.
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        if self.follow_tail {
            self.offset = self.max_offset();
        } else {
            self.offset = self.offset.min(self.max_offset());
        }
    }

    pub fn set_viewport(&mut self, viewport: usize) {
        self.viewport = viewport;
        self.set_len(self.len);
    }

    /// The rows to render out of `items` (which should have `len()` items).
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let range = self.render_range();
        let end = range.end.min(items.len());
        &items[range.start.min(end)..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_list_renders_bounded_slice_ending_at_newest() {
        let items: Vec<u32> = (0..10_000).collect();
        let mut w = VirtualWindow::new(20, 5);
        w.on_append(items.len());

        let rendered = w.slice(&items);
        assert!(rendered.len() <= 30);
        assert_eq!(rendered.last(), Some(&9_999));
        assert_eq!(w.visible(), 9_980..10_000);
    }

    #[test]
    fn overscan_is_clamped_at_the_edges() {
        let mut w = VirtualWindow::new(20, 5);
        w.on_append(100);
        w.scroll_to(0);
        assert_eq!(w.render_range(), 0..25);
        w.scroll_to(40);
        assert_eq!(w.render_range(), 35..65);
        assert_eq!(w.render_range().len(), 30);
    }

    #[test]
    fn short_list_fits_entirely() {
        let mut w = VirtualWindow::new(20, 5);
        w.on_append(3);
        assert_eq!(w.visible(), 0..3);
        assert_eq!(w.render_range(), 0..3);
        assert!(w.at_end());
    }

    #[test]
    fn tail_following_toggles_with_scroll_position() {
        let mut w = VirtualWindow::new(10, 2);
        w.on_append(50);
        assert!(w.follows_tail());

        w.scroll_by(-5);
        assert_eq!(w.offset(), 35);
        assert!(!w.follows_tail());
        w.on_append(10);
        assert_eq!(w.offset(), 35);

        w.scroll_by(1_000);
        assert!(w.follows_tail());
        w.on_append(1);
        assert_eq!(w.visible().end, 61);
    }

    #[test]
    fn empty_window() {
        let w = VirtualWindow::new(20, 5);
        assert!(w.is_empty());
        assert_eq!(w.render_range(), 0..0);
        assert!(w.slice::<u8>(&[]).is_empty());
    }
}
