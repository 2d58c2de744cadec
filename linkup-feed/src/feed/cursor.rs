use linkup_common::util::PageLimit;

/// Pagination state for the growing-limit fetch scheme: every page request
/// re-fetches the feed from the top with a limit that grows by one page
/// size, so each response is a superset of the previous one.
///
/// At most one page request is in flight at a time, and once the feed is
/// exhausted no further requests are issued.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PageCursor {
    page_size: PageLimit,
    limit: u32,
    has_more: bool,
    in_flight: bool,
}

impl PageCursor {
    #[must_use]
    pub fn new(page_size: PageLimit) -> Self {
        Self {
            page_size,
            limit: page_size.get(),
            has_more: true,
            in_flight: false,
        }
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Claims the next page request. `None` while a request is already in
    /// flight or after the feed is exhausted.
    pub fn begin(&mut self) -> Option<PageLimit> {
        if self.in_flight || !self.has_more {
            return None;
        }
        self.in_flight = true;
        // The limit starts at the page size and only grows, so it stays
        // positive.
        Some(PageLimit::new_unchecked(self.limit))
    }

    /// Settles the in-flight request. When the response holds no more posts
    /// than were already loaded, the feed is exhausted; otherwise the next
    /// request asks for one more page.
    pub fn complete(&mut self, fetched: usize, previously_held: usize) {
        self.in_flight = false;
        if fetched == previously_held {
            self.has_more = false;
        } else {
            self.limit += self.page_size.get();
        }
    }

    /// Releases the in-flight claim after a failed request without growing
    /// the limit, so the same page can be retried.
    pub fn abort(&mut self) {
        self.in_flight = false;
    }
}
