//! Page arithmetic shared by the server and the list controller. Both sides
//! must agree on the page size or the page count drifts from the rows.

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Number of pages needed for `total_count` rows; never less than one so an
/// empty result still has a page to show.
pub fn total_pages(total_count: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    let pages = total_count.div_ceil(page_size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Row offset of a 1-based page.
pub fn offset_for_page(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
}

pub fn page_in_range(page: u32, total_pages: u32) -> bool {
    (1..=total_pages).contains(&page)
}
