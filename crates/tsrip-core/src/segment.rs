//! Segment references: the ordered input the merge engine consumes.

/// One addressable chunk of the target stream: its 0-based position in
/// playlist order and an opaque fetch address. The engine never interprets
/// `locator` beyond handing it to the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// Position in playlist order. Unique and contiguous within a list.
    pub index: usize,
    /// Opaque fetch address (typically a URL).
    pub locator: String,
}

/// Builds an ordered segment list from locators, assigning contiguous
/// 0-based indices in iteration order.
pub fn segment_list<I>(locators: I) -> Vec<SegmentRef>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    locators
        .into_iter()
        .enumerate()
        .map(|(index, locator)| SegmentRef {
            index,
            locator: locator.into(),
        })
        .collect()
}
