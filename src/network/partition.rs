use std::ops::Range;

/// Splits `0..len` into `parts` contiguous chunks, spreading the remainder
/// over the first chunks. Chunks may be empty when `parts > len`.
pub(crate) fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    assert!(parts > 0, "can't partition across zero workers");

    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;

    let ranges: Vec<_> = (0..parts)
        .map(|part| {
            let size = base + usize::from(part < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect();

    assert_coverage(&ranges, len);
    ranges
}

/// Overlapping or gapped assignments are a construction bug, not a runtime
/// race; refuse to hand them out.
fn assert_coverage(ranges: &[Range<usize>], len: usize) {
    let mut expected = 0;
    for range in ranges {
        assert_eq!(
            range.start, expected,
            "partition must tile the layer with no gaps or overlaps"
        );
        expected = range.end;
    }
    assert_eq!(expected, len, "partition must cover the whole layer");
}
