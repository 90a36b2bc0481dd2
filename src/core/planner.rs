/// A contiguous byte range of the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    pub fn end_inclusive(&self) -> u64 {
        self.offset + self.len.max(1) - 1
    }
}

pub fn plan_ranges(total: u64, chunk_size: u64) -> Vec<ByteRange> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::new();
    let mut offset = 0u64;
    while offset < total {
        let len = (total - offset).min(chunk_size);
        ranges.push(ByteRange { offset, len });
        offset += len;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_total_without_gaps() {
        let ranges = plan_ranges(10, 4);
        assert_eq!(
            ranges,
            vec![
                ByteRange { offset: 0, len: 4 },
                ByteRange { offset: 4, len: 4 },
                ByteRange { offset: 8, len: 2 },
            ]
        );
        assert_eq!(ranges[2].end_inclusive(), 9);
    }

    #[test]
    fn exact_multiple_and_empty() {
        assert_eq!(plan_ranges(8, 4).len(), 2);
        assert!(plan_ranges(0, 4).is_empty());
    }
}
