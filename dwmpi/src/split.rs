/// Block distribution of `n` consecutive items over `nrank` ranks.
///
/// Every rank gets a contiguous range; the first `n % nrank` ranks hold one
/// item more than the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndex {
    n: usize,
    counts: Vec<usize>,
    offsets: Vec<usize>,
}

impl SplitIndex {
    pub fn new(n: usize, nrank: usize) -> SplitIndex {
        assert!(nrank > 0, "cannot split {} items over zero ranks", n);

        let mut counts = vec![n / nrank; nrank];

        for cnt in counts.iter_mut().take(n % nrank) {
            *cnt += 1;
        }

        let mut offsets = vec![0; nrank];

        for irank in 1..nrank {
            offsets[irank] = offsets[irank - 1] + counts[irank - 1];
        }

        SplitIndex { n, counts, offsets }
    }

    pub fn global_size(&self) -> usize {
        self.n
    }

    pub fn nrank(&self) -> usize {
        self.counts.len()
    }

    pub fn local_size(&self, rank: usize) -> usize {
        self.counts[rank]
    }

    pub fn global_offset(&self, rank: usize) -> usize {
        self.offsets[rank]
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Owning rank and local index of a global index.
    pub fn location(&self, global: usize) -> (usize, usize) {
        assert!(global < self.n, "index {} out of 0..{}", global, self.n);

        let rank = match self.offsets.binary_search(&global) {
            Ok(mut r) => {
                // skip empty ranks that share the offset
                while self.counts[r] == 0 {
                    r += 1;
                }
                r
            }
            Err(r) => r - 1,
        };

        (rank, global - self.offsets[rank])
    }
}

#[test]
fn test_split_index() {
    let spl = SplitIndex::new(10, 4);

    assert_eq!(spl.counts(), &[3, 3, 2, 2]);
    assert_eq!(spl.global_offset(2), 6);
    assert_eq!(spl.counts().iter().sum::<usize>(), 10);

    assert_eq!(spl.location(0), (0, 0));
    assert_eq!(spl.location(5), (1, 2));
    assert_eq!(spl.location(6), (2, 0));
    assert_eq!(spl.location(9), (3, 1));
}

#[test]
fn test_split_index_more_ranks_than_items() {
    let spl = SplitIndex::new(2, 4);

    assert_eq!(spl.counts(), &[1, 1, 0, 0]);
    assert_eq!(spl.global_offset(3), 2);
    assert_eq!(spl.location(1), (1, 0));
}
