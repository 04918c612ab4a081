//! Dimensions of the 3-D FFT box and the map between signed frequencies and
//! buffer coordinates.
//!
//! Buffers are laid out with the first index fastest: the linear index of
//! the coordinate `(x, y, z)` is `x + y * n1 + z * n1 * n2`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FFTGrid {
    n1: usize,
    n2: usize,
    n3: usize,
}

impl FFTGrid {
    pub fn new(n1: usize, n2: usize, n3: usize) -> FFTGrid {
        assert!(
            n1 > 0 && n2 > 0 && n3 > 0,
            "FFT grid dimensions must be positive: {} x {} x {}",
            n1,
            n2,
            n3
        );

        FFTGrid { n1, n2, n3 }
    }

    /// Smallest grid that holds every frequency up to `2 * gmax` along each
    /// cell vector; `lengths` are the lengths of the three cell vectors.
    pub fn from_cutoff(lengths: [f64; 3], gmax: f64) -> FFTGrid {
        let twopi = 2.0 * std::f64::consts::PI;

        let mut n = [0usize; 3];

        for (ni, len) in n.iter_mut().zip(lengths.iter()) {
            let nmin = (2.0 * gmax * len / twopi).ceil() as usize;

            *ni = good_fft_size(nmin.max(1));
        }

        FFTGrid::new(n[0], n[1], n[2])
    }

    pub fn get_ntotf64(&self) -> f64 {
        (self.n1 * self.n2 * self.n3) as f64
    }

    pub fn get_ntot(&self) -> usize {
        self.n1 * self.n2 * self.n3
    }

    pub fn get_n1(&self) -> usize {
        self.n1
    }

    pub fn get_n2(&self) -> usize {
        self.n2
    }

    pub fn get_n3(&self) -> usize {
        self.n3
    }

    pub fn get_size(&self) -> [usize; 3] {
        [self.n1, self.n2, self.n3]
    }

    pub fn size(&self, dim: usize) -> usize {
        match dim {
            0 => self.n1,
            1 => self.n2,
            2 => self.n3,
            _ => panic!("wrong FFT grid dimension {}", dim),
        }
    }

    /// Number of points in one xy-plane.
    pub fn size_xy(&self) -> usize {
        self.n1 * self.n2
    }

    /// Lowest and highest signed frequency stored along `dim`.
    pub fn freq_limits(&self, dim: usize) -> (i32, i32) {
        let n = self.size(dim);

        (fft_left_end(n), fft_right_end(n))
    }

    pub fn contains_freq(&self, freq: i32, dim: usize) -> bool {
        let (lo, hi) = self.freq_limits(dim);

        freq >= lo && freq <= hi
    }

    /// Buffer coordinate of a signed frequency along `dim`. Any `|freq| < n`
    /// is accepted so that the negation of the highest frequency of an even
    /// grid still lands on its aliased coordinate.
    #[inline]
    pub fn coord_by_freq(&self, freq: i32, dim: usize) -> usize {
        let n = self.size(dim);

        debug_assert!(
            freq.unsigned_abs() as usize <= n - 1,
            "frequency {} is outside of the grid along dimension {}",
            freq,
            dim
        );

        fft_i2n(freq, n)
    }

    /// Signed frequency of a buffer coordinate along `dim`.
    #[inline]
    pub fn freq_by_coord(&self, coord: usize, dim: usize) -> i32 {
        fft_n2i(coord, self.size(dim))
    }

    pub fn index_by_freq(&self, freq: [i32; 3]) -> usize {
        let x = self.coord_by_freq(freq[0], 0);
        let y = self.coord_by_freq(freq[1], 1);
        let z = self.coord_by_freq(freq[2], 2);

        x + y * self.n1 + z * self.n1 * self.n2
    }
}

impl fmt::Display for FFTGrid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} x {} x {}", self.n1, self.n2, self.n3)
    }
}

fn fft_left_end(n: usize) -> i32 {
    let nn = n as i32;

    if n % 2 == 0 {
        -(nn - 2) / 2
    } else {
        -(nn - 1) / 2
    }
}

fn fft_right_end(n: usize) -> i32 {
    let nn = n as i32;

    if n % 2 == 0 {
        nn / 2
    } else {
        (nn - 1) / 2
    }
}

fn fft_i2n(i: i32, ntot: usize) -> usize {
    if i < 0 {
        (i + ntot as i32) as usize
    } else {
        i as usize
    }
}

fn fft_n2i(n: usize, ntot: usize) -> i32 {
    if n > ntot / 2 {
        n as i32 - ntot as i32
    } else {
        n as i32
    }
}

/// Smallest size not below `n` whose prime factors are all in {2, 3, 5, 7, 11, 13}.
pub fn good_fft_size(n: usize) -> usize {
    let mut tn = n.max(1);

    while !is_fft_friendly(tn) {
        tn += 1;
    }

    tn
}

fn is_fft_friendly(n_to_check: usize) -> bool {
    const FACTORS: [usize; 6] = [2, 3, 5, 7, 11, 13];

    let mut tn = n_to_check;

    for fi in FACTORS.iter() {
        while tn % fi == 0 && tn != 1 {
            tn /= fi;
        }
    }

    tn == 1
}
