#![allow(dead_code)]

use dwfft3d::FFTConfig;
use dwmpi::LocalComm;
use fftgrid::FFTGrid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use types::c64;

pub const EPS: f64 = 1e-10;

pub fn config() -> FFTConfig {
    FFTConfig::default().with_num_threads(2)
}

/// Smooth deterministic coefficient of frequency `g`; real at `G = 0`.
pub fn coef_of(g: [i32; 3], seed: u64) -> c64 {
    let t = (31 * g[0] + 17 * g[1] + 7 * g[2]) as f64 + 0.5 * seed as f64;
    let g2 = (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]) as f64;

    let v = c64::new((1.3 * t + 0.2).sin(), (0.7 * t - 0.4).cos()) / (1.0 + g2);

    if g == [0, 0, 0] {
        c64::new(v.re, 0.0)
    } else {
        v
    }
}

pub fn coefs_of(millers: &[[i32; 3]], seed: u64) -> Vec<c64> {
    millers.iter().map(|&g| coef_of(g, seed)).collect()
}

pub fn random_real(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..n).map(|_| rng.gen::<f64>() - 0.5).collect()
}

pub fn random_complex(n: usize, seed: u64) -> Vec<c64> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..n)
        .map(|_| c64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5))
        .collect()
}

/// Adds the `(-G, conj c)` partners of a reduced set.
pub fn expand_hermitian(millers: &[[i32; 3]], coefs: &[c64]) -> (Vec<[i32; 3]>, Vec<c64>) {
    let mut m = millers.to_vec();
    let mut c = coefs.to_vec();

    for (&g, &v) in millers.iter().zip(coefs.iter()) {
        if g != [0, 0, 0] {
            m.push([-g[0], -g[1], -g[2]]);
            c.push(v.conj());
        }
    }

    (m, c)
}

/// `f(r) = sum_G c(G) exp(+i G r)` on the whole grid, x fastest.
pub fn dft_backward(grid: &FFTGrid, millers: &[[i32; 3]], coefs: &[c64]) -> Vec<c64> {
    let twopi = 2.0 * std::f64::consts::PI;
    let [n1, n2, n3] = grid.get_size();

    let mut f = vec![c64::new(0.0, 0.0); grid.get_ntot()];

    for z in 0..n3 {
        for y in 0..n2 {
            for x in 0..n1 {
                let mut sum = c64::new(0.0, 0.0);

                for (g, c) in millers.iter().zip(coefs.iter()) {
                    let phase = twopi
                        * (g[0] as f64 * x as f64 / n1 as f64
                            + g[1] as f64 * y as f64 / n2 as f64
                            + g[2] as f64 * z as f64 / n3 as f64);

                    sum += c * c64::new(phase.cos(), phase.sin());
                }

                f[x + y * n1 + z * n1 * n2] = sum;
            }
        }
    }

    f
}

pub fn assert_close(a: &[c64], b: &[c64], tol: f64) {
    assert_eq!(a.len(), b.len());

    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((x - y).norm() < tol, "element {}: {} vs {}", i, x, y);
    }
}

/// Runs `f` on every rank of an in-process group, one thread per rank.
pub fn run_ranks<R: Send>(nrank: usize, f: impl Fn(LocalComm) -> R + Sync) -> Vec<R> {
    let comms = LocalComm::group(nrank);

    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}
