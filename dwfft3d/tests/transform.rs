mod common;

use common::*;
use dwfft3d::{Direction, ProcessingUnit, FFT3D};
use dwmpi::SerialComm;
use fftgrid::FFTGrid;
use types::c64;
use zcolumns::GvecPartition;

fn serial_fft(grid: FFTGrid) -> FFT3D {
    FFT3D::with_config(grid, SerialComm, ProcessingUnit::Cpu, config()).unwrap()
}

fn backward(fft: &mut FFT3D, part: &GvecPartition, coefs: &[c64]) -> Vec<c64> {
    let mut data = coefs.to_vec();
    fft.transform(Direction::Backward, part, &mut data).unwrap();

    let mut out = vec![c64::new(0.0, 0.0); fft.local_size()];
    fft.output(&mut out).unwrap();

    out
}

#[test]
fn test_round_trip() {
    for (grid, gmax) in [(FFTGrid::new(8, 8, 8), 3.5), (FFTGrid::new(9, 10, 6), 3.0)] {
        let mut fft = serial_fft(grid);

        for reduced in [false, true] {
            let part = GvecPartition::sphere(grid, gmax, reduced, 1).unwrap();
            let coefs = coefs_of(&part.millers(), 1);

            fft.prepare(&part).unwrap();

            let mut data = coefs.clone();
            fft.transform(Direction::Backward, &part, &mut data).unwrap();
            assert_eq!(data, coefs);

            let mut back = vec![c64::new(0.0, 0.0); data.len()];
            fft.transform(Direction::Forward, &part, &mut back).unwrap();

            assert_close(&back, &coefs, EPS);
        }
    }
}

#[test]
fn test_backward_matches_direct_dft() {
    let grid = FFTGrid::new(5, 7, 3);
    let part = GvecPartition::full(grid, false, 1).unwrap();
    let millers = part.millers();
    let coefs = coefs_of(&millers, 2);

    let mut fft = serial_fft(grid);
    fft.prepare(&part).unwrap();

    let out = backward(&mut fft, &part, &coefs);
    let reference = dft_backward(&grid, &millers, &coefs);

    assert_close(&out, &reference, 1e-9);
}

#[test]
fn test_forward_matches_direct_dft() {
    let grid = FFTGrid::new(5, 4, 6);
    let part = GvecPartition::full(grid, false, 1).unwrap();
    let millers = part.millers();

    let field = random_complex(grid.get_ntot(), 3);

    let mut fft = serial_fft(grid);
    fft.prepare(&part).unwrap();
    fft.input(&field).unwrap();

    let mut coefs = vec![c64::new(0.0, 0.0); part.num_gvec()];
    fft.transform(Direction::Forward, &part, &mut coefs).unwrap();

    // c(G) = 1/N sum_r f(r) exp(-i G r), each G separately
    for (g, c) in millers.iter().zip(coefs.iter()) {
        let unit = dft_backward(&grid, &[*g], &[c64::new(1.0, 0.0)]);

        let reference: c64 = field
            .iter()
            .zip(unit.iter())
            .map(|(f, e)| f * e.conj())
            .sum::<c64>()
            / grid.get_ntotf64();

        assert!((c - reference).norm() < 1e-10, "G = {:?}", g);
    }
}

#[test]
fn test_dc_column_on_4x4x4() {
    let grid = FFTGrid::new(4, 4, 4);
    let part = GvecPartition::from_millers(grid, &[[0, 0, 0], [0, 0, 1], [0, 0, 2], [0, 0, 3]], false, 1).unwrap();

    let mut fft = serial_fft(grid);
    fft.prepare(&part).unwrap();

    let one = c64::new(1.0, 0.0);
    let zero = c64::new(0.0, 0.0);

    let out = backward(&mut fft, &part, &[one, zero, zero, zero]);
    assert_close(&out, &vec![one; 64], EPS);

    // constant field back to the DC coefficient on the same partition
    fft.input(&vec![1.0f64; 64]).unwrap();

    let mut coefs = vec![zero; 4];
    fft.transform(Direction::Forward, &part, &mut coefs).unwrap();

    assert_close(&coefs, &[one, zero, zero, zero], EPS);
}

#[test]
fn test_dc_only() {
    let grid = FFTGrid::new(4, 4, 4);
    let mut fft = serial_fft(grid);

    for reduced in [false, true] {
        let part = GvecPartition::from_millers(grid, &[[0, 0, 0]], reduced, 1).unwrap();
        fft.prepare(&part).unwrap();

        let out = backward(&mut fft, &part, &[c64::new(1.0, 0.0)]);
        assert_close(&out, &vec![c64::new(1.0, 0.0); 64], EPS);
    }

    // constant field back to a single DC coefficient
    let part = GvecPartition::full(grid, true, 1).unwrap();
    fft.prepare(&part).unwrap();
    fft.input(&vec![1.0f64; 64]).unwrap();

    let mut coefs = vec![c64::new(0.0, 0.0); part.num_gvec()];
    fft.transform(Direction::Forward, &part, &mut coefs).unwrap();

    for (g, c) in part.millers().iter().zip(coefs.iter()) {
        let expected = if *g == [0, 0, 0] { 1.0 } else { 0.0 };
        assert!((*c - expected).norm() < EPS, "G = {:?}", g);
    }
}

#[test]
fn test_linearity() {
    let grid = FFTGrid::new(6, 8, 5);
    let part = GvecPartition::sphere(grid, 2.5, false, 1).unwrap();

    let x = random_complex(part.num_gvec(), 4);
    let y = random_complex(part.num_gvec(), 5);
    let (a, b) = (c64::new(0.3, -1.2), c64::new(2.0, 0.5));

    let combined: Vec<c64> = x.iter().zip(y.iter()).map(|(x, y)| a * x + b * y).collect();

    let mut fft = serial_fft(grid);
    fft.prepare(&part).unwrap();

    let fx = backward(&mut fft, &part, &x);
    let fy = backward(&mut fft, &part, &y);
    let fxy = backward(&mut fft, &part, &combined);

    let expected: Vec<c64> = fx.iter().zip(fy.iter()).map(|(u, v)| a * u + b * v).collect();

    assert_close(&fxy, &expected, EPS);
}

#[test]
fn test_reduced_gives_real_field() {
    let grid = FFTGrid::new(8, 9, 10);
    let half = GvecPartition::sphere(grid, 3.5, true, 1).unwrap();
    let full = GvecPartition::sphere(grid, 3.5, false, 1).unwrap();

    let coefs = coefs_of(&half.millers(), 6);

    let mut fft = serial_fft(grid);

    fft.prepare(&half).unwrap();
    let f_half = backward(&mut fft, &half, &coefs);

    assert!(f_half.iter().all(|v| v.im.abs() < EPS));

    // the same field from the explicitly completed set
    let (millers, expanded) = expand_hermitian(&half.millers(), &coefs);
    let full_coefs: Vec<c64> = full
        .millers()
        .iter()
        .map(|g| {
            let i = millers.iter().position(|m| m == g).unwrap();
            expanded[i]
        })
        .collect();

    fft.prepare(&full).unwrap();
    let f_full = backward(&mut fft, &full, &full_coefs);

    assert_close(&f_half, &f_full, EPS);

    let mut real = vec![0.0; fft.local_size()];
    fft.output_real(&mut real).unwrap();

    for (r, v) in real.iter().zip(f_full.iter()) {
        assert_eq!(*r, v.re);
    }
}

#[test]
fn test_pair_backward_matches_single() {
    let grid = FFTGrid::new(8, 6, 7);
    let part = GvecPartition::sphere(grid, 3.0, true, 1).unwrap();

    let c1 = coefs_of(&part.millers(), 7);
    let c2 = coefs_of(&part.millers(), 8);

    let mut fft = serial_fft(grid);
    fft.prepare(&part).unwrap();

    let f1 = backward(&mut fft, &part, &c1);
    let f2 = backward(&mut fft, &part, &c2);

    let mut d1 = c1.clone();
    let mut d2 = c2.clone();
    fft.transform_pair(Direction::Backward, &part, &mut d1, &mut d2).unwrap();

    let mut out = vec![c64::new(0.0, 0.0); fft.local_size()];
    fft.output(&mut out).unwrap();

    for ((o, a), b) in out.iter().zip(f1.iter()).zip(f2.iter()) {
        assert!((o.re - a.re).abs() < EPS);
        assert!((o.im - b.re).abs() < EPS);
    }
}

#[test]
fn test_pair_forward_matches_single() {
    let grid = FFTGrid::new(6, 6, 6);
    let part = GvecPartition::full(grid, true, 1).unwrap();
    let n = grid.get_ntot();

    let g1 = random_real(n, 9);
    let g2 = random_real(n, 10);

    let mut fft = serial_fft(grid);
    fft.prepare(&part).unwrap();

    let mut s1 = vec![c64::new(0.0, 0.0); part.num_gvec()];
    let mut s2 = s1.clone();

    fft.input(&g1).unwrap();
    fft.transform(Direction::Forward, &part, &mut s1).unwrap();

    fft.input(&g2).unwrap();
    fft.transform(Direction::Forward, &part, &mut s2).unwrap();

    let packed: Vec<c64> = g1.iter().zip(g2.iter()).map(|(&a, &b)| c64::new(a, b)).collect();
    fft.input(&packed).unwrap();

    let mut p1 = vec![c64::new(0.0, 0.0); part.num_gvec()];
    let mut p2 = p1.clone();
    fft.transform_pair(Direction::Forward, &part, &mut p1, &mut p2).unwrap();

    assert_close(&p1, &s1, EPS);
    assert_close(&p2, &s2, EPS);
}

#[test]
fn test_forward_keeps_main_buffer() {
    let grid = FFTGrid::new(4, 6, 5);
    let part = GvecPartition::full(grid, false, 1).unwrap();
    let field = random_complex(grid.get_ntot(), 11);

    let mut fft = serial_fft(grid);
    fft.prepare(&part).unwrap();
    fft.buffer_mut().copy_from_slice(&field);

    let mut coefs = vec![c64::new(0.0, 0.0); part.num_gvec()];
    fft.transform(Direction::Forward, &part, &mut coefs).unwrap();

    assert_eq!(fft.buffer(), &field[..]);
}
