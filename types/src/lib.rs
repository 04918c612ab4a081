#![allow(non_camel_case_types)]

pub type c64 = num_complex::Complex<f64>;

pub const ZERO_C64: c64 = c64 { re: 0.0, im: 0.0 };

pub const I_C64: c64 = c64 { re: 0.0, im: 1.0 };
