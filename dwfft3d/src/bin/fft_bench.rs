use dwfft3d::{Direction, FFTConfig, ProcessingUnit, FFT3D};
use dwmpi::SerialComm;
use fftgrid::FFTGrid;
use std::time::Instant;
use types::c64;
use zcolumns::GvecPartition;

const NLOOP: usize = 10;

fn main() {
    env_logger::init();

    // grid size and processing unit from the command line: fft_bench [n] [cpu|gpu]
    let args: Vec<String> = std::env::args().collect();

    let n = args.get(1).and_then(|s| s.parse::<usize>().ok()).unwrap_or(64);

    let pu = match args.get(2).map(|s| s.as_str()) {
        Some("gpu") => ProcessingUnit::Gpu,
        _ => ProcessingUnit::Cpu,
    };

    let n = fftgrid::good_fft_size(n);
    let grid = FFTGrid::new(n, n, n);

    let config = FFTConfig::from_env();

    let mut fft = match FFT3D::with_config(grid, SerialComm, pu, config) {
        Ok(fft) => fft,
        Err(e) => {
            eprintln!("cannot create FFT3D: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", fft);

    // coefficients inside the sphere inscribed in the grid, as a density would use
    let gmax = (n / 2) as f64 - 1.0;

    for reduced in [false, true] {
        let partition = match GvecPartition::sphere(grid, gmax, reduced, 1) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("cannot build coefficient partition: {}", e);
                std::process::exit(1);
            }
        };

        println!(
            "   reduced = {:5}  columns = {:8}  coefficients = {:10}",
            reduced,
            partition.num_zcol(),
            partition.num_gvec()
        );

        if let Err(e) = run(&mut fft, &partition) {
            eprintln!("transform failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(fft: &mut FFT3D, partition: &GvecPartition) -> Result<(), dwfft3d::FFT3DError> {
    fft.prepare(partition)?;

    let mut coef: Vec<c64> = (0..partition.num_gvec())
        .map(|i| c64::new(1.0 / (1.0 + i as f64), 0.0))
        .collect();

    let mut coef2 = coef.clone();

    // warm-up builds the stage buffers
    fft.transform(Direction::Backward, partition, &mut coef)?;
    fft.transform(Direction::Forward, partition, &mut coef)?;

    let stopwatch = Instant::now();

    for _ in 0..NLOOP {
        fft.transform(Direction::Backward, partition, &mut coef)?;
        fft.transform(Direction::Forward, partition, &mut coef)?;
    }

    println!(
        "   single field : {:10.3} ms per backward + forward",
        stopwatch.elapsed().as_secs_f64() * 1000.0 / NLOOP as f64
    );

    if partition.reduced() {
        let stopwatch = Instant::now();

        for _ in 0..NLOOP {
            fft.transform_pair(Direction::Backward, partition, &mut coef, &mut coef2)?;
            fft.transform_pair(Direction::Forward, partition, &mut coef, &mut coef2)?;
        }

        println!(
            "   field pair   : {:10.3} ms per backward + forward",
            stopwatch.elapsed().as_secs_f64() * 1000.0 / NLOOP as f64
        );
    }

    fft.dismiss();

    Ok(())
}
