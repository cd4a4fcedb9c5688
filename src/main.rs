use std::io;
use std::time::Instant;

use ndpeak::peak_fitting::PeakModel;
use ndpeak::{FitMethod, FitRegion, FittedPeak, Grid, PeakPicker, PickAndFit};

const POINTS: [usize; 2] = [128, 96];

fn synthetic_spectrum() -> io::Result<Grid<'static>> {
    let peaks = [
        FittedPeak::new(100.0, vec![20.4, 30.2], vec![3.0, 2.5]),
        FittedPeak::new(60.0, vec![64.0, 48.7], vec![2.2, 4.0]),
        FittedPeak::new(-40.0, vec![100.6, 70.1], vec![3.5, 3.5]),
        FittedPeak::new(25.0, vec![90.2, 12.9], vec![2.0, 2.0]),
    ];
    let mut params = Vec::new();
    for peak in peaks.iter() {
        peak.write_parameters(&mut params);
    }
    let region = FitRegion::new(vec![0, 0], POINTS.to_vec());
    // a deterministic ripple standing in for noise
    let data: Vec<f32> = region
        .iter_points()
        .map(|p| {
            let x = [p[0] as f64, p[1] as f64];
            let signal: f64 = params
                .chunks_exact(5)
                .map(|block| PeakModel::Lorentzian.density(&x, block))
                .sum();
            (signal + 0.5 * (x[0] * 0.7).sin() * (x[1] * 1.1).cos()) as f32
        })
        .collect();
    Grid::from_points(&POINTS, data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn main() -> io::Result<()> {
    let grid = synthetic_spectrum()?;
    let picker = PeakPicker::builder()
        .high_threshold(10.0)
        .low_threshold(-10.0)
        .buffer(vec![2, 2])
        .drop_factor(0.1)
        .build();

    let start = Instant::now();
    match picker.find_peaks(&grid) {
        Ok(peaks) => {
            println!(
                "Found {} peaks in {} microseconds",
                peaks.len(),
                (Instant::now() - start).as_micros()
            );
            for peak in peaks.iter() {
                println!("\t{}", peak);
            }
        }
        Err(err) => println!("Encountered error {:?}", err),
    };

    for method in [FitMethod::Parabolic, FitMethod::Lorentzian] {
        let task = PickAndFit::new(picker.clone(), method);
        let start = Instant::now();
        match task.run(&grid, &FitRegion::whole(&grid), &[]) {
            Ok(picked) => {
                println!(
                    "Picked and fit {} peaks with {} in {} microseconds",
                    picked.len(),
                    method,
                    (Instant::now() - start).as_micros()
                );
                for peak in picked.iter() {
                    println!("\t{}", peak);
                }
            }
            Err(err) => println!("Encountered error {:?}", err),
        }
    }
    Ok(())
}
