use std::time::Duration;

use criterion::measurement::Measurement;
use criterion::{black_box, BenchmarkGroup, BenchmarkId, Criterion};
use gifendec::quantize::Quantizer;
use gifendec::{EncodeOptions, Frame, GifDocument};

fn main() {
    #[derive(Clone, Copy)]
    struct BenchDef {
        seed: usize,
        frame_size: u16,
        frame_count: usize,
        sample_size: usize,
    }

    fn run_bench_def<M: Measurement>(group: &mut BenchmarkGroup<M>, def: BenchDef) {
        let frames = std::iter::successors(Some(def.seed), |seed| Some(hash(*seed, 114514)))
            .map(|seed| random_frame(seed, def.frame_size))
            .take(def.frame_count)
            .collect::<Vec<_>>();

        group
            .sample_size(def.sample_size)
            .measurement_time(Duration::from_secs(15))
            .bench_with_input(
                BenchmarkId::from_parameter(format!("{}*{}", def.frame_size, def.frame_count)),
                frames.as_slice(),
                |b, input| b.iter(|| encode_image(input)),
            );
    }

    let mut c = Criterion::default().configure_from_args();
    let mut group = c.benchmark_group("encode");

    run_bench_def(&mut group, BenchDef {
        seed: 42,
        frame_size: 256,
        frame_count: 32,
        sample_size: 50,
    });

    run_bench_def(&mut group, BenchDef {
        seed: 666,
        frame_size: 128,
        frame_count: 128,
        sample_size: 60,
    });

    group.finish();

    let mut group = c.benchmark_group("quantize");
    let rgba = random_rgba(7, 256);
    for speed in [1, 5, 10] {
        let quantizer = Quantizer::new(speed, 256).unwrap();
        group.sample_size(20).bench_with_input(
            BenchmarkId::new("speed", speed),
            rgba.as_slice(),
            |b, input| b.iter(|| Frame::from_rgba_quantized(256, 256, black_box(input), &quantizer, false)),
        );
    }
    group.finish();
    c.final_summary();
}

fn encode_image(frames: &[Frame<'static>]) -> Vec<u8> {
    let mut options = EncodeOptions::new();
    options.set_infinite(true);
    let document = GifDocument::new(frames.to_vec(), &options).unwrap();
    document.to_vec().unwrap()
}

fn hash(seed: usize, salt: usize) -> usize {
    let mut h = seed ^ salt;
    h = h.wrapping_mul(0x9E37_79B9);
    h ^= h >> 29;
    h
}

fn random_rgba(seed: usize, size: u16) -> Vec<u8> {
    let mut state = seed;
    (0..usize::from(size) * usize::from(size))
        .flat_map(|_| {
            state = hash(state, 0x85EB_CA6B);
            [state as u8, (state >> 8) as u8 & 0xF0, (state >> 16) as u8, 255]
        })
        .collect()
}

fn random_frame(seed: usize, size: u16) -> Frame<'static> {
    let palette: Vec<u8> = (0..=255u8).flat_map(|i| [i, i.rotate_left(3), !i]).collect();
    let mut state = seed;
    let mut last = 0u8;
    let pixels: Vec<u8> = (0..usize::from(size) * usize::from(size))
        .map(|_| {
            state = hash(state, 31);
            // short runs keep the LZW table busy without degenerating to noise
            if state % 4 == 0 {
                last = (state >> 8) as u8;
            }
            last
        })
        .collect();
    let mut frame = Frame::from_palette_pixels(size, size, pixels, palette, None);
    frame.delay = (seed % 50) as u16;
    frame
}
