use std::{io, sync::mpsc, thread, time::Duration};

use gifendec::{DecodeOptions, DisposalMethod, Encoder, Frame, Repeat};

/// Three frames with a local table, transparency and interlacing.
fn animation() -> Vec<u8> {
    let global: Vec<u8> = (0..8u8).flat_map(|i| [i * 32, i * 16, 255 - i * 32]).collect();
    let mut encoder = Encoder::new(Vec::new(), 32, 24, &global).unwrap();
    encoder.set_repeat(Repeat::Infinite).unwrap();
    for n in 0..3u16 {
        let pixels: Vec<u8> = (0..32 * 24u16).map(|i| ((i / 5 + n) % 8) as u8).collect();
        let mut frame = if n == 1 {
            Frame::from_palette_pixels(32, 24, pixels, global.clone(), Some(3))
        } else {
            Frame::from_indexed_pixels(32, 24, pixels, None)
        };
        frame.delay = 7;
        frame.interlaced = n == 2;
        frame.dispose = DisposalMethod::Background;
        encoder.write_frame(&frame).unwrap();
    }
    encoder.into_inner().unwrap()
}

#[test]
fn decode_finishes_in_time() {
    let data = animation();
    decode_on_timer(data.clone());
    let mut garbage = data;
    for i in (20..garbage.len()).step_by(7) {
        garbage[i] ^= 0x5A;
    }
    decode_on_timer(garbage);
}

fn decode_on_timer(data: Vec<u8>) {
    let (send, recv) = mpsc::channel();

    thread::spawn(move || {
        let result = decode(&data);
        send.send(result).expect("still waiting");
    });

    let _ = recv.recv_timeout(Duration::from_secs(1)).expect("any result");
}

fn decode(data: &[u8]) -> Result<usize, gifendec::DecodingError> {
    let mut decoder = DecodeOptions::new().read_info(data)?;
    let mut frames = 0;
    while let Some(_frame) = decoder.read_next_frame()? {
        frames += 1;
    }
    Ok(frames)
}

#[test]
fn test_truncated_file() {
    let data = animation();
    for len in 0..data.len() - 1 {
        let truncated = &data[..len];
        // it's expected to fail often, but should not stall or panic
        if let Ok(d) = DecodeOptions::new().read_info(truncated) {
            let _ = d.into_iter().count();
        }
        assert!(decode(truncated).is_err(), "length {len}");
    }
}

#[test]
fn one_byte_at_a_time() {
    let data = animation();
    let r = OneByte { data: &data };
    let frames = DecodeOptions::new()
        .read_info(r)
        .unwrap()
        .into_iter()
        .enumerate()
        .map(|(n, f)| f.expect(&n.to_string()))
        .count();
    assert_eq!(frames, 3);
}

struct OneByte<'a> {
    data: &'a [u8],
}

impl io::Read for OneByte<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.len().min(buf.len()).min(1);
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}
