// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

use libfuzzer_sys::fuzz_target;
use sdar_core::{DetectorConfig, Sdar, TwoStageDetector};

fn decode_value(bytes: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
    let value = f64::from_le_bytes(raw);
    if value.is_finite() {
        value.clamp(-1.0e9, 1.0e9)
    } else {
        0.0
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    let term = usize::from(data[0] % 8) + 1;
    let r = 0.001 + (f64::from(data[1]) / 255.0) * 0.998;

    let Ok(mut model) = Sdar::new(term, r) else {
        return;
    };
    let config = DetectorConfig {
        outlier_term: term,
        outlier_discount: r,
        score_term: term,
        score_discount: r,
        smooth_term: usize::from(data[2] % 8) + 1,
    };
    let Ok(mut detector) = TwoStageDetector::new(&config) else {
        return;
    };

    for chunk in data[3..].chunks(8) {
        let x = decode_value(chunk);
        let (_prediction, sigma) = model.next(x);
        assert!(sigma >= 0.0 || sigma.is_nan());
        detector.observe(x);
    }
});
