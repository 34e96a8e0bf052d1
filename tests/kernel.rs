mod common;

use common::{random_activations, random_weights, reference_conv, rng};
use proptest::prelude::*;
use rand::Rng;
use qconv::{
    Conv2dGeometry, PackedWeights, QconvError, TilePolicy, bias_to_fixed, conv2d_f32, conv2d_q610,
    conv2d_q610_with, dequantize_slice, kernel::Int8Weights, multiplier, pack_software, quantize,
};

fn run(
    x: &[i16],
    w: &[i8],
    bias: Option<&[i32]>,
    mult: u32,
    g: &Conv2dGeometry,
    policy: TilePolicy,
) -> Vec<i16> {
    let shape = g.weight_shape();
    let words = pack_software(w, shape).unwrap();
    let packed = PackedWeights::new(&words, shape).unwrap();
    let mut y = vec![0i16; g.output_len()];
    conv2d_q610_with(x, &packed, bias, mult, g, &mut y, policy).unwrap();
    y
}

fn geometry() -> impl Strategy<Value = Conv2dGeometry> {
    (
        1usize..5,  // in channels
        1usize..20, // height
        1usize..20, // width
        1usize..40, // out channels
        1usize..6,  // kernel
        1usize..4,  // stride
        0usize..3,  // pad
        1usize..3,  // batch
    )
        .prop_filter_map("kernel larger than padded input", |(ic, h, w, oc, k, s, p, n)| {
            let g = Conv2dGeometry::new(ic, h, w, oc, k, s, p).with_batch(n);
            g.validate().ok().map(|_| g)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tiled_kernel_matches_direct_convolution(g in geometry(), seed in any::<u64>(), with_bias in any::<bool>()) {
        let mut r = rng(seed);
        let x = random_activations(&mut r, g.input_len(), 4096);
        let w = random_weights(&mut r, g.weight_shape().len());
        let bias: Vec<i32> = (0..g.out_channels).map(|i| i as i32 * 977 - 9000).collect();
        let bias = with_bias.then_some(&bias[..]);
        let mult = multiplier(0.02);

        let expected = reference_conv(&x, &w, bias, mult, &g);
        prop_assert_eq!(run(&x, &w, bias, mult, &g, TilePolicy::Auto), expected.clone());
        prop_assert_eq!(run(&x, &w, bias, mult, &g, TilePolicy::ForceBoundary), expected);
    }

    #[test]
    fn accumulation_wraps_like_the_hardware(seed in any::<u64>()) {
        // 64 input channels of full-scale activations overflow i32 on purpose.
        let g = Conv2dGeometry::new(64, 3, 3, 4, 3, 1, 1);
        let mut r = rng(seed);
        let x: Vec<i16> = (0..g.input_len()).map(|i| if i % 3 == 0 { i16::MIN } else { i16::MAX }).collect();
        let w: Vec<i8> = (0..g.weight_shape().len()).map(|_| if r.gen_bool(0.5) { -128 } else { 127 }).collect();
        let expected = reference_conv(&x, &w, None, 3, &g);
        prop_assert_eq!(run(&x, &w, None, 3, &g, TilePolicy::Auto), expected);
    }
}

#[test]
fn pointwise_layers_match_direct_convolution() {
    let mut r = rng(7);
    for (stride, w_in) in [(1, 17), (1, 16), (2, 17), (3, 9)] {
        let g = Conv2dGeometry::new(6, 11, w_in, 35, 1, stride, 0);
        let x = random_activations(&mut r, g.input_len(), i16::MAX);
        let w = random_weights(&mut r, g.weight_shape().len());
        let expected = reference_conv(&x, &w, None, multiplier(0.004), &g);
        assert_eq!(
            run(&x, &w, None, multiplier(0.004), &g, TilePolicy::Auto),
            expected,
            "stride {stride} width {w_in}"
        );
    }
}

#[test]
fn pointwise_handles_odd_offsets_into_the_input() {
    // Second image of a batch starts at an odd element offset.
    let g = Conv2dGeometry::new(1, 3, 5, 4, 1, 1, 0).with_batch(2);
    let mut r = rng(11);
    let x = random_activations(&mut r, g.input_len(), 2048);
    let w = random_weights(&mut r, g.weight_shape().len());
    let expected = reference_conv(&x, &w, None, 65536, &g);
    assert_eq!(run(&x, &w, None, 65536, &g, TilePolicy::Auto), expected);
}

#[test]
fn first_layer_matches_float_convolution() {
    // 3x64x64 image, 16 filters of 6x6, stride 2, pad 2.
    let g = Conv2dGeometry::new(3, 64, 64, 16, 6, 2, 2);
    assert_eq!((g.out_h(), g.out_w()), (32, 32));
    let scale = 1.0 / 256.0;
    let mut r = rng(2024);

    let x = random_activations(&mut r, g.input_len(), 1024);
    let w = random_weights(&mut r, g.weight_shape().len());
    let bias_f: Vec<f32> = (0..16).map(|i| (i as f32 - 8.0) / 16.0).collect();
    let bias_q: Vec<i32> = bias_f.iter().map(|&b| bias_to_fixed(Some(b), scale)).collect();

    let mut fixed = vec![0i16; g.output_len()];
    let words = pack_software(&w, g.weight_shape()).unwrap();
    let packed = PackedWeights::new(&words, g.weight_shape()).unwrap();
    conv2d_q610(&x, &packed, Some(&bias_q[..]), multiplier(scale), &g, &mut fixed).unwrap();

    let mut xf = vec![0f32; x.len()];
    dequantize_slice(&x, &mut xf).unwrap();
    let taps = Int8Weights::new(&w, scale, g.weight_shape()).unwrap();
    let mut yf = vec![0f32; g.output_len()];
    conv2d_f32(&xf, &taps, Some(&bias_f[..]), &g, &mut yf).unwrap();

    for (i, (&q, &f)) in fixed.iter().zip(&yf).enumerate() {
        let diff = (q as i32 - quantize(f) as i32).abs();
        assert!(diff <= 2, "element {i}: fixed {q}, float {f}");
    }
}

#[test]
fn rejected_arguments_leave_the_output_alone() {
    let g = Conv2dGeometry::new(2, 4, 4, 5, 3, 1, 1);
    let w = vec![1i8; g.weight_shape().len()];
    let words = pack_software(&w, g.weight_shape()).unwrap();
    let packed = PackedWeights::new(&words, g.weight_shape()).unwrap();
    let x = vec![0i16; g.input_len()];
    let mut y = vec![99i16; g.output_len()];

    let short_bias = [0i32; 4];
    assert!(matches!(
        conv2d_q610(&x, &packed, Some(&short_bias[..]), 1, &g, &mut y),
        Err(QconvError::ShapeMismatch { expected: 5, actual: 4 })
    ));
    assert_eq!(
        conv2d_q610(&x, &packed, None, 1, &g.with_groups(2), &mut y),
        Err(QconvError::UnsupportedGroups(2))
    );
    assert_eq!(
        conv2d_q610(&x, &packed, None, 1, &g.with_stride(0, 1), &mut y),
        Err(QconvError::InvalidGeometry)
    );
    assert!(conv2d_q610(&x[1..], &packed, None, 1, &g, &mut y).is_err());
    assert!(y.iter().all(|&v| v == 99));
}
