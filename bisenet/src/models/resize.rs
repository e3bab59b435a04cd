//! Spatial resizing built from matmuls and index selection, so that the backward pass
//! runs on every backend.

use burn::prelude::*;

/// Resizes the spatial dims of `x` to `size`.
///
/// # Shapes
///   - input: `[batch_size, channels, height, width]`
///   - output: `[batch_size, channels, size[0], size[1]]`
pub fn resize_bilinear<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [n, c, h, w] = x.dims();
    let [out_h, out_w] = size;
    if [h, w] == size {
        return x;
    }
    let device = x.device();

    // Columns: [n*c*h, w] x [w, out_w]
    let cols = interpolation_matrix::<B>(w, out_w, &device).transpose();
    let x = x.reshape([n * c * h, w]).matmul(cols);

    // Rows: [n*c*out_w, h] x [h, out_h]
    let rows = interpolation_matrix::<B>(h, out_h, &device).transpose();
    let x = x
        .reshape([n * c, h, out_w])
        .swap_dims(1, 2)
        .reshape([n * c * out_w, h])
        .matmul(rows);

    x.reshape([n * c, out_w, out_h])
        .swap_dims(1, 2)
        .reshape([n, c, out_h, out_w])
}

/// Nearest-neighbour resize: output pixel `o` copies input `floor(o * input / output)`.
pub fn resize_nearest<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    let [out_h, out_w] = size;
    if [h, w] == size {
        return x;
    }
    let device = x.device();

    let rows = Tensor::from_data(TensorData::new(nearest_indices(h, out_h), [out_h]), &device);
    let cols = Tensor::from_data(TensorData::new(nearest_indices(w, out_w), [out_w]), &device);
    x.select(2, rows).select(3, cols)
}

fn nearest_indices(input: usize, output: usize) -> Vec<i64> {
    (0..output)
        .map(|o| ((o * input / output).min(input - 1)) as i64)
        .collect()
}

/// `[output, input]` matrix whose rows hold the two linear interpolation weights.
fn interpolation_matrix<B: Backend>(
    input: usize,
    output: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(
        TensorData::new(interpolation_weights(input, output), [output, input]),
        device,
    )
}

fn interpolation_weights(input: usize, output: usize) -> Vec<f32> {
    let mut weights = vec![0.0f32; output * input];
    let ratio = if output > 1 {
        (input - 1) as f64 / (output - 1) as f64
    } else {
        0.0
    };

    for o in 0..output {
        let pos = o as f64 * ratio;
        let lo = (pos.floor() as usize).min(input - 1);
        let hi = (lo + 1).min(input - 1);
        let frac = (pos - lo as f64) as f32;
        weights[o * input + lo] += 1.0 - frac;
        weights[o * input + hi] += frac;
    }

    weights
}
