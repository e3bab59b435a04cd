use burn::prelude::*;

use super::modules::ConvBnRelu;

/// Shallow high-resolution path: three stride-2 convolutions down to 1/8.
#[derive(Module, Debug)]
pub struct SpatialPath<B: Backend> {
    conv1: ConvBnRelu<B>,
    conv2: ConvBnRelu<B>,
    conv3: ConvBnRelu<B>,
    conv_out: ConvBnRelu<B>,
}

impl<B: Backend> SpatialPath<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            conv1: ConvBnRelu::new(3, 64, 7, 2, 3, device),
            conv2: ConvBnRelu::new(64, 64, 3, 2, 1, device),
            conv3: ConvBnRelu::new(64, 64, 3, 2, 1, device),
            conv_out: ConvBnRelu::new(64, 128, 1, 1, 0, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        self.conv_out.forward(x)
    }

    pub fn macs(&self, input: [usize; 3]) -> (u64, [usize; 3]) {
        [&self.conv1, &self.conv2, &self.conv3, &self.conv_out]
            .into_iter()
            .fold((0, input), |(total, shape), conv| {
                let (macs, shape) = conv.macs(shape);
                (total + macs, shape)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn spatial_path_reaches_stride_eight() {
        let device = Default::default();
        let sp = SpatialPath::<NdArray>::new(&device);

        let x = Tensor::zeros([1, 3, 64, 128], &device);
        assert_eq!(sp.forward(x).dims(), [1, 128, 8, 16]);
        assert_eq!(sp.macs([3, 64, 128]).1, [128, 8, 16]);
    }
}
