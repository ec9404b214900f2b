//! Dense tensors and the lowering of convolutions to matrix multiplies
//!
//! Tensors are row-major. Feature maps use NHWC layout, convolution kernels
//! use HWIO layout, so an im2col patch matrix (M x K) multiplied by the
//! kernel reshaped to K x N yields the NHWC output directly.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// A dense row-major f32 tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> SimResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(SimError::mismatch(
                format!("{} elements for shape {:?}", expected, shape),
                format!("{} elements", data.len()),
            ));
        }
        Ok(Self { shape, data })
    }

    /// Tensor with every element set to `value`
    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::filled(shape, 0.0)
    }

    /// Tensor whose elements are produced from their flat index
    pub fn from_fn(shape: Vec<usize>, f: impl FnMut(usize) -> f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: (0..len).map(f).collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Dimensions of a rank 4 tensor
    pub fn dims4(&self) -> SimResult<(usize, usize, usize, usize)> {
        match self.shape.as_slice() {
            &[a, b, c, d] => Ok((a, b, c, d)),
            other => Err(SimError::invalid_shape(format!(
                "expected a rank 4 tensor, got shape {:?}",
                other
            ))),
        }
    }

    /// Dimensions of a rank 2 tensor
    pub fn dims2(&self) -> SimResult<(usize, usize)> {
        match self.shape.as_slice() {
            &[a, b] => Ok((a, b)),
            other => Err(SimError::invalid_shape(format!(
                "expected a rank 2 tensor, got shape {:?}",
                other
            ))),
        }
    }

    /// Copy of the channels `start..end` of the last axis
    pub fn slice_last_axis(&self, start: usize, end: usize) -> SimResult<Tensor> {
        let channels = *self
            .shape
            .last()
            .ok_or_else(|| SimError::invalid_shape("cannot slice a scalar tensor"))?;
        if start > end || end > channels {
            return Err(SimError::invalid_shape(format!(
                "channel range {}..{} out of bounds for {} channels",
                start, end, channels
            )));
        }

        let mut shape = self.shape.clone();
        let rank = shape.len();
        shape[rank - 1] = end - start;
        let data = if channels == 0 {
            Vec::new()
        } else {
            self.data
                .chunks_exact(channels)
                .flat_map(|row| row[start..end].iter().copied())
                .collect()
        };
        Tensor::new(shape, data)
    }

    /// Concatenate tensors along their last axis
    pub fn concat_last_axis(parts: &[Tensor]) -> SimResult<Tensor> {
        let first = parts
            .first()
            .ok_or_else(|| SimError::invalid_shape("nothing to concatenate"))?;
        let rank = first.shape.len();
        if rank == 0 {
            return Err(SimError::invalid_shape("cannot concatenate scalar tensors"));
        }
        let outer = &first.shape[..rank - 1];
        for part in parts {
            if part.shape.len() != rank || &part.shape[..rank - 1] != outer {
                return Err(SimError::mismatch(
                    format!("leading dimensions {:?}", outer),
                    format!("shape {:?}", part.shape),
                ));
            }
        }

        let rows: usize = outer.iter().product();
        let widths: Vec<usize> = parts.iter().map(|p| p.shape[rank - 1]).collect();
        let total: usize = widths.iter().sum();

        let mut data = Vec::with_capacity(rows * total);
        for row in 0..rows {
            for (part, &width) in parts.iter().zip(&widths) {
                data.extend_from_slice(&part.data[row * width..(row + 1) * width]);
            }
        }

        let mut shape = outer.to_vec();
        shape.push(total);
        Tensor::new(shape, data)
    }

    /// Largest absolute elementwise difference to another tensor of equal shape
    pub fn max_abs_diff(&self, other: &Tensor) -> Option<f32> {
        if self.shape != other.shape {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max),
        )
    }
}

/// Convolution padding scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Zero padding so that output = ceil(input / stride)
    #[default]
    Same,
    /// No padding; every window lies inside the input
    Valid,
}

impl std::fmt::Display for Padding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Padding::Same => write!(f, "SAME"),
            Padding::Valid => write!(f, "VALID"),
        }
    }
}

impl std::str::FromStr for Padding {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "same" => Ok(Padding::Same),
            "valid" => Ok(Padding::Valid),
            other => Err(SimError::invalid_config(format!(
                "unknown padding '{}', expected SAME or VALID",
                other
            ))),
        }
    }
}

/// Output length and leading padding of one windowed dimension
pub fn windowed_output_size(
    input: usize,
    kernel: usize,
    stride: usize,
    padding: Padding,
) -> SimResult<(usize, usize)> {
    if kernel == 0 || stride == 0 {
        return Err(SimError::invalid_shape(format!(
            "kernel size and stride must be positive, got kernel {} stride {}",
            kernel, stride
        )));
    }
    match padding {
        Padding::Valid => {
            if input < kernel {
                return Err(SimError::invalid_shape(format!(
                    "VALID padding needs input {} >= kernel {}",
                    input, kernel
                )));
            }
            Ok(((input - kernel) / stride + 1, 0))
        }
        Padding::Same => {
            let output = input.div_ceil(stride);
            let needed = ((output.saturating_sub(1)) * stride + kernel).saturating_sub(input);
            Ok((output, needed / 2))
        }
    }
}

/// Geometry of a 2-D convolution lowered to a matrix multiply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvGeometry {
    pub batch: usize,
    pub input_height: usize,
    pub input_width: usize,
    pub input_channels: usize,
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub stride_height: usize,
    pub stride_width: usize,
    pub output_height: usize,
    pub output_width: usize,
    pub pad_top: usize,
    pub pad_left: usize,
}

impl ConvGeometry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        batch: usize,
        input_height: usize,
        input_width: usize,
        input_channels: usize,
        kernel_height: usize,
        kernel_width: usize,
        strides: (usize, usize),
        padding: Padding,
    ) -> SimResult<Self> {
        let (output_height, pad_top) =
            windowed_output_size(input_height, kernel_height, strides.0, padding)?;
        let (output_width, pad_left) =
            windowed_output_size(input_width, kernel_width, strides.1, padding)?;
        Ok(Self {
            batch,
            input_height,
            input_width,
            input_channels,
            kernel_height,
            kernel_width,
            stride_height: strides.0,
            stride_width: strides.1,
            output_height,
            output_width,
            pad_top,
            pad_left,
        })
    }

    /// Rows of the patch matrix: one per output position
    pub fn output_positions(&self) -> usize {
        self.batch * self.output_height * self.output_width
    }

    /// Columns of the patch matrix
    pub fn patch_size(&self) -> usize {
        self.kernel_height * self.kernel_width * self.input_channels
    }
}

/// Lower an NHWC feature map to its im2col patch matrix (positions x patch)
pub fn im2col(input: &Tensor, geometry: &ConvGeometry) -> SimResult<Vec<f32>> {
    let (n, h, w, c) = input.dims4()?;
    if (n, h, w, c)
        != (
            geometry.batch,
            geometry.input_height,
            geometry.input_width,
            geometry.input_channels,
        )
    {
        return Err(SimError::mismatch(
            format!(
                "input ({}, {}, {}, {})",
                geometry.batch, geometry.input_height, geometry.input_width, geometry.input_channels
            ),
            format!("({}, {}, {}, {})", n, h, w, c),
        ));
    }

    let patch = geometry.patch_size();
    let mut matrix = vec![0.0f32; geometry.output_positions() * patch];
    let data = input.data();

    let mut row = 0;
    for b in 0..n {
        for oy in 0..geometry.output_height {
            for ox in 0..geometry.output_width {
                let dest = &mut matrix[row * patch..(row + 1) * patch];
                let origin_y = (oy * geometry.stride_height) as isize - geometry.pad_top as isize;
                let origin_x = (ox * geometry.stride_width) as isize - geometry.pad_left as isize;

                for ky in 0..geometry.kernel_height {
                    let iy = origin_y + ky as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for kx in 0..geometry.kernel_width {
                        let ix = origin_x + kx as isize;
                        if ix < 0 || ix >= w as isize {
                            continue;
                        }
                        let src = ((b * h + iy as usize) * w + ix as usize) * c;
                        let offset = (ky * geometry.kernel_width + kx) * c;
                        dest[offset..offset + c].copy_from_slice(&data[src..src + c]);
                    }
                }
                row += 1;
            }
        }
    }

    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_checks_length() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_padding_names() {
        assert_eq!("SAME".parse::<Padding>().unwrap(), Padding::Same);
        assert_eq!("valid".parse::<Padding>().unwrap(), Padding::Valid);
        assert_eq!(Padding::Valid.to_string(), "VALID");
        assert!("full".parse::<Padding>().is_err());
    }

    #[test]
    fn test_windowed_output_size() {
        assert_eq!(windowed_output_size(224, 7, 2, Padding::Same).unwrap(), (112, 2));
        assert_eq!(windowed_output_size(224, 7, 2, Padding::Valid).unwrap(), (109, 0));
        assert_eq!(windowed_output_size(5, 3, 1, Padding::Same).unwrap(), (5, 1));
        assert!(windowed_output_size(2, 3, 1, Padding::Valid).is_err());
        assert!(windowed_output_size(4, 3, 0, Padding::Same).is_err());
    }

    #[test]
    fn test_slice_and_concat() {
        // 2 rows x 4 channels
        let t = Tensor::new(vec![2, 4], (0..8).map(|v| v as f32).collect()).unwrap();
        let left = t.slice_last_axis(0, 2).unwrap();
        let right = t.slice_last_axis(2, 4).unwrap();
        assert_eq!(left.data(), &[0.0, 1.0, 4.0, 5.0]);
        assert_eq!(right.data(), &[2.0, 3.0, 6.0, 7.0]);

        let joined = Tensor::concat_last_axis(&[left, right]).unwrap();
        assert_eq!(joined, t);
    }

    #[test]
    fn test_concat_rejects_mismatched_rows() {
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![3, 3]);
        assert!(Tensor::concat_last_axis(&[a, b]).is_err());
    }

    #[test]
    fn test_im2col_same_padding() {
        // 1x3x3x1 input with values 1..=9, 3x3 kernel, SAME padding
        let input = Tensor::new(vec![1, 3, 3, 1], (1..=9).map(|v| v as f32).collect()).unwrap();
        let geometry = ConvGeometry::new(1, 3, 3, 1, 3, 3, (1, 1), Padding::Same).unwrap();
        let matrix = im2col(&input, &geometry).unwrap();

        assert_eq!(geometry.output_positions(), 9);
        assert_eq!(matrix.len(), 81);
        // Top-left window: padding on the top row and left column
        assert_eq!(
            &matrix[0..9],
            &[0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 4.0, 5.0]
        );
        // Centre window sees the whole input
        let centre: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        assert_eq!(&matrix[4 * 9..5 * 9], centre.as_slice());
    }

    #[test]
    fn test_im2col_rejects_wrong_input() {
        let input = Tensor::zeros(vec![1, 4, 4, 2]);
        let geometry = ConvGeometry::new(1, 4, 4, 3, 1, 1, (1, 1), Padding::Valid).unwrap();
        assert!(im2col(&input, &geometry).is_err());
    }
}
