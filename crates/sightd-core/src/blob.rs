use smallvec::SmallVec;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(dims: &[usize]) -> Self {
        Self(dims.iter().copied().collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }

    pub fn leading_dim(&self) -> Option<usize> {
        self.0.first().copied()
    }
}

/// A dense, row-major f32 tensor. The engines served here are
/// single-precision throughout, like the networks they were exported
/// from, so there is no dtype plumbing.
#[derive(Clone, Debug)]
pub struct Blob {
    shape: Shape,
    data: Vec<f32>,
}

impl Blob {
    /// `data.len()` must equal `shape.numel()`.
    pub fn new(shape: Shape, data: Vec<f32>) -> Self {
        assert_eq!(shape.numel(), data.len(), "blob data does not match shape");
        Self { shape, data }
    }

    pub fn zeros(shape: Shape) -> Self {
        let numel = shape.numel();
        Self {
            shape,
            data: vec![0.0; numel],
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}
