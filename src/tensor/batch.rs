/// Row-major feature matrix of shape `[N, ...feature_dims]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBatch {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl FeatureBatch {
    /// Build a batch of `rows` samples with per-sample `dims`.
    ///
    /// Returns `None` when `data` does not hold exactly `rows * prod(dims)` values.
    pub fn new(rows: usize, dims: &[usize], data: Vec<f32>) -> Option<Self> {
        let row_len: usize = dims.iter().product();
        if data.len() != rows * row_len {
            return None;
        }
        let mut shape = Vec::with_capacity(dims.len() + 1);
        shape.push(rows);
        shape.extend_from_slice(dims);
        Some(Self { shape, data })
    }

    /// Full shape including the leading batch axis.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    pub fn row_len(&self) -> usize {
        self.shape[1..].iter().product()
    }

    pub fn row(&self, index: usize) -> &[f32] {
        let len = self.row_len();
        &self.data[index * len..(index + 1) * len]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// One-hot label matrix of shape `[N, output_units]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelBatch {
    width: usize,
    classes: Vec<usize>,
}

impl LabelBatch {
    /// Build from class indices. Returns `None` if any index is out of range.
    pub fn from_classes(classes: Vec<usize>, width: usize) -> Option<Self> {
        if classes.iter().any(|&class| class >= width) {
            return None;
        }
        Some(Self { width, classes })
    }

    pub fn rows(&self) -> usize {
        self.classes.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn class_index(&self, row: usize) -> usize {
        self.classes[row]
    }

    /// Value at `(row, column)`: 1.0 for the row's class, 0.0 elsewhere.
    pub fn value(&self, row: usize, column: usize) -> f32 {
        if self.classes[row] == column { 1.0 } else { 0.0 }
    }

    /// Materialize one row.
    pub fn row(&self, row: usize) -> Vec<f32> {
        (0..self.width).map(|column| self.value(row, column)).collect()
    }
}
