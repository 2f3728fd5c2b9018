/// A vector with dense storage but sparse iteration.
///
/// Values are accumulated into a dense array while a side list remembers which
/// positions were touched, so clearing and iterating cost O(nnz) rather than
/// O(len). Used for the pivot row gathered across non-basic columns.
#[derive(Clone, Debug)]
pub(crate) struct ScatteredVec {
    values: Vec<f64>,
    is_nonzero: Vec<bool>,
    nonzero: Vec<usize>,
}

impl ScatteredVec {
    pub(crate) fn empty(n: usize) -> ScatteredVec {
        ScatteredVec {
            values: vec![0.0; n],
            is_nonzero: vec![false; n],
            nonzero: vec![],
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &f64)> {
        self.nonzero.iter().map(move |&i| (i, &self.values[i]))
    }

    pub(crate) fn clear(&mut self) {
        for &i in &self.nonzero {
            self.values[i] = 0.0;
            self.is_nonzero[i] = false;
        }
        self.nonzero.clear();
    }

    pub(crate) fn clear_and_resize(&mut self, n: usize) {
        self.clear();
        self.values.resize(n, 0.0);
        self.is_nonzero.resize(n, false);
    }

    #[cfg(test)]
    pub(crate) fn get(&self, i: usize) -> f64 {
        self.values[i]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, i: usize) -> &mut f64 {
        if !self.is_nonzero[i] {
            self.is_nonzero[i] = true;
            self.nonzero.push(i);
        }
        &mut self.values[i]
    }
}
