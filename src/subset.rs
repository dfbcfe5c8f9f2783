use ndarray::{ArrayD, ArrayViewD, Axis};
use num_traits::Zero;

use crate::nc_utils::NcArray;

/// Represents an error selecting a subset of an array's records.
#[derive(Debug, thiserror::Error)]
pub enum SubsetError {
    #[error("Tried to keep index {index} on an array axis with length {axis_len}")]
    BadIndex { index: usize, axis_len: usize },
}

/// Selects a fixed set of records along one axis of any array.
///
/// The kept indices are decided once (e.g. "records falling in 2003")
/// and can then be applied to every variable that shares the record
/// dimension.
pub struct Subsetter {
    keep_inds: Vec<usize>,
}

impl Subsetter {
    pub fn from_indices(keep_inds: Vec<usize>) -> Self {
        Self { keep_inds }
    }

    pub fn len(&self) -> usize {
        self.keep_inds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keep_inds.is_empty()
    }

    pub fn subset_nd_array<T: Copy + Zero>(
        &self,
        arr: ArrayViewD<T>,
        along_axis: usize,
    ) -> Result<ArrayD<T>, SubsetError> {
        let mut shape = Vec::from_iter(arr.shape().iter().copied());
        if shape.is_empty() {
            // A 0-D array has nothing to subset, return it as-is
            return Ok(arr.to_owned());
        }

        let axis_len = shape[along_axis];
        shape[along_axis] = self.len();

        let mut out = ArrayD::zeros(shape);
        for (i_out, &i_in) in self.keep_inds.iter().enumerate() {
            if i_in >= axis_len {
                return Err(SubsetError::BadIndex {
                    index: i_in,
                    axis_len,
                });
            }
            let mut out_slice = out.index_axis_mut(Axis(along_axis), i_out);
            let in_slice = arr.index_axis(Axis(along_axis), i_in);
            out_slice.assign(&in_slice);
        }
        Ok(out)
    }

    pub fn subset_generic_array(
        &self,
        arr: &NcArray,
        along_axis: usize,
    ) -> Result<NcArray, SubsetError> {
        match arr {
            NcArray::I8(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::I8(arr))
            }
            NcArray::I16(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::I16(arr))
            }
            NcArray::I32(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::I32(arr))
            }
            NcArray::I64(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::I64(arr))
            }
            NcArray::U8(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::U8(arr))
            }
            NcArray::U16(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::U16(arr))
            }
            NcArray::U32(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::U32(arr))
            }
            NcArray::U64(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::U64(arr))
            }
            NcArray::F32(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::F32(arr))
            }
            NcArray::F64(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::F64(arr))
            }
            NcArray::Char(arr) => {
                let arr = self.subset_nd_array(arr.view(), along_axis)?;
                Ok(NcArray::Char(arr))
            }
        }
    }
}
