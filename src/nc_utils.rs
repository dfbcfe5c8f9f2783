use ndarray::{ArrayD, Axis};
use netcdf::{
    types::{FloatType, IntType},
    Extent, Extents,
};

/// A type that can hold a variety of arrays that might be stored
/// in a netCDF file. It is best created by reading from a netCDF
/// variable with its `get_from` method.
pub enum NcArray {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Char(ArrayD<u8>),
}

/// Build the extents covering all of an array with the given shape.
///
/// Unlike [`Extents::All`], this works when writing along an unlimited
/// dimension whose current length is shorter than the data.
pub fn full_extents(shape: &[usize]) -> Extents {
    let extents: Vec<Extent> = shape.iter().map(|&n| Extent::from(0..n)).collect();
    extents.into()
}

impl NcArray {
    /// Retrieve data from a netCDF variable and construct the appropriate variant.
    ///
    /// # Panics
    /// Compound, opaque, enum, string, and variable length types are not
    /// supported, and may never be, due to their rarity in gridded products.
    pub fn get_from(var: &netcdf::Variable) -> netcdf::Result<Self> {
        match var.vartype() {
            netcdf::types::NcVariableType::Compound(_) => {
                unimplemented!("reading netCDF Compound types as a generic array")
            }
            netcdf::types::NcVariableType::Opaque(_) => {
                unimplemented!("reading netCDF Opaque types as a generic array")
            }
            netcdf::types::NcVariableType::Enum(_) => {
                unimplemented!("reading netCDF Enum types as a generic array")
            }
            netcdf::types::NcVariableType::Vlen(_) => {
                unimplemented!("reading netCDF variable length types as a generic array")
            }
            netcdf::types::NcVariableType::String => {
                unimplemented!("reading netCDF String types as a generic array")
            }
            netcdf::types::NcVariableType::Int(IntType::I8) => {
                let values = var.get::<i8, _>(Extents::All)?;
                Ok(Self::I8(values))
            }
            netcdf::types::NcVariableType::Int(IntType::I16) => {
                let values = var.get::<i16, _>(Extents::All)?;
                Ok(Self::I16(values))
            }
            netcdf::types::NcVariableType::Int(IntType::I32) => {
                let values = var.get::<i32, _>(Extents::All)?;
                Ok(Self::I32(values))
            }
            netcdf::types::NcVariableType::Int(IntType::I64) => {
                let values = var.get::<i64, _>(Extents::All)?;
                Ok(Self::I64(values))
            }
            netcdf::types::NcVariableType::Int(IntType::U8) => {
                let values = var.get::<u8, _>(Extents::All)?;
                Ok(Self::U8(values))
            }
            netcdf::types::NcVariableType::Int(IntType::U16) => {
                let values = var.get::<u16, _>(Extents::All)?;
                Ok(Self::U16(values))
            }
            netcdf::types::NcVariableType::Int(IntType::U32) => {
                let values = var.get::<u32, _>(Extents::All)?;
                Ok(Self::U32(values))
            }
            netcdf::types::NcVariableType::Int(IntType::U64) => {
                let values = var.get::<u64, _>(Extents::All)?;
                Ok(Self::U64(values))
            }
            netcdf::types::NcVariableType::Float(FloatType::F32) => {
                let values = var.get::<f32, _>(Extents::All)?;
                Ok(Self::F32(values))
            }
            netcdf::types::NcVariableType::Float(FloatType::F64) => {
                let values = var.get::<f64, _>(Extents::All)?;
                Ok(Self::F64(values))
            }
            netcdf::types::NcVariableType::Char => {
                let values = var.get::<u8, _>(Extents::All)?;
                Ok(Self::Char(values))
            }
        }
    }

    /// Create a variable at the root of a netCDF file and write this data to it.
    /// Since this writes data, if you need to set options on the variable
    /// that must be done pre-write (e.g., a fill value), you must match
    /// on this enum's variants and create the variable yourself.
    pub fn put_to<'f>(
        &self,
        ds: &'f mut netcdf::FileMut,
        name: &str,
        dims: &[&str],
    ) -> netcdf::Result<netcdf::VariableMut<'f>> {
        let extents = full_extents(self.shape());
        match self {
            NcArray::I8(arr) => {
                let mut var = ds.add_variable::<i8>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::I16(arr) => {
                let mut var = ds.add_variable::<i16>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::I32(arr) => {
                let mut var = ds.add_variable::<i32>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::I64(arr) => {
                let mut var = ds.add_variable::<i64>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::U8(arr) => {
                let mut var = ds.add_variable::<u8>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::U16(arr) => {
                let mut var = ds.add_variable::<u16>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::U32(arr) => {
                let mut var = ds.add_variable::<u32>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::U64(arr) => {
                let mut var = ds.add_variable::<u64>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::F32(arr) => {
                let mut var = ds.add_variable::<f32>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::F64(arr) => {
                let mut var = ds.add_variable::<f64>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
            NcArray::Char(arr) => {
                let mut var = ds.add_variable::<u8>(name, dims)?;
                var.put(arr.view(), extents)?;
                Ok(var)
            }
        }
    }

    /// Concatenate several arrays of the same variant along `axis`.
    ///
    /// Fails if the list is empty, the variants differ, or the shapes
    /// are incompatible off-axis.
    pub fn concat(parts: Vec<NcArray>, axis: usize) -> netcdf::Result<Self> {
        let mut it = parts.into_iter();
        let first = it.next().ok_or_else(|| {
            netcdf::Error::Str("cannot concatenate an empty list of arrays".to_string())
        })?;
        match first {
            NcArray::I8(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::I8(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::I8(concat_typed(&typed, axis)?))
            }
            NcArray::I16(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::I16(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::I16(concat_typed(&typed, axis)?))
            }
            NcArray::I32(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::I32(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::I32(concat_typed(&typed, axis)?))
            }
            NcArray::I64(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::I64(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::I64(concat_typed(&typed, axis)?))
            }
            NcArray::U8(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::U8(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::U8(concat_typed(&typed, axis)?))
            }
            NcArray::U16(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::U16(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::U16(concat_typed(&typed, axis)?))
            }
            NcArray::U32(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::U32(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::U32(concat_typed(&typed, axis)?))
            }
            NcArray::U64(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::U64(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::U64(concat_typed(&typed, axis)?))
            }
            NcArray::F32(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::F32(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::F32(concat_typed(&typed, axis)?))
            }
            NcArray::F64(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::F64(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::F64(concat_typed(&typed, axis)?))
            }
            NcArray::Char(arr) => {
                let mut typed = vec![arr];
                for part in it {
                    match part {
                        NcArray::Char(a) => typed.push(a),
                        _ => return Err(variant_mismatch()),
                    }
                }
                Ok(NcArray::Char(concat_typed(&typed, axis)?))
            }
        }
    }

    /// The shape of the contained array.
    pub fn shape(&self) -> &[usize] {
        match self {
            NcArray::I8(arr) => arr.shape(),
            NcArray::I16(arr) => arr.shape(),
            NcArray::I32(arr) => arr.shape(),
            NcArray::I64(arr) => arr.shape(),
            NcArray::U8(arr) => arr.shape(),
            NcArray::U16(arr) => arr.shape(),
            NcArray::U32(arr) => arr.shape(),
            NcArray::U64(arr) => arr.shape(),
            NcArray::F32(arr) => arr.shape(),
            NcArray::F64(arr) => arr.shape(),
            NcArray::Char(arr) => arr.shape(),
        }
    }

    /// Convert the contained array to `f64` elementwise, consuming self.
    ///
    /// `u64` and `i64` values beyond 2^53 lose precision; gridded physical
    /// quantities never get there in practice.
    pub fn into_f64(self) -> ArrayD<f64> {
        match self {
            NcArray::I8(arr) => arr.mapv(|v| v as f64),
            NcArray::I16(arr) => arr.mapv(|v| v as f64),
            NcArray::I32(arr) => arr.mapv(|v| v as f64),
            NcArray::I64(arr) => arr.mapv(|v| v as f64),
            NcArray::U8(arr) => arr.mapv(|v| v as f64),
            NcArray::U16(arr) => arr.mapv(|v| v as f64),
            NcArray::U32(arr) => arr.mapv(|v| v as f64),
            NcArray::U64(arr) => arr.mapv(|v| v as f64),
            NcArray::F32(arr) => arr.mapv(|v| v as f64),
            NcArray::F64(arr) => arr,
            NcArray::Char(arr) => arr.mapv(|v| v as f64),
        }
    }
}

fn concat_typed<T: Copy>(parts: &[ArrayD<T>], axis: usize) -> netcdf::Result<ArrayD<T>> {
    let views: Vec<_> = parts.iter().map(|a| a.view()).collect();
    ndarray::concatenate(Axis(axis), &views)
        .map_err(|e| netcdf::Error::Str(format!("could not concatenate arrays: {e}")))
}

fn variant_mismatch() -> netcdf::Error {
    netcdf::Error::Str("cannot concatenate arrays of different element types".to_string())
}
