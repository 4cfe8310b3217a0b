//! Typed memory: owned arrays and the views kernels navigate.
//!
//! An [`Array`] pairs a concrete [`Type`] with a [`Buffer`]. A [`View`] is a
//! cursor into that buffer: the type at the cursor, the linear index used by
//! ragged dimensions and a byte offset.
//!
//! Layout rules:
//! - scalars are stored native-endian;
//! - `?T` is one validity byte followed by `T`;
//! - `string` is an 8-byte handle into the buffer's string pool (0 is `""`);
//! - record fields are packed in declaration order;
//! - fixed dimensions address `offset + i * step * itemsize`;
//! - ragged dimensions address the linear index `offsets[index] + i * step`,
//!   converted to a byte offset once the element type is reached.

use crate::error::KernelError;
use crate::ndtypes::{Order, ScalarKind, Type};

/// Rust types that map onto a [`ScalarKind`].
pub trait Scalar: Copy + PartialEq + std::fmt::Debug + 'static {
    const KIND: ScalarKind;
    const SIZE: usize;

    fn from_ne(bytes: &[u8]) -> Self;
    fn write_ne(self, out: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl Scalar for $t {
                const KIND: ScalarKind = ScalarKind::$kind;
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_ne(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }

                fn write_ne(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
}

impl Scalar for bool {
    const KIND: ScalarKind = ScalarKind::Bool;
    const SIZE: usize = 1;

    fn from_ne(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_ne(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }
}

/// Raw storage of an array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buffer {
    data: Vec<u8>,
    strings: Vec<String>,
}

impl Buffer {
    fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0; len],
            strings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn bytes(&self, offset: usize, size: usize) -> Result<&[u8], KernelError> {
        let len = self.data.len();
        offset
            .checked_add(size)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(KernelError::BufferOverrun {
                offset: offset as i64,
                size,
                len,
            })
    }

    fn bytes_mut(&mut self, offset: usize, size: usize) -> Result<&mut [u8], KernelError> {
        let len = self.data.len();
        offset
            .checked_add(size)
            .and_then(|end| self.data.get_mut(offset..end))
            .ok_or(KernelError::BufferOverrun {
                offset: offset as i64,
                size,
                len,
            })
    }

    fn string(&self, handle: u64) -> Result<&str, KernelError> {
        if handle == 0 {
            return Ok("");
        }
        usize::try_from(handle - 1)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(String::as_str)
            .ok_or_else(|| KernelError::Value(format!("dangling string handle {handle}")))
    }

    fn intern(&mut self, s: &str) -> u64 {
        if s.is_empty() {
            return 0;
        }
        self.strings.push(s.to_string());
        self.strings.len() as u64
    }
}

/// Access to the buffer behind a view.
#[derive(Debug)]
pub enum Slot<'a> {
    Shared(&'a Buffer),
    Exclusive(&'a mut Buffer),
}

impl<'a> Slot<'a> {
    fn buffer(&self) -> &Buffer {
        match self {
            Slot::Shared(b) => *b,
            Slot::Exclusive(b) => &**b,
        }
    }

    fn buffer_mut(&mut self) -> Result<&mut Buffer, KernelError> {
        match self {
            Slot::Shared(_) => Err(KernelError::ReadOnly),
            Slot::Exclusive(b) => Ok(&mut **b),
        }
    }

    fn reborrow(&mut self) -> Slot<'_> {
        match self {
            Slot::Shared(b) => Slot::Shared(*b),
            Slot::Exclusive(b) => Slot::Exclusive(&mut **b),
        }
    }
}

/// `(start, step, shape)` of the current row of a ragged dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarIndices {
    pub start: i64,
    pub step: i64,
    pub shape: i64,
}

/// A typed cursor into a buffer.
#[derive(Debug)]
pub struct View<'a> {
    ty: &'a Type,
    index: i64,
    offset: usize,
    slot: Slot<'a>,
}

fn type_error(expected: &str, found: &Type) -> KernelError {
    KernelError::TypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

/// `base + index * scale`, or `None` on overflow.
fn displace(base: i64, index: i64, scale: i64) -> Option<i64> {
    index.checked_mul(scale).and_then(|delta| base.checked_add(delta))
}

/// A checked byte position; overflow is reported as an overrun past the end.
fn checked_offset(value: Option<i64>, size: usize, len: usize) -> Result<usize, KernelError> {
    match value {
        Some(value) => to_offset(value, size, len),
        None => Err(KernelError::BufferOverrun {
            offset: i64::MAX,
            size,
            len,
        }),
    }
}

fn to_offset(value: i64, size: usize, len: usize) -> Result<usize, KernelError> {
    usize::try_from(value).map_err(|_| KernelError::BufferOverrun {
        offset: value,
        size,
        len,
    })
}

impl<'a> View<'a> {
    pub fn new(ty: &'a Type, slot: Slot<'a>) -> Self {
        Self {
            ty,
            index: 0,
            offset: 0,
            slot,
        }
    }

    pub fn ty(&self) -> &'a Type {
        self.ty
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.slot, Slot::Exclusive(_))
    }

    /// A second cursor at the same position.
    pub fn reborrow(&mut self) -> View<'_> {
        View {
            ty: self.ty,
            index: self.index,
            offset: self.offset,
            slot: self.slot.reborrow(),
        }
    }

    /// Length of the fixed dimension at the cursor.
    pub fn fixed_shape(&self) -> Result<i64, KernelError> {
        match self.ty {
            Type::FixedDim { shape, .. } => Ok(*shape),
            other => Err(type_error("a fixed dimension", other)),
        }
    }

    /// Sub-view for element `i` of the fixed dimension at the cursor.
    pub fn fixed_dim_next(&mut self, i: i64) -> Result<View<'_>, KernelError> {
        let Type::FixedDim { shape, step, elem } = self.ty else {
            return Err(type_error("a fixed dimension", self.ty));
        };
        if i < 0 || i >= *shape {
            return Err(KernelError::IndexOutOfBounds { index: i, len: *shape });
        }
        let itemsize = elem.dtype().datasize();
        let len = self.slot.buffer().len();
        let scale = step.checked_mul(itemsize as i64);
        let offset = checked_offset(scale.and_then(|s| displace(self.offset as i64, i, s)), itemsize, len)?;
        Ok(View {
            ty: elem,
            index: self.index,
            offset,
            slot: self.slot.reborrow(),
        })
    }

    /// Row bounds of the ragged dimension at the cursor.
    pub fn var_indices(&self) -> Result<VarIndices, KernelError> {
        let Type::VarDim { offsets: Some(offsets), .. } = self.ty else {
            return Err(type_error("a concrete var dimension", self.ty));
        };
        let rows = offsets.len() as i64 - 1;
        if self.index < 0 || self.index >= rows {
            return Err(KernelError::IndexOutOfBounds {
                index: self.index,
                len: rows.max(0),
            });
        }
        let row = self.index as usize;
        let start = offsets[row];
        Ok(VarIndices {
            start,
            step: 1,
            shape: offsets[row + 1] - start,
        })
    }

    /// Sub-view for element `i` of the current row of the ragged dimension
    /// at the cursor, given that row's `start` and `step`.
    pub fn var_dim_next(&mut self, start: i64, step: i64, i: i64) -> Result<View<'_>, KernelError> {
        let Type::VarDim { elem, .. } = self.ty else {
            return Err(type_error("a var dimension", self.ty));
        };
        let index = displace(start, i, step).ok_or_else(|| {
            KernelError::Value(format!("ragged index {start} + {i} * {step} overflows"))
        })?;
        let offset = if elem.is_dim() {
            self.offset
        } else {
            let itemsize = elem.datasize();
            let len = self.slot.buffer().len();
            checked_offset(displace(self.offset as i64, index, itemsize as i64), itemsize, len)?
        };
        Ok(View {
            ty: elem,
            index,
            offset,
            slot: self.slot.reborrow(),
        })
    }

    /// Sub-view for record field `field`.
    pub fn record_next(&mut self, field: usize) -> Result<View<'_>, KernelError> {
        let Type::Record(fields) = self.ty else {
            return Err(type_error("a record", self.ty));
        };
        let Some(target) = fields.get(field) else {
            return Err(KernelError::IndexOutOfBounds {
                index: field as i64,
                len: fields.len() as i64,
            });
        };
        let skip: usize = fields[..field].iter().map(|f| f.ty.datasize()).sum();
        Ok(View {
            ty: &target.ty,
            index: self.index,
            offset: self.offset + skip,
            slot: self.slot.reborrow(),
        })
    }

    fn expect_scalar(&self, kind: ScalarKind) -> Result<(), KernelError> {
        match self.ty {
            Type::Scalar(k) if *k == kind => Ok(()),
            other => Err(type_error(kind.name(), other)),
        }
    }

    pub fn read<T: Scalar>(&self) -> Result<T, KernelError> {
        self.expect_scalar(T::KIND)?;
        Ok(T::from_ne(self.slot.buffer().bytes(self.offset, T::SIZE)?))
    }

    pub fn write<T: Scalar>(&mut self, value: T) -> Result<(), KernelError> {
        self.expect_scalar(T::KIND)?;
        let offset = self.offset;
        value.write_ne(self.slot.buffer_mut()?.bytes_mut(offset, T::SIZE)?);
        Ok(())
    }

    /// True if the optional value at the cursor is missing.
    pub fn is_missing(&self) -> Result<bool, KernelError> {
        match self.ty {
            Type::Option(_) => Ok(self.slot.buffer().bytes(self.offset, 1)?[0] == 0),
            other => Err(type_error("an optional value", other)),
        }
    }

    pub fn read_option<T: Scalar>(&self) -> Result<Option<T>, KernelError> {
        match self.ty {
            Type::Option(inner) if **inner == Type::Scalar(T::KIND) => {
                let bytes = self.slot.buffer().bytes(self.offset, 1 + T::SIZE)?;
                Ok((bytes[0] != 0).then(|| T::from_ne(&bytes[1..])))
            }
            other => Err(type_error(&format!("?{}", T::KIND.name()), other)),
        }
    }

    pub fn write_option<T: Scalar>(&mut self, value: Option<T>) -> Result<(), KernelError> {
        match self.ty {
            Type::Option(inner) if **inner == Type::Scalar(T::KIND) => {
                let offset = self.offset;
                let bytes = self.slot.buffer_mut()?.bytes_mut(offset, 1 + T::SIZE)?;
                match value {
                    Some(v) => {
                        bytes[0] = 1;
                        v.write_ne(&mut bytes[1..]);
                    }
                    None => bytes.fill(0),
                }
                Ok(())
            }
            other => Err(type_error(&format!("?{}", T::KIND.name()), other)),
        }
    }

    pub fn read_str(&self) -> Result<&str, KernelError> {
        if *self.ty != Type::String {
            return Err(type_error("string", self.ty));
        }
        let buffer = self.slot.buffer();
        let handle = u64::from_ne(buffer.bytes(self.offset, 8)?);
        buffer.string(handle)
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), KernelError> {
        if *self.ty != Type::String {
            return Err(type_error("string", self.ty));
        }
        let offset = self.offset;
        let buffer = self.slot.buffer_mut()?;
        buffer.bytes_mut(offset, 8)?;
        let handle = buffer.intern(value);
        handle.write_ne(buffer.bytes_mut(offset, 8)?);
        Ok(())
    }

    /// Read a `T` at `delta` bytes from `base`, for loops that do their own
    /// address arithmetic over the dimensions at the cursor.
    pub(crate) fn load<T: Scalar>(&self, base: i64, delta: i64) -> Result<T, KernelError> {
        self.expect_dtype(T::KIND)?;
        let buffer = self.slot.buffer();
        let offset = checked_offset(base.checked_add(delta), T::SIZE, buffer.len())?;
        Ok(T::from_ne(buffer.bytes(offset, T::SIZE)?))
    }

    pub(crate) fn store<T: Scalar>(&mut self, base: i64, delta: i64, value: T) -> Result<(), KernelError> {
        self.expect_dtype(T::KIND)?;
        let buffer = self.slot.buffer_mut()?;
        let offset = checked_offset(base.checked_add(delta), T::SIZE, buffer.len())?;
        value.write_ne(buffer.bytes_mut(offset, T::SIZE)?);
        Ok(())
    }

    fn expect_dtype(&self, kind: ScalarKind) -> Result<(), KernelError> {
        match self.ty.dtype() {
            Type::Scalar(k) if *k == kind => Ok(()),
            other => Err(type_error(kind.name(), other)),
        }
    }
}

/// Number of innermost elements a concrete type spans.
fn span(ty: &Type) -> Result<i64, KernelError> {
    match ty {
        Type::FixedDim { shape, step, elem } => {
            let inner = span(elem)?;
            if *shape <= 0 || inner == 0 {
                return Ok(0);
            }
            step.checked_abs()
                .and_then(|step| displace(inner, shape - 1, step))
                .ok_or_else(|| too_large(ty))
        }
        Type::VarDim { offsets, elem } => match elem.as_ref() {
            Type::VarDim { .. } => span(elem),
            _ => Ok(offsets.as_ref().and_then(|o| o.last().copied()).unwrap_or(0)),
        },
        _ => Ok(1),
    }
}

fn too_large(ty: &Type) -> KernelError {
    KernelError::Value(format!("type `{ty}` is too large to allocate"))
}

/// Check that ragged offsets are well formed: the outermost level has a
/// single row, offsets start at 0 and never decrease, and each level has
/// one more offset than the rows its parent spans.
fn check_var_offsets(ty: &Type, expected_len: Option<usize>) -> Result<(), KernelError> {
    let Type::VarDim { offsets: Some(offsets), elem } = ty else {
        return Ok(());
    };
    let bad = |msg: String| Err(KernelError::Value(msg));
    let want = expected_len.unwrap_or(2);
    if offsets.len() != want {
        return bad(format!("expected {want} offsets, found {}", offsets.len()));
    }
    if offsets[0] != 0 || offsets.windows(2).any(|w| w[1] < w[0]) {
        return bad(format!("offsets {offsets:?} must start at 0 and be non-decreasing"));
    }
    let rows = offsets.last().copied().unwrap_or(0) as usize;
    check_var_offsets(elem, Some(rows + 1))
}

/// An owned, typed array.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    ty: Type,
    buf: Buffer,
}

impl Array {
    /// A zero-filled array of a concrete type; optional values start
    /// missing and strings empty.
    pub fn zeros(ty: Type) -> Result<Array, KernelError> {
        if !ty.is_concrete() {
            return Err(KernelError::Value(format!("cannot allocate abstract type `{ty}`")));
        }
        check_var_offsets(&ty, None)?;
        let bytes = usize::try_from(span(&ty)?)
            .ok()
            .and_then(|n| n.checked_mul(ty.dtype().datasize()))
            .ok_or_else(|| too_large(&ty))?;
        Ok(Array {
            ty,
            buf: Buffer::zeroed(bytes),
        })
    }

    fn from_elements<T: Scalar>(ty: Type, data: &[T]) -> Array {
        let mut buf = Buffer::zeroed(data.len() * T::SIZE);
        for (chunk, &value) in buf.data.chunks_exact_mut(T::SIZE).zip(data) {
            value.write_ne(chunk);
        }
        Array { ty, buf }
    }

    fn check_len(shape: &[i64], len: usize) -> Result<(), KernelError> {
        let expected = shape
            .iter()
            .try_fold(1i64, |acc, &n| if n < 0 { None } else { acc.checked_mul(n) })
            .ok_or_else(|| KernelError::Value(format!("invalid shape {shape:?}")))?;
        if expected != len as i64 {
            return Err(KernelError::ShapeMismatch {
                expected,
                found: len as i64,
            });
        }
        Ok(())
    }

    /// A C-ordered fixed array from row-major `data`.
    pub fn from_slice<T: Scalar>(shape: &[i64], data: &[T]) -> Result<Array, KernelError> {
        Self::check_len(shape, data.len())?;
        let ty = Type::fixed_array(shape, Type::Scalar(T::KIND), Order::C);
        Ok(Self::from_elements(ty, data))
    }

    /// A Fortran-ordered fixed array from column-major `data`.
    pub fn from_slice_fortran<T: Scalar>(shape: &[i64], data: &[T]) -> Result<Array, KernelError> {
        Self::check_len(shape, data.len())?;
        let ty = Type::fixed_array(shape, Type::Scalar(T::KIND), Order::Fortran);
        Ok(Self::from_elements(ty, data))
    }

    pub fn scalar<T: Scalar>(value: T) -> Array {
        Self::from_elements(Type::Scalar(T::KIND), &[value])
    }

    /// A one-dimensional ragged array (`var * T`) holding `data`.
    pub fn var_from_slice<T: Scalar>(data: &[T]) -> Array {
        let ty = Type::var(vec![0, data.len() as i64], Type::Scalar(T::KIND));
        Self::from_elements(ty, data)
    }

    /// A two-dimensional ragged array (`var * var * T`) with one row per
    /// entry of `rows`.
    pub fn ragged<T: Scalar>(rows: &[Vec<T>]) -> Array {
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0);
        for row in rows {
            offsets.push(offsets[offsets.len() - 1] + row.len() as i64);
        }
        let ty = Type::var(
            vec![0, rows.len() as i64],
            Type::var(offsets, Type::Scalar(T::KIND)),
        );
        let data: Vec<T> = rows.iter().flatten().copied().collect();
        Self::from_elements(ty, &data)
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buf
    }

    pub(crate) fn split_mut(&mut self) -> (&Type, &mut Buffer) {
        (&self.ty, &mut self.buf)
    }

    pub fn view(&self) -> View<'_> {
        View::new(&self.ty, Slot::Shared(&self.buf))
    }

    pub fn view_mut(&mut self) -> View<'_> {
        View::new(&self.ty, Slot::Exclusive(&mut self.buf))
    }

    /// All elements in logical (row-major) order.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>, KernelError> {
        let mut out = Vec::new();
        collect(&mut self.view(), &mut out)?;
        Ok(out)
    }

    /// Elements grouped by the outermost dimension. A ragged array built by
    /// [`Array::ragged`] yields its rows.
    pub fn to_rows<T: Scalar>(&self) -> Result<Vec<Vec<T>>, KernelError> {
        rows_of(&mut self.view())
    }
}

fn rows_of<T: Scalar>(view: &mut View<'_>) -> Result<Vec<Vec<T>>, KernelError> {
    let mut rows = Vec::new();
    match view.ty() {
        Type::FixedDim { shape, .. } => {
            for i in 0..*shape {
                let mut row = Vec::new();
                collect(&mut view.fixed_dim_next(i)?, &mut row)?;
                rows.push(row);
            }
        }
        Type::VarDim { .. } => {
            let VarIndices { start, step, shape } = view.var_indices()?;
            for i in 0..shape {
                let mut row = Vec::new();
                collect(&mut view.var_dim_next(start, step, i)?, &mut row)?;
                rows.push(row);
            }
        }
        other => return Err(type_error("a dimension", other)),
    }
    Ok(rows)
}

fn collect<T: Scalar>(view: &mut View<'_>, out: &mut Vec<T>) -> Result<(), KernelError> {
    match view.ty() {
        Type::FixedDim { shape, .. } => {
            for i in 0..*shape {
                collect(&mut view.fixed_dim_next(i)?, out)?;
            }
        }
        Type::VarDim { .. } => {
            let VarIndices { start, step, shape } = view.var_indices()?;
            for i in 0..shape {
                collect(&mut view.var_dim_next(start, step, i)?, out)?;
            }
        }
        _ => out.push(view.read()?),
    }
    Ok(())
}
