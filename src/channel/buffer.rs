use std::fmt;

/// Fixed storage size of one string element, including the terminating NUL.
pub const MAX_STRING_SIZE: usize = 40;

/// Element type of a channel variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    String,
}

impl ElementType {
    /// Size in bytes of a single element.
    pub const fn size(self) -> usize {
        match self {
            ElementType::Char | ElementType::UChar => 1,
            ElementType::Short | ElementType::UShort => 2,
            ElementType::Int | ElementType::UInt | ElementType::Float => 4,
            ElementType::Long | ElementType::ULong | ElementType::Double => 8,
            ElementType::String => MAX_STRING_SIZE,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Char => "char",
            ElementType::UChar => "unsigned char",
            ElementType::Short => "short",
            ElementType::UShort => "unsigned short",
            ElementType::Int => "int",
            ElementType::UInt => "unsigned int",
            ElementType::Long => "long",
            ElementType::ULong => "unsigned long",
            ElementType::Float => "float",
            ElementType::Double => "double",
            ElementType::String => "string",
        };
        f.write_str(name)
    }
}

/// A Rust scalar that can be stored as an element of a [`TypedBuffer`].
pub trait Element: Copy {
    const TYPE: ElementType;

    fn encode(self, out: &mut [u8]);

    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$kind;

                fn encode(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_element! {
    i8 => Char,
    u8 => UChar,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
}

/// Errors raised by typed access to a [`TypedBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("element type mismatch: buffer holds {found}, accessed as {expected}")]
    TypeMismatch {
        expected: ElementType,
        found: ElementType,
    },

    #[error("element index {index} out of range for buffer of {count} elements")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("string of {len} bytes does not fit in a string element")]
    StringTooLong { len: usize },
}

/// A byte buffer together with the descriptor of the elements it holds.
///
/// Copy bounds are always derived from the element descriptor, never passed in as raw sizes.
#[derive(Clone, PartialEq, Eq)]
pub struct TypedBuffer {
    element: ElementType,
    count: usize,
    bytes: Vec<u8>,
}

impl TypedBuffer {
    /// Construct a zero-filled buffer of `count` elements.
    pub fn new(element: ElementType, count: usize) -> Self {
        Self {
            element,
            count,
            bytes: vec![0; element.size() * count],
        }
    }

    /// Construct a single element buffer holding `value`.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::from_slice(&[value])
    }

    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let mut buffer = Self::new(T::TYPE, values.len());
        for (chunk, value) in buffer
            .bytes
            .chunks_exact_mut(T::TYPE.size())
            .zip(values.iter().copied())
        {
            value.encode(chunk);
        }
        buffer
    }

    /// Construct a single string element buffer.
    pub fn string(value: &str) -> Result<Self, BufferError> {
        let mut buffer = Self::new(ElementType::String, 1);
        buffer.set_str(0, value)?;
        Ok(buffer)
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn get<T: Element>(&self, index: usize) -> Result<T, BufferError> {
        let range = self.element_range(T::TYPE, index)?;
        Ok(T::decode(&self.bytes[range]))
    }

    pub fn set<T: Element>(&mut self, index: usize, value: T) -> Result<(), BufferError> {
        let range = self.element_range(T::TYPE, index)?;
        value.encode(&mut self.bytes[range]);
        Ok(())
    }

    /// Read string element `index`, up to its first NUL.
    pub fn get_str(&self, index: usize) -> Result<String, BufferError> {
        let range = self.element_range(ElementType::String, index)?;
        let raw = &self.bytes[range];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn set_str(&mut self, index: usize, value: &str) -> Result<(), BufferError> {
        if value.len() >= MAX_STRING_SIZE {
            return Err(BufferError::StringTooLong { len: value.len() });
        }
        let range = self.element_range(ElementType::String, index)?;
        let slot = &mut self.bytes[range];
        slot.fill(0);
        slot[..value.len()].copy_from_slice(value.as_bytes());
        Ok(())
    }

    /// Copy the first `count` elements of `src` into this buffer.
    ///
    /// The copy is clipped to the element counts of both buffers, so elements beyond what
    /// the source actually holds are left untouched. Returns the number of elements copied.
    pub fn copy_from(&mut self, src: &TypedBuffer, count: usize) -> Result<usize, BufferError> {
        if src.element != self.element {
            return Err(BufferError::TypeMismatch {
                expected: self.element,
                found: src.element,
            });
        }
        let copied = count.min(self.count).min(src.count);
        let len = copied * self.element.size();
        self.bytes[..len].copy_from_slice(&src.bytes[..len]);
        Ok(copied)
    }

    fn element_range(
        &self,
        expected: ElementType,
        index: usize,
    ) -> Result<std::ops::Range<usize>, BufferError> {
        if expected != self.element {
            return Err(BufferError::TypeMismatch {
                expected,
                found: self.element,
            });
        }
        if index >= self.count {
            return Err(BufferError::IndexOutOfRange {
                index,
                count: self.count,
            });
        }
        let size = self.element.size();
        Ok(index * size..(index + 1) * size)
    }
}

impl fmt::Debug for TypedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("element", &self.element)
            .field("count", &self.count)
            .field("len", &self.bytes.len())
            .finish()
    }
}
