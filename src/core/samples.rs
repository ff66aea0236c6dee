//! Typed sample buffers handed to the engine once per cycle.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Primitive element types accepted on the input channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    #[default]
    Octet,
    Char,
    Short,
    Ushort,
    Long,
    Ulong,
    Float,
    Double,
}

impl ElementType {
    /// Every element type, in input-channel polling order.
    pub const ALL: [ElementType; 8] = [
        ElementType::Octet,
        ElementType::Char,
        ElementType::Short,
        ElementType::Ushort,
        ElementType::Long,
        ElementType::Ulong,
        ElementType::Float,
        ElementType::Double,
    ];

    /// Natural width of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::Octet | ElementType::Char => 1,
            ElementType::Short | ElementType::Ushort => 2,
            ElementType::Long | ElementType::Ulong | ElementType::Float => 4,
            ElementType::Double => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Octet => "octet",
            ElementType::Char => "char",
            ElementType::Short => "short",
            ElementType::Ushort => "ushort",
            ElementType::Long => "long",
            ElementType::Ulong => "ulong",
            ElementType::Float => "float",
            ElementType::Double => "double",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown element type `{s}`"))
    }
}

/// Elements of a single primitive type.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Octet(Vec<u8>),
    Char(Vec<i8>),
    Short(Vec<i16>),
    Ushort(Vec<u16>),
    Long(Vec<i32>),
    Ulong(Vec<u32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

macro_rules! encode_ne {
    ($v:expr) => {{
        let mut out = Vec::with_capacity(std::mem::size_of_val($v.as_slice()));
        for x in $v {
            out.extend_from_slice(&x.to_ne_bytes());
        }
        Cow::Owned(out)
    }};
}

macro_rules! decode_ne {
    ($bytes:expr, $t:ty) => {
        $bytes
            .chunks_exact(std::mem::size_of::<$t>())
            .map(|c| {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(c);
                <$t>::from_ne_bytes(raw)
            })
            .collect()
    };
}

impl Samples {
    pub fn element_type(&self) -> ElementType {
        match self {
            Samples::Octet(_) => ElementType::Octet,
            Samples::Char(_) => ElementType::Char,
            Samples::Short(_) => ElementType::Short,
            Samples::Ushort(_) => ElementType::Ushort,
            Samples::Long(_) => ElementType::Long,
            Samples::Ulong(_) => ElementType::Ulong,
            Samples::Float(_) => ElementType::Float,
            Samples::Double(_) => ElementType::Double,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Samples::Octet(v) => v.len(),
            Samples::Char(v) => v.len(),
            Samples::Short(v) => v.len(),
            Samples::Ushort(v) => v.len(),
            Samples::Long(v) => v.len(),
            Samples::Ulong(v) => v.len(),
            Samples::Float(v) => v.len(),
            Samples::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.element_type().size()
    }

    /// In-memory (native-endian) byte image of the elements. Octet buffers
    /// are borrowed as-is.
    pub fn as_ne_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Samples::Octet(v) => Cow::Borrowed(v.as_slice()),
            Samples::Char(v) => encode_ne!(v),
            Samples::Short(v) => encode_ne!(v),
            Samples::Ushort(v) => encode_ne!(v),
            Samples::Long(v) => encode_ne!(v),
            Samples::Ulong(v) => encode_ne!(v),
            Samples::Float(v) => encode_ne!(v),
            Samples::Double(v) => encode_ne!(v),
        }
    }

    /// Rebuild typed elements from a native-endian byte image. Trailing bytes
    /// that do not form a whole element are ignored.
    pub fn from_ne_bytes(element: ElementType, bytes: &[u8]) -> Self {
        match element {
            ElementType::Octet => Samples::Octet(bytes.to_vec()),
            ElementType::Char => Samples::Char(decode_ne!(bytes, i8)),
            ElementType::Short => Samples::Short(decode_ne!(bytes, i16)),
            ElementType::Ushort => Samples::Ushort(decode_ne!(bytes, u16)),
            ElementType::Long => Samples::Long(decode_ne!(bytes, i32)),
            ElementType::Ulong => Samples::Ulong(decode_ne!(bytes, u32)),
            ElementType::Float => Samples::Float(decode_ne!(bytes, f32)),
            ElementType::Double => Samples::Double(decode_ne!(bytes, f64)),
        }
    }
}

/// One cycle's worth of input: typed samples plus the upstream
/// queue-flushed indication.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub samples: Samples,
    /// Upstream dropped data before this buffer was produced.
    pub queue_flushed: bool,
}

impl SampleBuffer {
    pub fn new(samples: Samples) -> Self {
        Self {
            samples,
            queue_flushed: false,
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.samples.element_type()
    }
}

macro_rules! impl_from_vec {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$t>> for SampleBuffer {
                fn from(v: Vec<$t>) -> Self {
                    SampleBuffer::new(Samples::$variant(v))
                }
            }
        )*
    };
}

impl_from_vec!(
    u8 => Octet,
    i8 => Char,
    i16 => Short,
    u16 => Ushort,
    i32 => Long,
    u32 => Ulong,
    f32 => Float,
    f64 => Double,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::Octet.size(), 1);
        assert_eq!(ElementType::Char.size(), 1);
        assert_eq!(ElementType::Short.size(), 2);
        assert_eq!(ElementType::Ushort.size(), 2);
        assert_eq!(ElementType::Long.size(), 4);
        assert_eq!(ElementType::Ulong.size(), 4);
        assert_eq!(ElementType::Float.size(), 4);
        assert_eq!(ElementType::Double.size(), 8);
    }

    #[test]
    fn test_element_type_parses_case_insensitively() {
        assert_eq!("Short".parse::<ElementType>().unwrap(), ElementType::Short);
        assert_eq!("DOUBLE".parse::<ElementType>().unwrap(), ElementType::Double);
        assert!("int128".parse::<ElementType>().is_err());
    }

    #[test]
    fn test_octet_bytes_are_borrowed() {
        let s = Samples::Octet(vec![1, 2, 3]);
        assert!(matches!(s.as_ne_bytes(), Cow::Borrowed(_)));
        assert_eq!(s.byte_len(), 3);
    }

    #[test]
    fn test_short_bytes_follow_memory_layout() {
        let s = Samples::Short(vec![0x0102, 0x0304]);
        let mut expected = Vec::new();
        expected.extend_from_slice(&0x0102i16.to_ne_bytes());
        expected.extend_from_slice(&0x0304i16.to_ne_bytes());
        assert_eq!(s.as_ne_bytes().as_ref(), expected.as_slice());
        assert_eq!(s.byte_len(), 4);
    }

    #[test]
    fn test_from_ne_bytes_drops_partial_element() {
        let bytes = 7.5f64.to_ne_bytes();
        let mut input = bytes.to_vec();
        input.push(0xAA);
        assert_eq!(
            Samples::from_ne_bytes(ElementType::Double, &input),
            Samples::Double(vec![7.5])
        );
    }

    #[test]
    fn test_sample_buffer_from_vec() {
        let buf: SampleBuffer = vec![1.0f32, 2.0].into();
        assert_eq!(buf.element_type(), ElementType::Float);
        assert!(!buf.queue_flushed);
        assert_eq!(buf.samples.len(), 2);
    }

    #[test]
    fn test_element_type_serde_lowercase() {
        let json = serde_json::to_string(&ElementType::Ushort).unwrap();
        assert_eq!(json, "\"ushort\"");
        let back: ElementType = serde_json::from_str("\"ulong\"").unwrap();
        assert_eq!(back, ElementType::Ulong);
    }
}
