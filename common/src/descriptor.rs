use crate::jtype::{AllocationType, PrimitiveType, TypeKind};
use std::fmt::Display;

pub const MAX_ARRAY_DIMENSIONS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    UnexpectedEnd,
    BadTypeChar { found: char, at: usize },
    UnterminatedClassName { at: usize },
    TooManyDimensions { at: usize },
    VoidArray { at: usize },
    MissingOpenParen,
    MissingCloseParen,
    TrailingBytes { at: usize },
}

impl Display for DescriptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptorError::UnexpectedEnd => write!(f, "descriptor ends prematurely"),
            DescriptorError::BadTypeChar { found, at } => {
                write!(f, "invalid type character '{}' at offset {}", found, at)
            }
            DescriptorError::UnterminatedClassName { at } => {
                write!(f, "class name missing ';' terminator at offset {}", at)
            }
            DescriptorError::TooManyDimensions { at } => {
                write!(f, "more than {} array dimensions at offset {}", MAX_ARRAY_DIMENSIONS, at)
            }
            DescriptorError::VoidArray { at } => write!(f, "array of void at offset {}", at),
            DescriptorError::MissingOpenParen => write!(f, "method descriptor missing '('"),
            DescriptorError::MissingCloseParen => write!(f, "method descriptor missing ')'"),
            DescriptorError::TrailingBytes { at } => {
                write!(f, "trailing characters after descriptor at offset {}", at)
            }
        }
    }
}

/// A parsed field descriptor: base kind, array dimensions, and the class
/// name when the base kind is a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub kind: TypeKind,
    pub dimensions: u8,
    pub class_name: Option<String>,
}

impl FieldDescriptor {
    pub fn is_array(&self) -> bool {
        self.dimensions > 0
    }

    /// Two value slots are charged for a bare long or double.
    pub fn is_wide(&self) -> bool {
        !self.is_array() && self.kind.is_wide()
    }

    /// How the value is stored in a field or array slot. Arrays and
    /// references are pointers regardless of their base kind.
    pub fn allocation_type(&self) -> AllocationType {
        if self.is_array() || self.kind == TypeKind::Reference {
            return AllocationType::Reference;
        }
        match self.kind {
            TypeKind::Boolean => AllocationType::Boolean,
            TypeKind::Byte => AllocationType::Byte,
            TypeKind::Short => AllocationType::Short,
            TypeKind::Char => AllocationType::Char,
            TypeKind::Int => AllocationType::Int,
            TypeKind::Long => AllocationType::Long,
            TypeKind::Float => AllocationType::Float,
            TypeKind::Double => AllocationType::Double,
            // Void fields cannot be allocated; treated as a one-byte hole so
            // callers do not have to special-case it before erroring out.
            _ => AllocationType::Byte,
        }
    }

    /// Element type of a one-dimensional primitive array descriptor.
    pub fn primitive_element(&self) -> Option<PrimitiveType> {
        if !self.is_array() {
            return None;
        }
        Some(match self.kind {
            TypeKind::Boolean => PrimitiveType::Boolean,
            TypeKind::Byte => PrimitiveType::Byte,
            TypeKind::Char => PrimitiveType::Char,
            TypeKind::Short => PrimitiveType::Short,
            TypeKind::Int => PrimitiveType::Int,
            TypeKind::Long => PrimitiveType::Long,
            TypeKind::Float => PrimitiveType::Float,
            TypeKind::Double => PrimitiveType::Double,
            _ => return None,
        })
    }
}

impl Display for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for _ in 0..self.dimensions {
            write!(f, "[")?;
        }
        match (&self.class_name, self.kind.descriptor_char()) {
            (Some(name), _) => write!(f, "L{};", name),
            (None, Some(c)) => write!(f, "{}", c),
            (None, None) => write!(f, "?"),
        }
    }
}

/// Parses one field descriptor starting at `*pos`, advancing the cursor past
/// it on success. Extra input after the descriptor is left unconsumed, which
/// is what method-descriptor parsing relies on.
pub fn parse_field_descriptor(input: &str, pos: &mut usize) -> Result<FieldDescriptor, DescriptorError> {
    let bytes = input.as_bytes();
    let mut at = *pos;
    let mut dimensions = 0usize;

    while bytes.get(at) == Some(&b'[') {
        dimensions += 1;
        if dimensions > MAX_ARRAY_DIMENSIONS {
            return Err(DescriptorError::TooManyDimensions { at });
        }
        at += 1;
    }

    let Some(&c) = bytes.get(at) else {
        return Err(DescriptorError::UnexpectedEnd);
    };

    let kind = match c {
        b'B' => TypeKind::Byte,
        b'C' => TypeKind::Char,
        b'D' => TypeKind::Double,
        b'F' => TypeKind::Float,
        b'I' => TypeKind::Int,
        b'J' => TypeKind::Long,
        b'S' => TypeKind::Short,
        b'Z' => TypeKind::Boolean,
        b'V' => TypeKind::Void,
        b'L' => TypeKind::Reference,
        other => {
            return Err(DescriptorError::BadTypeChar {
                found: other as char,
                at,
            });
        }
    };

    if kind == TypeKind::Void && dimensions > 0 {
        return Err(DescriptorError::VoidArray { at });
    }

    let class_name = if kind == TypeKind::Reference {
        let name_start = at + 1;
        let Some(rel_end) = input[name_start..].find(';') else {
            return Err(DescriptorError::UnterminatedClassName { at });
        };
        at = name_start + rel_end + 1;
        Some(input[name_start..name_start + rel_end].to_string())
    } else {
        at += 1;
        None
    };

    *pos = at;
    Ok(FieldDescriptor {
        kind,
        dimensions: dimensions as u8,
        class_name,
    })
}

/// A parsed method descriptor: argument descriptors in order plus the
/// return descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldDescriptor>,
    pub ret: FieldDescriptor,
}

impl MethodDescriptor {
    /// Number of argument slots, with longs and doubles counted twice.
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(|p| if p.is_wide() { 2 } else { 1 }).sum()
    }

    pub fn to_java_signature(&self, class_name: &str, method_name: &str) -> String {
        let args = self
            .params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}.{}({})", class_name.replace('/', "."), method_name, args)
    }
}

impl TryFrom<&str> for MethodDescriptor {
    type Error = DescriptorError;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        let bytes = input.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(DescriptorError::MissingOpenParen);
        }
        let mut pos = 1usize;
        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => params.push(parse_field_descriptor(input, &mut pos)?),
                None => return Err(DescriptorError::MissingCloseParen),
            }
        }
        let ret = parse_field_descriptor(input, &mut pos)?;
        if pos != bytes.len() {
            return Err(DescriptorError::TrailingBytes { at: pos });
        }
        Ok(MethodDescriptor { params, ret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn field_descriptor_sequence() {
        // The same cursor walks several concatenated descriptors.
        let input = "Lcom/example/Example;[I[[[J";
        let mut pos = 0;

        let example = parse_field_descriptor(input, &mut pos).unwrap();
        assert_eq!(example.kind, TypeKind::Reference);
        assert_eq!(example.dimensions, 0);
        assert_eq!(example.class_name.as_deref(), Some("com/example/Example"));

        let int_array = parse_field_descriptor(input, &mut pos).unwrap();
        assert_eq!(int_array.kind, TypeKind::Int);
        assert_eq!(int_array.dimensions, 1);

        let long_cube = parse_field_descriptor(input, &mut pos).unwrap();
        assert_eq!(long_cube.kind, TypeKind::Long);
        assert_eq!(long_cube.dimensions, 3);

        assert_eq!(pos, input.len());
    }

    #[rstest]
    #[case("B", TypeKind::Byte)]
    #[case("C", TypeKind::Char)]
    #[case("V", TypeKind::Void)]
    #[case("Z", TypeKind::Boolean)]
    fn single_char_descriptors(#[case] input: &str, #[case] expected: TypeKind) {
        let mut pos = 0;
        let d = parse_field_descriptor(input, &mut pos).unwrap();
        assert_eq!(d.kind, expected);
        assert_eq!(d.dimensions, 0);
        assert_eq!(pos, 1);
    }

    #[rstest]
    #[case("")]
    #[case("X")]
    #[case("Ljava/lang/String")]
    #[case("[")]
    #[case("[V")]
    fn malformed_field_descriptors(#[case] input: &str) {
        let mut pos = 0;
        assert!(parse_field_descriptor(input, &mut pos).is_err());
        assert_eq!(pos, 0, "cursor must not advance on failure");
    }

    #[test]
    fn dimension_limit_is_255() {
        let ok = format!("{}I", "[".repeat(255));
        let mut pos = 0;
        assert_eq!(parse_field_descriptor(&ok, &mut pos).unwrap().dimensions, 255);

        let too_deep = format!("{}I", "[".repeat(256));
        let mut pos = 0;
        assert!(matches!(
            parse_field_descriptor(&too_deep, &mut pos),
            Err(DescriptorError::TooManyDimensions { .. })
        ));
    }

    #[test]
    fn method_descriptors() {
        let m = MethodDescriptor::try_from("(IJLjava/lang/String;)V").unwrap();
        assert_eq!(m.params.len(), 3);
        assert_eq!(m.param_slots(), 4);
        assert_eq!(m.ret.kind, TypeKind::Void);

        assert!(MethodDescriptor::try_from("()").is_err());
        assert!(MethodDescriptor::try_from("(I").is_err());
        assert!(MethodDescriptor::try_from("I)V").is_err());
        assert!(MethodDescriptor::try_from("()VV").is_err());
    }
}
