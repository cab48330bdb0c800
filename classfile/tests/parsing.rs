use skadi_classfile::ClassFile;
use skadi_classfile::attribute::class::ClassAttr;
use skadi_classfile::attribute::method::MethodAttribute;
use skadi_classfile::error::ClassFormatError;

/// Hand-assembled class file equivalent to `class Test { void m() {} }`.
/// Building the bytes by hand keeps the tests independent of any toolchain.
fn minimal_class() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes()); // minor
    b.extend_from_slice(&52u16.to_be_bytes()); // major (Java 8)

    // Constant pool: 7 entries -> count 8.
    b.extend_from_slice(&8u16.to_be_bytes());
    push_utf8(&mut b, "Test"); // 1
    push_class(&mut b, 1); // 2
    push_utf8(&mut b, "java/lang/Object"); // 3
    push_class(&mut b, 3); // 4
    push_utf8(&mut b, "m"); // 5
    push_utf8(&mut b, "()V"); // 6
    push_utf8(&mut b, "Code"); // 7

    b.extend_from_slice(&0x0021u16.to_be_bytes()); // public super
    b.extend_from_slice(&2u16.to_be_bytes()); // this = Test
    b.extend_from_slice(&4u16.to_be_bytes()); // super = Object
    b.extend_from_slice(&0u16.to_be_bytes()); // interfaces
    b.extend_from_slice(&0u16.to_be_bytes()); // fields

    b.extend_from_slice(&1u16.to_be_bytes()); // methods
    b.extend_from_slice(&0x0000u16.to_be_bytes()); // flags
    b.extend_from_slice(&5u16.to_be_bytes()); // name = m
    b.extend_from_slice(&6u16.to_be_bytes()); // desc = ()V
    b.extend_from_slice(&1u16.to_be_bytes()); // one attribute
    b.extend_from_slice(&7u16.to_be_bytes()); // "Code"
    b.extend_from_slice(&13u32.to_be_bytes()); // attribute length
    b.extend_from_slice(&0u16.to_be_bytes()); // max_stack
    b.extend_from_slice(&1u16.to_be_bytes()); // max_locals
    b.extend_from_slice(&1u32.to_be_bytes()); // code length
    b.push(0xb1); // return
    b.extend_from_slice(&0u16.to_be_bytes()); // exception table
    b.extend_from_slice(&0u16.to_be_bytes()); // code attributes

    b.extend_from_slice(&0u16.to_be_bytes()); // class attributes
    b
}

fn push_utf8(b: &mut Vec<u8>, s: &str) {
    b.push(1);
    b.extend_from_slice(&(s.len() as u16).to_be_bytes());
    b.extend_from_slice(s.as_bytes());
}

fn push_class(b: &mut Vec<u8>, name_index: u16) {
    b.push(7);
    b.extend_from_slice(&name_index.to_be_bytes());
}

#[rstest::rstest]
#[case::empty(&[])]
#[case::magic_only(&[0xCA, 0xFE, 0xBA, 0xBE])]
#[case::magic_and_minor(&[0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00])]
fn truncated_buffers_are_format_errors(#[case] bytes: &[u8]) {
    let err = ClassFile::parse(bytes).unwrap_err();
    assert!(matches!(err, ClassFormatError::Truncated { .. }));
}

#[test]
fn bad_magic_is_rejected() {
    let err = ClassFile::parse(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]).unwrap_err();
    assert_eq!(err, ClassFormatError::BadMagic(0xDEADBEEF));
}

#[test]
fn minimal_class_decodes_completely() {
    let bytes = minimal_class();
    let cf = ClassFile::parse(&bytes).unwrap();

    assert_eq!(cf.major_version, 52);
    assert_eq!(cf.class_name().unwrap(), "Test");
    assert_eq!(cf.super_class_name().unwrap(), Some("java/lang/Object"));
    assert!(cf.interfaces.is_empty());
    assert!(cf.fields.is_empty());
    assert_eq!(cf.methods.len(), 1);

    let method = &cf.methods[0];
    assert_eq!(cf.cp.get_utf8(method.name_index).unwrap(), "m");
    assert_eq!(cf.cp.get_utf8(method.descriptor_index).unwrap(), "()V");
    let code = method.code().expect("method has a Code attribute");
    assert_eq!(code.max_stack, 0);
    assert_eq!(code.max_locals, 1);
    assert_eq!(code.code, vec![0xb1]);
    assert!(code.exception_table.is_empty());
}

#[test]
fn reparsing_yields_a_structurally_equal_class() {
    let bytes = minimal_class();
    assert_eq!(ClassFile::parse(&bytes).unwrap(), ClassFile::parse(&bytes).unwrap());
}

#[test]
fn every_strict_prefix_is_a_format_error() {
    let bytes = minimal_class();
    for cut in 0..bytes.len() {
        assert!(
            ClassFile::parse(&bytes[..cut]).is_err(),
            "prefix of {} byte(s) parsed successfully",
            cut
        );
    }
}

#[test]
fn trailing_garbage_is_a_format_error() {
    let mut bytes = minimal_class();
    bytes.push(0x00);
    assert!(matches!(
        ClassFile::parse(&bytes).unwrap_err(),
        ClassFormatError::TrailingBytes { .. }
    ));
}

#[test]
fn unknown_attributes_are_preserved_raw() {
    let mut b = Vec::new();
    b.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&52u16.to_be_bytes());

    b.extend_from_slice(&6u16.to_be_bytes()); // pool count
    push_utf8(&mut b, "Test"); // 1
    push_class(&mut b, 1); // 2
    push_utf8(&mut b, "java/lang/Object"); // 3
    push_class(&mut b, 3); // 4
    push_utf8(&mut b, "MadeUpAttribute"); // 5

    b.extend_from_slice(&0x0021u16.to_be_bytes());
    b.extend_from_slice(&2u16.to_be_bytes());
    b.extend_from_slice(&4u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes()); // interfaces
    b.extend_from_slice(&0u16.to_be_bytes()); // fields
    b.extend_from_slice(&0u16.to_be_bytes()); // methods
    b.extend_from_slice(&1u16.to_be_bytes()); // class attributes
    b.extend_from_slice(&5u16.to_be_bytes()); // name index
    b.extend_from_slice(&3u32.to_be_bytes()); // length
    b.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

    let cf = ClassFile::parse(&b).unwrap();
    assert_eq!(
        cf.attributes,
        vec![ClassAttr::Unknown {
            name_index: 5,
            data: vec![0xAA, 0xBB, 0xCC]
        }]
    );
}

#[test]
fn invokedynamic_without_bootstrap_methods_is_rejected() {
    let mut b = Vec::new();
    b.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&52u16.to_be_bytes());

    b.extend_from_slice(&8u16.to_be_bytes()); // pool count
    push_utf8(&mut b, "Test"); // 1
    push_class(&mut b, 1); // 2
    push_utf8(&mut b, "java/lang/Object"); // 3
    push_class(&mut b, 3); // 4
    push_utf8(&mut b, "run"); // 5
    push_utf8(&mut b, "()V"); // 6
    b.push(18); // 7: InvokeDynamic
    b.extend_from_slice(&0u16.to_be_bytes()); // bootstrap index 0 (absent)
    b.extend_from_slice(&8u16.to_be_bytes()); // nat
    b.push(12); // 8: NameAndType
    b.extend_from_slice(&5u16.to_be_bytes());
    b.extend_from_slice(&6u16.to_be_bytes());

    b.extend_from_slice(&0x0021u16.to_be_bytes());
    b.extend_from_slice(&2u16.to_be_bytes());
    b.extend_from_slice(&4u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());

    assert!(matches!(
        ClassFile::parse(&b).unwrap_err(),
        ClassFormatError::MissingBootstrapMethod { .. }
    ));
}
